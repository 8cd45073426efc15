use crate::output::{print_json, print_table, truncate};
use anyhow::Context;
use clap::{Subcommand, ValueEnum};
use oba_core::alerts::{AgencyAlertsStore, CheckOutcome, FetchKind};
use oba_core::config::Config;
use oba_core::paths;
use oba_core::preferences::FilePreferences;
use oba_network::AgencyAlert;
use std::path::Path;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum AlertsSubcommand {
    /// Fetch agencies and alerts from the configured servers, then print a view
    Check {
        /// Which alerts to print
        #[arg(long, value_enum, default_value_t = View::Unread)]
        view: View,

        /// Log fetch progress to stderr
        #[arg(long, short = 'v')]
        verbose: bool,
    },

    /// Mark one or more alerts as read
    MarkRead {
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Show or set whether the region's test alerts are requested
    TestAlerts {
        #[arg(value_enum)]
        state: Option<Toggle>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum View {
    /// Every alert, newest first
    All,
    /// WARNING/SEVERE alerts starting within 8 hours of now
    Recent,
    /// Recent alerts not yet marked read
    Unread,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum Toggle {
    On,
    Off,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(root: &Path, subcmd: AlertsSubcommand, json: bool) -> anyhow::Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        match subcmd {
            AlertsSubcommand::Check { view, .. } => check(root, view, json).await,
            AlertsSubcommand::MarkRead { ids } => mark_read(root, &ids, json),
            AlertsSubcommand::TestAlerts { state } => test_alerts(root, state, json),
        }
    })
}

fn open_preferences(root: &Path) -> anyhow::Result<Arc<FilePreferences>> {
    let path = paths::preferences_path(root);
    let prefs = FilePreferences::open(&path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    Ok(Arc::new(prefs))
}

/// A store with no servers, for commands that only touch preferences.
fn offline_store(root: &Path) -> anyhow::Result<AgencyAlertsStore> {
    Ok(AgencyAlertsStore::builder(open_preferences(root)?).build())
}

// ---------------------------------------------------------------------------
// check
// ---------------------------------------------------------------------------

async fn check(root: &Path, view: View, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let store = AgencyAlertsStore::from_config(&config, open_preferences(root)?)
        .context("failed to set up alert sources")?;

    if store.check_for_updates() == CheckOutcome::Unconfigured {
        anyhow::bail!("no agency lookup configured");
    }
    store.until_idle().await;

    let failure = store.last_failure();
    if let Some(f) = &failure {
        if f.kind == FetchKind::Agencies {
            anyhow::bail!(
                "failed to fetch agencies for region '{}': {}",
                config.region.name,
                f.message
            );
        }
    }

    let alerts = match view {
        View::All => store.agency_alerts(),
        View::Recent => store.recent_high_severity_alerts(),
        View::Unread => store.recent_unread_high_severity_alerts(),
    };

    if json {
        let rows: Vec<serde_json::Value> = alerts
            .iter()
            .map(|a| {
                serde_json::json!({
                    "alert": a,
                    "unread": store.is_alert_unread(&a.id),
                })
            })
            .collect();
        print_json(&serde_json::json!({
            "region": config.region.name,
            "agencies": store.agencies().len(),
            "alerts": rows,
            "failure": failure,
        }))?;
        return Ok(());
    }

    if let Some(f) = &failure {
        eprintln!("warning: {} alerts unavailable: {}", f.source, f.message);
    }
    if alerts.is_empty() {
        println!("No alerts.");
        return Ok(());
    }
    print_alerts(&store, &alerts);
    Ok(())
}

fn print_alerts(store: &AgencyAlertsStore, alerts: &[AgencyAlert]) {
    let rows = alerts
        .iter()
        .map(|a| {
            vec![
                a.id.clone(),
                a.agency_id.clone().unwrap_or_else(|| "-".to_string()),
                a.severity.as_str().to_string(),
                a.start_date
                    .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "-".to_string()),
                read_marker(store.is_alert_unread(&a.id)).to_string(),
                truncate(a.title.as_deref().unwrap_or(""), 60),
            ]
        })
        .collect();
    print_table(&["ID", "AGENCY", "SEVERITY", "STARTS", "", "TITLE"], rows);
}

fn read_marker(unread: bool) -> &'static str {
    if unread {
        ""
    } else {
        "read"
    }
}

// ---------------------------------------------------------------------------
// mark-read
// ---------------------------------------------------------------------------

fn mark_read(root: &Path, ids: &[String], json: bool) -> anyhow::Result<()> {
    let store = offline_store(root)?;
    let mut newly_read = Vec::new();
    for id in ids {
        if store
            .mark_alert_read(id)
            .with_context(|| format!("failed to mark '{id}' read"))?
        {
            newly_read.push(id.as_str());
        }
    }

    if json {
        print_json(&serde_json::json!({ "marked": newly_read }))?;
    } else if newly_read.is_empty() {
        println!("Already read.");
    } else {
        for id in newly_read {
            println!("Marked read: {id}");
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// test-alerts
// ---------------------------------------------------------------------------

fn test_alerts(root: &Path, state: Option<Toggle>, json: bool) -> anyhow::Result<()> {
    let store = offline_store(root)?;
    if let Some(state) = state {
        store
            .set_display_regional_test_alerts(matches!(state, Toggle::On))
            .context("failed to save preference")?;
    }
    let enabled = store.display_regional_test_alerts();

    if json {
        print_json(&serde_json::json!({ "display_regional_test_alerts": enabled }))?;
    } else {
        println!(
            "Regional test alerts: {}",
            if enabled { "on" } else { "off" }
        );
    }
    Ok(())
}

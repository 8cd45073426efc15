mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{alerts::AlertsSubcommand, config::ConfigSubcommand, init::InitArgs};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "oba",
    about = "OneBusAway agency alerts: fetch, review and acknowledge service alerts for a region",
    version,
    propagate_version = true
)]
struct Cli {
    /// Directory holding config.yaml and preferences.json (default: ~/.onebusaway)
    #[arg(long, global = true, env = "OBA_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a config for one region
    Init {
        /// OneBusAway REST API server
        #[arg(long)]
        rest_url: String,

        /// Obaco server for the region's alerts feed
        #[arg(long)]
        obaco_url: Option<String>,

        /// Region id on the Obaco server
        #[arg(long)]
        region_id: Option<String>,

        #[arg(long, env = "OBA_API_KEY")]
        api_key: Option<String>,

        /// Region display name
        #[arg(long, default_value = "default")]
        name: String,

        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },

    /// Inspect and validate the config
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// Fetch and manage agency alerts
    Alerts {
        #[command(subcommand)]
        subcommand: AlertsSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Alerts {
            subcommand: AlertsSubcommand::Check { verbose: true, .. },
        } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = root::resolve_root(cli.root.as_deref()).and_then(|root| match cli.command {
        Commands::Init {
            rest_url,
            obaco_url,
            region_id,
            api_key,
            name,
            force,
        } => cmd::init::run(
            &root,
            InitArgs {
                name,
                rest_url,
                obaco_url,
                region_id,
                api_key,
                force,
            },
        ),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
        Commands::Alerts { subcommand } => cmd::alerts::run(&root, subcommand, cli.json),
    });

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

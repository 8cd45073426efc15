//! `AgencyAlertsStore`: fetches, merges and publishes agency alerts.
//!
//! A check runs in two phases. The agency list is fetched once (the
//! *primary* fetch); once it is known, every configured [`AlertSource`] is
//! issued in parallel (the *secondary* fetches). Each kind of fetch has one
//! slot, so a check never starts a second request of a kind that is already
//! in flight.
//!
//! Successful batches are handed to the merge lane, a single task that
//! applies them to the [`AlertSet`] one at a time. A batch that changes the
//! set triggers exactly one fan-out to the registered delegates, which is
//! delivered on the [`ForegroundLane`].
//!
//! ```text
//! check_for_updates
//!   │ agencies unknown         │ agencies known
//!   ▼                          ▼
//! AgencyLookup ──ok──► AlertSource × N (parallel)
//!                              │ ok: batch
//!                              ▼
//!                      merge lane (serial) ──changed──► delegates (foreground)
//! ```
//!
//! [`cancel`](AgencyAlertsStore::cancel) and dropping the store cancel every
//! in-flight fetch; batches queued before the cancel are discarded.

pub mod records;
pub mod sources;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use chrono::{DateTime, Utc};
use oba_network::{AgencyAlert, AgencyWithCoverage, NetworkError, Operation};
use serde::Serialize;
use serde_json::json;
use tokio::sync::{mpsc, oneshot, Notify};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::delegates::{AgencyAlertsDelegate, DelegateRegistry, ForegroundLane};
use crate::error::Result;
use crate::preferences::{
    get_bool, get_strings, PreferenceStore, DISPLAY_REGIONAL_TEST_ALERTS, READ_AGENCY_ALERT_IDS,
};

pub use records::{recent_window, AlertSet, ReadState};
pub use sources::{AgencyLookup, AlertSource, RegionServices};

// ---------------------------------------------------------------------------
// Public result types
// ---------------------------------------------------------------------------

/// The three kinds of fetch the store issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchKind {
    Agencies,
    RegionalAlerts,
    ObacoAlerts,
}

impl FetchKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FetchKind::Agencies => "agencies",
            FetchKind::RegionalAlerts => "regional_alerts",
            FetchKind::ObacoAlerts => "obaco_alerts",
        }
    }
}

/// The most recent fetch that failed.
#[derive(Debug, Clone, Serialize)]
pub struct FetchFailure {
    pub kind: FetchKind,
    pub source: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// What a call to [`AgencyAlertsStore::check_for_updates`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// At least one fetch was issued.
    Started,
    /// Every fetch this check would issue is already in flight.
    AlreadyInFlight,
    /// The store has no agency lookup, so there is nothing to fetch.
    Unconfigured,
}

// ---------------------------------------------------------------------------
// Fetch slots
// ---------------------------------------------------------------------------

enum FetchSlot<T> {
    Idle,
    InFlight(Operation<T>),
    Completed,
}

impl<T> FetchSlot<T>
where
    T: Send + Sync + 'static,
{
    fn is_in_flight(&self) -> bool {
        matches!(self, FetchSlot::InFlight(_))
    }

    fn take_in_flight(&mut self) -> Option<Operation<T>> {
        match std::mem::replace(self, FetchSlot::Idle) {
            FetchSlot::InFlight(op) => Some(op),
            other => {
                *self = other;
                None
            }
        }
    }

    /// Mark completed, but only if the slot still holds operation `id`.
    fn settle(&mut self, id: Uuid) {
        if matches!(self, FetchSlot::InFlight(op) if op.id() == id) {
            *self = FetchSlot::Completed;
        }
    }
}

struct Slots {
    agencies: FetchSlot<Vec<AgencyWithCoverage>>,
    regional: FetchSlot<Vec<AgencyAlert>>,
    obaco: FetchSlot<Vec<AgencyAlert>>,
}

impl Slots {
    fn alerts_slot(&mut self, kind: FetchKind) -> &mut FetchSlot<Vec<AgencyAlert>> {
        match kind {
            FetchKind::ObacoAlerts => &mut self.obaco,
            FetchKind::RegionalAlerts | FetchKind::Agencies => &mut self.regional,
        }
    }

    fn any_in_flight(&self) -> bool {
        self.agencies.is_in_flight() || self.regional.is_in_flight() || self.obaco.is_in_flight()
    }
}

// ---------------------------------------------------------------------------
// Merge lane
// ---------------------------------------------------------------------------

enum MergeMessage {
    Batch {
        generation: u64,
        source: &'static str,
        alerts: Vec<AgencyAlert>,
    },
    Barrier(oneshot::Sender<()>),
}

fn spawn_merge_lane(
    alerts: Arc<RwLock<AlertSet>>,
    delegates: Arc<DelegateRegistry>,
    generation: Arc<AtomicU64>,
) -> mpsc::UnboundedSender<MergeMessage> {
    let (tx, mut rx) = mpsc::unbounded_channel::<MergeMessage>();
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match msg {
                MergeMessage::Batch {
                    generation: batch_generation,
                    source,
                    alerts: batch,
                } => {
                    if batch_generation != generation.load(Ordering::SeqCst) {
                        debug!(source, "discarding alert batch from a canceled check");
                        continue;
                    }
                    let received = batch.len();
                    let (changed, total) = {
                        let mut set = alerts.write().unwrap_or_else(PoisonError::into_inner);
                        let changed = set.merge(batch);
                        (changed, set.len())
                    };
                    info!(source, received, total, changed, "merged alert batch");
                    if changed {
                        delegates.notify_all();
                    }
                }
                MergeMessage::Barrier(done) => {
                    let _ = done.send(());
                }
            }
        }
    });
    tx
}

// ---------------------------------------------------------------------------
// AgencyAlertsStore
// ---------------------------------------------------------------------------

struct Shared {
    lookup: Option<Arc<dyn AgencyLookup>>,
    regional: Option<Arc<dyn AlertSource>>,
    obaco: Option<Arc<dyn AlertSource>>,
    preferences: Arc<dyn PreferenceStore>,
    agencies: Mutex<Vec<AgencyWithCoverage>>,
    slots: Mutex<Slots>,
    slots_changed: Notify,
    alerts: Arc<RwLock<AlertSet>>,
    read: RwLock<ReadState>,
    include_test_alerts: AtomicBool,
    generation: Arc<AtomicU64>,
    merge_tx: mpsc::UnboundedSender<MergeMessage>,
    delegates: Arc<DelegateRegistry>,
    last_failure: Mutex<Option<FetchFailure>>,
}

/// Aggregates agency alerts from the configured providers.
///
/// Must be built within a Tokio runtime. All methods are safe to call from
/// any thread.
pub struct AgencyAlertsStore {
    shared: Arc<Shared>,
}

pub struct AgencyAlertsStoreBuilder {
    preferences: Arc<dyn PreferenceStore>,
    lookup: Option<Arc<dyn AgencyLookup>>,
    regional: Option<Arc<dyn AlertSource>>,
    obaco: Option<Arc<dyn AlertSource>>,
    foreground: Option<ForegroundLane>,
}

impl AgencyAlertsStoreBuilder {
    pub fn agency_lookup(mut self, lookup: Arc<dyn AgencyLookup>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    pub fn regional_source(mut self, source: Arc<dyn AlertSource>) -> Self {
        self.regional = Some(source);
        self
    }

    pub fn obaco_source(mut self, source: Arc<dyn AlertSource>) -> Self {
        self.obaco = Some(source);
        self
    }

    /// Deliver delegate callbacks on `lane` instead of a lane of the store's own.
    pub fn foreground(mut self, lane: ForegroundLane) -> Self {
        self.foreground = Some(lane);
        self
    }

    /// Load persisted preferences and start the merge lane.
    pub fn build(self) -> AgencyAlertsStore {
        let read = match get_strings(self.preferences.as_ref(), READ_AGENCY_ALERT_IDS) {
            Ok(ids) => ReadState::from_ids(ids),
            Err(e) => {
                warn!(error = %e, "ignoring unreadable read-alert preference");
                ReadState::default()
            }
        };
        let include_test_alerts =
            get_bool(self.preferences.as_ref(), DISPLAY_REGIONAL_TEST_ALERTS, false);

        let lane = self.foreground.unwrap_or_else(ForegroundLane::spawn);
        let delegates = Arc::new(DelegateRegistry::new(lane));
        let alerts = Arc::new(RwLock::new(AlertSet::new()));
        let generation = Arc::new(AtomicU64::new(0));
        let merge_tx = spawn_merge_lane(
            Arc::clone(&alerts),
            Arc::clone(&delegates),
            Arc::clone(&generation),
        );

        AgencyAlertsStore {
            shared: Arc::new(Shared {
                lookup: self.lookup,
                regional: self.regional,
                obaco: self.obaco,
                preferences: self.preferences,
                agencies: Mutex::new(Vec::new()),
                slots: Mutex::new(Slots {
                    agencies: FetchSlot::Idle,
                    regional: FetchSlot::Idle,
                    obaco: FetchSlot::Idle,
                }),
                slots_changed: Notify::new(),
                alerts,
                read: RwLock::new(read),
                include_test_alerts: AtomicBool::new(include_test_alerts),
                generation,
                merge_tx,
                delegates,
                last_failure: Mutex::new(None),
            }),
        }
    }
}

impl AgencyAlertsStore {
    pub fn builder(preferences: Arc<dyn PreferenceStore>) -> AgencyAlertsStoreBuilder {
        AgencyAlertsStoreBuilder {
            preferences,
            lookup: None,
            regional: None,
            obaco: None,
            foreground: None,
        }
    }

    /// A store wired to the REST API and, when configured, Obaco.
    pub fn from_config(config: &Config, preferences: Arc<dyn PreferenceStore>) -> Result<Self> {
        let services = RegionServices::from_config(config)?;
        let mut builder = Self::builder(preferences)
            .agency_lookup(services.rest.clone())
            .regional_source(services.rest);
        if let Some(obaco) = services.obaco {
            builder = builder.obaco_source(obaco);
        }
        Ok(builder.build())
    }

    // ---- Fetching --------------------------------------------------------

    /// Issue whatever fetches are needed to bring the alerts up to date.
    ///
    /// Returns immediately; results arrive through the delegates.
    pub fn check_for_updates(&self) -> CheckOutcome {
        let Some(lookup) = self.shared.lookup.clone() else {
            debug!("alerts check skipped: no agency lookup configured");
            return CheckOutcome::Unconfigured;
        };

        let agencies = self.shared.agencies().clone();
        if !agencies.is_empty() {
            let generation = self.shared.generation.load(Ordering::SeqCst);
            return if Shared::fetch_alerts(&self.shared, &agencies, generation) {
                CheckOutcome::Started
            } else {
                CheckOutcome::AlreadyInFlight
            };
        }

        let op = {
            let mut slots = self.shared.slots();
            if slots.agencies.is_in_flight() {
                debug!("agency lookup already in flight");
                return CheckOutcome::AlreadyInFlight;
            }
            let op = lookup.agencies_with_coverage();
            slots.agencies = FetchSlot::InFlight(op.clone());
            op
        };
        self.shared.slots_changed.notify_waiters();

        let generation = self.shared.generation.load(Ordering::SeqCst);
        let weak = Arc::downgrade(&self.shared);
        let id = op.id();
        op.on_complete(move |result| {
            if let Some(shared) = weak.upgrade() {
                shared.agencies_completed(id, generation, result);
            }
        });
        CheckOutcome::Started
    }

    /// Cancel every in-flight fetch. Nothing from the canceled fetches is
    /// merged and no delegate hears about them. The cached agency list and
    /// the alerts merged so far are kept.
    pub fn cancel(&self) {
        self.shared.cancel_all();
    }

    /// Resolve once no fetch is in flight and every merge and notification
    /// that resulted has been delivered.
    pub async fn until_idle(&self) {
        loop {
            let changed = self.shared.slots_changed.notified();
            let busy = self.shared.slots().any_in_flight();
            if !busy {
                break;
            }
            changed.await;
        }
        let (done, wait) = oneshot::channel();
        if self.shared.merge_tx.send(MergeMessage::Barrier(done)).is_ok() {
            let _ = wait.await;
        }
        self.shared.delegates.lane().drain().await;
    }

    pub fn is_fetching(&self) -> bool {
        self.shared.slots().any_in_flight()
    }

    pub fn last_failure(&self) -> Option<FetchFailure> {
        self.shared
            .last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The agencies from the last successful lookup.
    pub fn agencies(&self) -> Vec<AgencyWithCoverage> {
        self.shared.agencies().clone()
    }

    // ---- Views -----------------------------------------------------------

    /// Every known alert, newest start first.
    pub fn agency_alerts(&self) -> Vec<AgencyAlert> {
        self.shared.alerts_read().sorted()
    }

    pub fn recent_high_severity_alerts(&self) -> Vec<AgencyAlert> {
        self.recent_high_severity_alerts_at(Utc::now())
    }

    pub fn recent_high_severity_alerts_at(&self, now: DateTime<Utc>) -> Vec<AgencyAlert> {
        self.shared.alerts_read().recent_high_severity(now)
    }

    pub fn recent_unread_high_severity_alerts(&self) -> Vec<AgencyAlert> {
        self.recent_unread_high_severity_alerts_at(Utc::now())
    }

    pub fn recent_unread_high_severity_alerts_at(&self, now: DateTime<Utc>) -> Vec<AgencyAlert> {
        let read = self.shared.read_state();
        self.shared
            .alerts_read()
            .recent_unread_high_severity(now, &read)
    }

    pub fn is_alert_unread(&self, id: &str) -> bool {
        !self.shared.read_state().contains(id)
    }

    // ---- Read state ------------------------------------------------------

    /// Record `id` as read and persist the read set before returning.
    ///
    /// Returns `false` if it was already read. If the write fails the alert
    /// stays unread, so a retry writes again.
    pub fn mark_alert_read(&self, id: &str) -> Result<bool> {
        let mut read = self.shared.read.write().unwrap_or_else(PoisonError::into_inner);
        if read.contains(id) {
            return Ok(false);
        }
        let mut ids = read.to_sorted_vec();
        ids.push(id.to_string());
        ids.sort();
        self.shared.preferences.set(READ_AGENCY_ALERT_IDS, json!(ids))?;
        read.insert(id);
        debug!(id, "alert marked read");
        Ok(true)
    }

    // ---- Test alerts -----------------------------------------------------

    pub fn display_regional_test_alerts(&self) -> bool {
        self.shared.include_test_alerts.load(Ordering::SeqCst)
    }

    /// Persist the flag. It applies to the next Obaco fetch.
    pub fn set_display_regional_test_alerts(&self, enabled: bool) -> Result<()> {
        self.shared
            .preferences
            .set(DISPLAY_REGIONAL_TEST_ALERTS, json!(enabled))?;
        self.shared
            .include_test_alerts
            .store(enabled, Ordering::SeqCst);
        Ok(())
    }

    // ---- Delegates -------------------------------------------------------

    /// Register a delegate. The store holds it weakly.
    pub fn add_delegate<D: AgencyAlertsDelegate + 'static>(&self, delegate: &Arc<D>) {
        self.shared.delegates.add(delegate);
    }

    pub fn remove_delegate<D: AgencyAlertsDelegate + 'static>(&self, delegate: &Arc<D>) {
        self.shared.delegates.remove(delegate);
    }
}

impl Shared {
    fn agencies(&self) -> MutexGuard<'_, Vec<AgencyWithCoverage>> {
        self.agencies.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn alerts_read(&self) -> std::sync::RwLockReadGuard<'_, AlertSet> {
        self.alerts.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, ReadState> {
        self.read.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn sources(&self) -> impl Iterator<Item = (FetchKind, &Arc<dyn AlertSource>)> {
        [
            (FetchKind::RegionalAlerts, self.regional.as_ref()),
            (FetchKind::ObacoAlerts, self.obaco.as_ref()),
        ]
        .into_iter()
        .filter_map(|(kind, source)| source.map(|s| (kind, s)))
    }

    /// Issue every alert source that is not already in flight, tagging the
    /// batches with `generation`. Returns `true` if at least one was issued.
    fn fetch_alerts(this: &Arc<Self>, agencies: &[AgencyWithCoverage], generation: u64) -> bool {
        let include_test_alerts = this.include_test_alerts.load(Ordering::SeqCst);

        let issued = {
            let mut slots = this.slots();
            // cancel_all bumps the generation before taking this lock, so a
            // check here either sees the cancel or is canceled by it.
            if generation != this.generation.load(Ordering::SeqCst) {
                debug!("skipping alert fetches for a canceled check");
                return false;
            }
            let issued: Vec<(FetchKind, &'static str, Operation<Vec<AgencyAlert>>)> = this
                .sources()
                .filter_map(|(kind, source)| {
                    let slot = slots.alerts_slot(kind);
                    if slot.is_in_flight() {
                        debug!(source = source.name(), "alert fetch already in flight");
                        return None;
                    }
                    let op = source.alerts(agencies, include_test_alerts);
                    *slot = FetchSlot::InFlight(op.clone());
                    Some((kind, source.name(), op))
                })
                .collect();
            issued
        };
        if issued.is_empty() {
            return false;
        }
        this.slots_changed.notify_waiters();

        for (kind, source, op) in issued {
            let weak: Weak<Shared> = Arc::downgrade(this);
            let id = op.id();
            op.on_complete(move |result| {
                if let Some(shared) = weak.upgrade() {
                    shared.alerts_completed(kind, source, id, generation, result);
                }
            });
        }
        true
    }

    fn agencies_completed(
        self: &Arc<Self>,
        id: Uuid,
        generation: u64,
        result: &oba_network::Result<Vec<AgencyWithCoverage>>,
    ) {
        match result {
            Ok(agencies) if generation == self.generation.load(Ordering::SeqCst) => {
                info!(count = agencies.len(), "agency list updated");
                *self.agencies() = agencies.clone();
                if agencies.is_empty() {
                    info!("region reports no agencies; skipping alert fetches");
                } else {
                    Self::fetch_alerts(self, agencies, generation);
                }
            }
            Ok(_) => debug!("ignoring agency list from a canceled check"),
            Err(e) if generation == self.generation.load(Ordering::SeqCst) => {
                self.record_failure(FetchKind::Agencies, "agencies", e)
            }
            Err(e) => debug!(error = %e, "ignoring lookup failure from a canceled check"),
        }
        self.slots().agencies.settle(id);
        self.slots_changed.notify_waiters();
    }

    fn alerts_completed(
        &self,
        kind: FetchKind,
        source: &'static str,
        id: Uuid,
        generation: u64,
        result: &oba_network::Result<Vec<AgencyAlert>>,
    ) {
        match result {
            Ok(alerts) => {
                let _ = self.merge_tx.send(MergeMessage::Batch {
                    generation,
                    source,
                    alerts: alerts.clone(),
                });
            }
            Err(e) if generation == self.generation.load(Ordering::SeqCst) => {
                self.record_failure(kind, source, e)
            }
            Err(e) => debug!(source, error = %e, "ignoring failure from a canceled check"),
        }
        self.slots().alerts_slot(kind).settle(id);
        self.slots_changed.notify_waiters();
    }

    fn record_failure(&self, kind: FetchKind, source: &str, error: &NetworkError) {
        warn!(source, kind = kind.as_str(), error = %error, "alert fetch failed");
        *self
            .last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(FetchFailure {
            kind,
            source: source.to_string(),
            message: error.to_string(),
            at: Utc::now(),
        });
    }

    fn cancel_all(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let (agencies, regional, obaco) = {
            let mut slots = self.slots();
            (
                slots.agencies.take_in_flight(),
                slots.regional.take_in_flight(),
                slots.obaco.take_in_flight(),
            )
        };
        let mut canceled = 0;
        if let Some(op) = agencies {
            op.cancel();
            canceled += 1;
        }
        for op in [regional, obaco].into_iter().flatten() {
            op.cancel();
            canceled += 1;
        }
        if canceled > 0 {
            info!(canceled, "canceled in-flight alert fetches");
        }
        self.slots_changed.notify_waiters();
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

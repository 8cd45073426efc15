//! Weakly-held observers and the foreground lane that notifies them.
//!
//! The registry never keeps an observer alive: it stores [`Weak`] handles and
//! drops the dead ones whenever it fans out. Notifications are delivered on a
//! [`ForegroundLane`], a single task that runs submitted jobs one at a time in
//! submission order, so observers see callbacks serialized and off the thread
//! that triggered them.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

/// Receives a payload-free "alerts changed" signal. Implementors re-read the
/// store's views instead of receiving a diff.
pub trait AgencyAlertsDelegate: Send + Sync {
    fn agency_alerts_updated(&self);
}

// ---------------------------------------------------------------------------
// ForegroundLane
// ---------------------------------------------------------------------------

type Job = Box<dyn FnOnce() + Send + 'static>;

enum LaneMessage {
    Run(Job),
    Barrier(oneshot::Sender<()>),
}

/// A serialized execution context for observer callbacks.
///
/// Clones submit to the same lane. The lane task exits once every clone has
/// been dropped and the queue is empty.
#[derive(Clone)]
pub struct ForegroundLane {
    tx: mpsc::UnboundedSender<LaneMessage>,
}

impl ForegroundLane {
    /// Spawn the lane task on the current Tokio runtime.
    pub fn spawn() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<LaneMessage>();
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                match msg {
                    LaneMessage::Run(job) => job(),
                    LaneMessage::Barrier(done) => {
                        let _ = done.send(());
                    }
                }
            }
            trace!("foreground lane closed");
        });
        Self { tx }
    }

    /// Queue `job`. Returns `false` if the lane has shut down.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) -> bool {
        self.tx.send(LaneMessage::Run(Box::new(job))).is_ok()
    }

    /// Wait until every job submitted before this call has run.
    pub async fn drain(&self) {
        let (done, wait) = oneshot::channel();
        if self.tx.send(LaneMessage::Barrier(done)).is_ok() {
            let _ = wait.await;
        }
    }
}

// ---------------------------------------------------------------------------
// DelegateRegistry
// ---------------------------------------------------------------------------

struct Entry {
    key: usize,
    delegate: Weak<dyn AgencyAlertsDelegate>,
}

pub struct DelegateRegistry {
    entries: Mutex<Vec<Entry>>,
    lane: ForegroundLane,
}

/// Identity of an observer: the address of its allocation. Stable while any
/// `Weak` to it exists, which the registry holds for every entry.
fn key_of<D>(delegate: &Arc<D>) -> usize {
    Arc::as_ptr(delegate) as *const () as usize
}

impl DelegateRegistry {
    pub fn new(lane: ForegroundLane) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            lane,
        }
    }

    pub fn lane(&self) -> &ForegroundLane {
        &self.lane
    }

    /// Register `delegate`. Adding the same observer again has no effect.
    pub fn add<D: AgencyAlertsDelegate + 'static>(&self, delegate: &Arc<D>) {
        let key = key_of(delegate);
        let mut entries = self.lock();
        if entries.iter().any(|e| e.key == key) {
            return;
        }
        let weak = Arc::downgrade(delegate);
        let weak: Weak<dyn AgencyAlertsDelegate> = weak;
        entries.push(Entry {
            key,
            delegate: weak,
        });
    }

    pub fn remove<D: AgencyAlertsDelegate + 'static>(&self, delegate: &Arc<D>) {
        let key = key_of(delegate);
        self.lock().retain(|e| e.key != key);
    }

    /// Number of registered observers that are still alive.
    pub fn live_count(&self) -> usize {
        self.lock()
            .iter()
            .filter(|e| e.delegate.strong_count() > 0)
            .count()
    }

    /// Snapshot the live observers and schedule one callback each on the
    /// foreground lane. Returns without waiting for delivery.
    ///
    /// Returns how many observers were scheduled.
    pub fn notify_all(&self) -> usize {
        let live: Vec<Arc<dyn AgencyAlertsDelegate>> = {
            let mut entries = self.lock();
            entries.retain(|e| e.delegate.strong_count() > 0);
            entries.iter().filter_map(|e| e.delegate.upgrade()).collect()
        };
        let count = live.len();
        if count == 0 {
            return 0;
        }
        debug!(observers = count, "notifying alert observers");
        self.lane.submit(move || {
            for delegate in live {
                delegate.agency_alerts_updated();
            }
        });
        count
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

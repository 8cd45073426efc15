use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tokio::task::AbortHandle;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::{NetworkError, Result};

type Work<T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'static>>;
type Continuation<T> = Box<dyn FnOnce(&Result<T>) + Send + 'static>;

// ─── OperationState ───────────────────────────────────────────────────────

/// Lifecycle of an [`Operation`].
///
/// ```text
/// Created ──prepare──▶ Ready ──start──▶ Executing ──▶ Finished
///    │                   │                  │
///    └───────────────────┴──────cancel──────┴────────▶ Canceled
/// ```
///
/// A failed request still ends in `Finished`; the error lives in the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Created,
    Ready,
    Executing,
    Finished,
    Canceled,
}

impl OperationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, OperationState::Finished | OperationState::Canceled)
    }
}

// ─── Operation ────────────────────────────────────────────────────────────

/// A cancelable unit of asynchronous work with a typed result.
///
/// `Operation` is a cheap handle; clones refer to the same underlying work.
/// Continuations registered with [`on_complete`](Operation::on_complete) or
/// [`then`](Operation::then) fire exactly once, after the work finishes, on
/// the task that ran it. They never fire for a canceled operation, even if
/// the cancel races with the I/O completing.
///
/// ```rust,ignore
/// let op = Operation::spawn("agencies", async { fetch().await });
/// op.then(|agencies| println!("{} agencies", agencies.len()));
/// // later, on teardown:
/// op.cancel();
/// ```
pub struct Operation<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Operation<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for Operation<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operation")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .finish()
    }
}

struct Inner<T> {
    id: Uuid,
    label: &'static str,
    shared: Mutex<Shared<T>>,
    settled: Notify,
}

struct Shared<T> {
    state: OperationState,
    work: Option<Work<T>>,
    abort: Option<AbortHandle>,
    result: Option<Arc<Result<T>>>,
    continuations: Vec<Continuation<T>>,
}

impl<T> Inner<T> {
    fn lock(&self) -> MutexGuard<'_, Shared<T>> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Operation<T>
where
    T: Send + Sync + 'static,
{
    /// Create an operation with no work attached yet.
    pub fn new(label: &'static str) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: Uuid::new_v4(),
                label,
                shared: Mutex::new(Shared {
                    state: OperationState::Created,
                    work: None,
                    abort: None,
                    result: None,
                    continuations: Vec::new(),
                }),
                settled: Notify::new(),
            }),
        }
    }

    /// Create, prepare and start an operation in one step.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<F>(label: &'static str, work: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let op = Self::new(label);
        {
            let mut shared = op.inner.lock();
            shared.work = Some(Box::pin(work));
            shared.state = OperationState::Ready;
            op.launch(&mut shared);
        }
        op
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn label(&self) -> &'static str {
        self.inner.label
    }

    pub fn state(&self) -> OperationState {
        self.inner.lock().state
    }

    /// The outcome, once the operation has finished.
    pub fn result(&self) -> Option<Arc<Result<T>>> {
        self.inner.lock().result.clone()
    }

    /// Attach the work to run: `Created → Ready`.
    pub fn prepare<F>(&self, work: F) -> Result<()>
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let mut shared = self.inner.lock();
        if shared.state != OperationState::Created {
            return Err(self.invalid("prepare", shared.state));
        }
        shared.work = Some(Box::pin(work));
        shared.state = OperationState::Ready;
        Ok(())
    }

    /// Begin executing on the Tokio runtime: `Ready → Executing`.
    pub fn start(&self) -> Result<()> {
        let mut shared = self.inner.lock();
        if shared.state != OperationState::Ready {
            return Err(self.invalid("start", shared.state));
        }
        self.launch(&mut shared);
        Ok(())
    }

    /// Cancel the operation. In-flight I/O is aborted and pending
    /// continuations are dropped without being called.
    ///
    /// No-op once the operation is terminal.
    pub fn cancel(&self) {
        let dropped = {
            let mut shared = self.inner.lock();
            if shared.state.is_terminal() {
                return;
            }
            shared.state = OperationState::Canceled;
            shared.work = None;
            if let Some(abort) = shared.abort.take() {
                abort.abort();
            }
            std::mem::take(&mut shared.continuations)
        };
        debug!(op = self.inner.label, id = %self.inner.id, dropped = dropped.len(), "operation canceled");
        drop(dropped);
        self.inner.settled.notify_waiters();
    }

    /// Register `f` to run once the operation finishes, successfully or not.
    ///
    /// If the operation already finished, `f` runs immediately on the caller.
    /// If it was canceled, `f` is dropped.
    pub fn on_complete<F>(&self, f: F)
    where
        F: FnOnce(&Result<T>) + Send + 'static,
    {
        let finished = {
            let mut shared = self.inner.lock();
            match shared.state {
                OperationState::Finished => shared.result.clone(),
                OperationState::Canceled => return,
                _ => {
                    shared.continuations.push(Box::new(f));
                    return;
                }
            }
        };
        if let Some(result) = finished {
            f(&result);
        }
    }

    /// Register `f` to run only if the operation finishes with a success.
    ///
    /// Transport, status and parse failures skip `f`; callers that need the
    /// error use [`on_complete`](Operation::on_complete) or [`result`](Operation::result).
    pub fn then<F>(&self, f: F)
    where
        F: FnOnce(&T) + Send + 'static,
    {
        let label = self.inner.label;
        let id = self.inner.id;
        self.on_complete(move |result| match result {
            Ok(value) => f(value),
            Err(e) => debug!(op = label, %id, error = %e, "operation failed; skipping continuation"),
        });
    }

    /// Wait until the operation is terminal.
    ///
    /// Returns `None` if it was canceled. Continuations may still be running
    /// when this returns. Never resolves for an operation that is not started.
    pub async fn wait(&self) -> Option<Arc<Result<T>>> {
        loop {
            let settled = self.inner.settled.notified();
            {
                let shared = self.inner.lock();
                match shared.state {
                    OperationState::Finished => return shared.result.clone(),
                    OperationState::Canceled => return None,
                    _ => {}
                }
            }
            settled.await;
        }
    }

    // ─── Internal ─────────────────────────────────────────────────────────

    fn launch(&self, shared: &mut Shared<T>) {
        let Some(work) = shared.work.take() else {
            return;
        };
        shared.state = OperationState::Executing;
        trace!(op = self.inner.label, id = %self.inner.id, "operation started");

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let outcome = work.await;
            Self::finish(&inner, outcome);
        });
        shared.abort = Some(handle.abort_handle());
    }

    fn finish(inner: &Arc<Inner<T>>, outcome: Result<T>) {
        let (result, continuations) = {
            let mut shared = inner.lock();
            if shared.state != OperationState::Executing {
                // Canceled while the work was completing.
                return;
            }
            shared.state = OperationState::Finished;
            shared.abort = None;
            let result = Arc::new(outcome);
            shared.result = Some(Arc::clone(&result));
            (result, std::mem::take(&mut shared.continuations))
        };

        match result.as_ref() {
            Ok(_) => debug!(op = inner.label, id = %inner.id, "operation finished"),
            Err(e) => debug!(op = inner.label, id = %inner.id, error = %e, "operation finished with error"),
        }

        for continuation in continuations {
            continuation(&result);
        }
        inner.settled.notify_waiters();
    }

    fn invalid(&self, action: &'static str, state: OperationState) -> NetworkError {
        NetworkError::InvalidState {
            label: self.inner.label,
            action,
            state,
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────

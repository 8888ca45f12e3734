use indicatif::ProgressBar;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tokio_util::task::TaskTracker;
use tracing::warn;

/// Time a canceled transfer gets to clean up before its task is aborted
const CANCEL_GRACE: Duration = Duration::from_secs(10);

/// Lifecycle of a transfer: `Submitted -> InProgress -> {Completed | Failed | Canceled}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Submitted,
    InProgress,
    Completed,
    Failed,
    Canceled,
}

impl TransferState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }
}

/// Final accounting of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOutcome {
    pub bytes_total: u64,
    pub bytes_transferred: u64,
    pub state: TransferState,
}

impl TransferOutcome {
    pub fn is_completed(&self) -> bool {
        self.state == TransferState::Completed
    }
}

/// The wait on a transfer was cut short before it reached a terminal state
#[derive(Error, Debug)]
#[error("wait for transfer completion was interrupted")]
pub struct Interrupted;

#[derive(Debug)]
struct Shared {
    total: AtomicU64,
    transferred: AtomicU64,
    state: watch::Sender<TransferState>,
    cancel: CancellationToken,
    bar: Option<ProgressBar>,
}

impl Shared {
    /// Move to `next` unless a terminal state was already reached
    fn advance(&self, next: TransferState) -> bool {
        self.state.send_if_modified(|state| {
            if state.is_terminal() || *state == next {
                false
            } else {
                *state = next;
                true
            }
        })
    }
}

/// Handle to a submitted transfer
///
/// The handle observes progress and state written by the [`TransferReporter`]
/// held by whoever performs the transfer.
#[derive(Debug)]
pub struct Transfer {
    shared: Arc<Shared>,
    tracker: TaskTracker,
    task: Option<AbortHandle>,
}

impl Transfer {
    /// Create a transfer of `total_bytes` and the reporter that drives it
    pub fn new(total_bytes: u64, bar: Option<ProgressBar>) -> (Self, TransferReporter) {
        if let Some(pb) = &bar {
            pb.set_length(total_bytes);
            pb.set_position(0);
        }

        let (state, _) = watch::channel(TransferState::Submitted);
        let shared = Arc::new(Shared {
            total: AtomicU64::new(total_bytes),
            transferred: AtomicU64::new(0),
            state,
            cancel: CancellationToken::new(),
            bar,
        });

        let tracker = TaskTracker::new();
        tracker.close();

        let reporter = TransferReporter {
            shared: Arc::clone(&shared),
        };
        let transfer = Self {
            shared,
            tracker,
            task: None,
        };
        (transfer, reporter)
    }

    /// Run `work` on the tokio runtime and return its handle
    pub fn spawn<F, Fut>(total_bytes: u64, bar: Option<ProgressBar>, work: F) -> Self
    where
        F: FnOnce(TransferReporter) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (mut transfer, reporter) = Self::new(total_bytes, bar);
        let handle = transfer.tracker.spawn(work(reporter));
        transfer.task = Some(handle.abort_handle());
        transfer
    }

    pub fn total_bytes(&self) -> u64 {
        self.shared.total.load(Ordering::Relaxed)
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.shared.transferred.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> TransferState {
        *self.shared.state.borrow()
    }

    pub fn outcome(&self) -> TransferOutcome {
        TransferOutcome {
            bytes_total: self.total_bytes(),
            bytes_transferred: self.bytes_transferred(),
            state: self.state(),
        }
    }

    /// Block until the transfer reaches a terminal state or `interrupt` resolves
    ///
    /// An interrupted wait cancels the transfer and returns once the work has
    /// stopped; it is not resumed.
    pub async fn wait_for_completion<F>(&self, interrupt: F) -> Result<TransferState, Interrupted>
    where
        F: Future<Output = ()>,
    {
        let mut rx = self.shared.state.subscribe();
        let terminal = async move {
            loop {
                let state = *rx.borrow_and_update();
                if state.is_terminal() {
                    return state;
                }
                if rx.changed().await.is_err() {
                    return TransferState::Failed;
                }
            }
        };

        tokio::select! {
            biased;
            state = terminal => Ok(state),
            _ = interrupt => {
                self.cancel().await;
                Err(Interrupted)
            }
        }
    }

    /// Stop the transfer; objects already written stay in the bucket
    ///
    /// The work sees the request through [`TransferReporter::canceled`] and may
    /// clean up (abort a multipart upload) for up to `CANCEL_GRACE` before its
    /// task is aborted.
    pub async fn cancel(&self) {
        self.shared.advance(TransferState::Canceled);
        self.shared.cancel.cancel();

        if tokio::time::timeout(CANCEL_GRACE, self.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                "Transfer did not stop within {}s, aborting it",
                CANCEL_GRACE.as_secs()
            );
            if let Some(task) = &self.task {
                task.abort();
            }
        }

        if let Some(pb) = &self.shared.bar {
            pb.abandon();
        }
    }
}

/// Write side of a [`Transfer`]
///
/// Dropping the last reporter before calling [`TransferReporter::finish`]
/// marks the transfer as failed.
pub struct TransferReporter {
    shared: Arc<Shared>,
}

impl TransferReporter {
    pub fn start(&self) {
        self.shared.advance(TransferState::InProgress);
    }

    /// Whether the handle asked the transfer to stop
    pub fn is_canceled(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Resolves once the handle asks the transfer to stop
    pub fn canceled(&self) -> WaitForCancellationFuture<'_> {
        self.shared.cancel.cancelled()
    }

    pub fn add_bytes(&self, bytes: u64) {
        self.shared.transferred.fetch_add(bytes, Ordering::Relaxed);
        if let Some(pb) = &self.shared.bar {
            pb.inc(bytes);
        }
    }

    pub fn finish(&self, state: TransferState) {
        self.shared.advance(state);
        if let Some(pb) = &self.shared.bar {
            if state == TransferState::Completed {
                pb.finish_and_clear();
            } else {
                pb.abandon();
            }
        }
    }
}

impl Drop for TransferReporter {
    fn drop(&mut self) {
        self.shared.advance(TransferState::Failed);
    }
}

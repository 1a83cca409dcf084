//! Queueing and execution of bulk operations.
//!
//! Each operation runs on its own task; operations may run concurrently,
//! but each source path is engaged by at most one operation at a time — a
//! conflicting operation queues behind the first and starts when the
//! engagement clears.

use std::{
    collections::VecDeque,
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::ops::{
    operation::{Operation, OperationOutcome, OperationProgress},
    prompt::PromptSink,
    worker::{run_operation, WorkerContext},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperationId(pub u64);

/// Caller's view of a queued or running operation.
pub struct OperationHandle {
    pub id: OperationId,
    pub cancel: CancellationToken,
    pub progress: watch::Receiver<OperationProgress>,
    outcome: oneshot::Receiver<OperationOutcome>,
}

impl OperationHandle {
    /// Wait for the operation to finish. A dropped worker counts as
    /// aborted.
    pub async fn wait(self) -> OperationOutcome {
        self.outcome.await.unwrap_or(OperationOutcome {
            aborted: true,
            ..Default::default()
        })
    }
}

struct Pending {
    id: OperationId,
    op: Operation,
    cancel: CancellationToken,
    progress_tx: watch::Sender<OperationProgress>,
    outcome_tx: oneshot::Sender<OperationOutcome>,
}

#[derive(Default)]
struct SchedState {
    engaged: FxHashSet<PathBuf>,
    waiting: VecDeque<Pending>,
}

struct Shared {
    prompts: Arc<dyn PromptSink>,
    critical: CancellationToken,
    state: Mutex<SchedState>,
    next_id: AtomicU64,
}

pub struct OperationScheduler {
    shared: Arc<Shared>,
}

fn conflicts(op: &Operation, engaged: &FxHashSet<PathBuf>) -> bool {
    op.sources.iter().any(|s| engaged.contains(s))
}

impl OperationScheduler {
    pub fn new(prompts: Arc<dyn PromptSink>, critical: CancellationToken) -> Self {
        Self {
            shared: Arc::new(Shared {
                prompts,
                critical,
                state: Mutex::new(SchedState::default()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Queue an operation. It starts immediately unless one of its sources
    /// is engaged by a running operation.
    pub fn enqueue(&self, op: Operation) -> OperationHandle {
        let id = OperationId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let cancel = CancellationToken::new();
        let (progress_tx, progress_rx) = watch::channel(OperationProgress::default());
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let pending = Pending {
            id,
            op,
            cancel: cancel.clone(),
            progress_tx,
            outcome_tx,
        };

        let start_now = {
            let mut state = self.shared.state.lock();
            if conflicts(&pending.op, &state.engaged) {
                debug!(id = ?id, "operation queued behind an engaged source");
                state.waiting.push_back(pending);
                None
            } else {
                for s in &pending.op.sources {
                    state.engaged.insert(s.clone());
                }
                Some(pending)
            }
        };
        if let Some(pending) = start_now {
            tokio::spawn(drive(Arc::clone(&self.shared), pending));
        }

        OperationHandle {
            id,
            cancel,
            progress: progress_rx,
            outcome: outcome_rx,
        }
    }

    /// Number of operations currently waiting behind engagements.
    pub fn waiting_len(&self) -> usize {
        self.shared.state.lock().waiting.len()
    }

    /// Critical shutdown: cancel everything; queued operations resolve as
    /// aborted without starting.
    pub fn critical_shutdown(&self) {
        info!("operation scheduler entering critical shutdown");
        self.shared.critical.cancel();
        let drained: Vec<Pending> = {
            let mut state = self.shared.state.lock();
            state.waiting.drain(..).collect()
        };
        for pending in drained {
            let _ = pending.outcome_tx.send(OperationOutcome {
                aborted: true,
                ..Default::default()
            });
        }
    }
}

/// Run one operation, then release its engagements and start every queued
/// operation that no longer conflicts. Boxed so the hand-off can recurse.
fn drive(shared: Arc<Shared>, pending: Pending) -> BoxFuture<'static, ()> {
    async move {
        let Pending {
            id,
            op,
            cancel,
            progress_tx,
            outcome_tx,
        } = pending;
        debug!(id = ?id, kind = ?op.kind, sources = op.sources.len(), "operation starting");

        let outcome = run_operation(
            op.clone(),
            WorkerContext {
                prompts: Arc::clone(&shared.prompts),
                cancel,
                critical: shared.critical.clone(),
                progress: progress_tx,
            },
        )
        .await;
        let _ = outcome_tx.send(outcome);

        let ready: Vec<Pending> = {
            let mut state = shared.state.lock();
            for s in &op.sources {
                state.engaged.remove(s);
            }
            let mut ready = Vec::new();
            let mut i = 0;
            while i < state.waiting.len() {
                if conflicts(&state.waiting[i].op, &state.engaged) {
                    i += 1;
                    continue;
                }
                let next = state.waiting.remove(i).expect("index in bounds");
                for s in &next.op.sources {
                    state.engaged.insert(s.clone());
                }
                ready.push(next);
            }
            ready
        };
        for next in ready {
            tokio::spawn(drive(Arc::clone(&shared), next));
        }
    }
    .boxed()
}

// Async execution boundary.
//
// The host's per-tick loop must never block on storage or economy I/O, and
// shared state (the ownership cache) must only ever be mutated from the
// host's own execution context. Operations therefore run on a bounded worker
// pool, and each finished operation hands back a completion closure that the
// host runs when it drains the completion queue. Outcome delivery lives
// inside that closure too, so a caller can never observe an outcome before
// the cache mutation it belongs to.
//
// Submissions beyond the queue capacity are rejected immediately rather than
// queued without bound, which keeps worst-case latency flat under load.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};

type Completion = Box<dyn FnOnce() + Send>;
type Job = Pin<Box<dyn Future<Output = Completion> + Send>>;

enum WorkItem {
    Run(Job),
    /// Queued behind pending work at shutdown; consumes one worker.
    Exit,
}

/// Why a submission was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    /// The bounded queue is full.
    QueueFull,
    /// Shutdown has begun; no new work is accepted.
    ShuttingDown,
}

/// Caller-side handle for a submitted operation. Resolves exactly once: to
/// the operation's outcome after the host ran its completion, or to the
/// fallback when the operation was rejected or abandoned at shutdown.
#[derive(Debug)]
pub struct OperationHandle<T> {
    rx: Option<oneshot::Receiver<T>>,
    fallback: T,
}

impl<T> OperationHandle<T> {
    /// A handle that is already resolved; used when the boundary refuses
    /// work.
    pub fn ready(value: T) -> Self {
        Self {
            rx: None,
            fallback: value,
        }
    }

    pub async fn outcome(self) -> T {
        match self.rx {
            Some(rx) => rx.await.unwrap_or(self.fallback),
            None => self.fallback,
        }
    }
}

pub struct Dispatcher {
    job_tx: mpsc::Sender<WorkItem>,
    completion_rx: Mutex<mpsc::UnboundedReceiver<Completion>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    accepting: AtomicBool,
}

impl Dispatcher {
    pub fn new(workers: usize, queue_capacity: usize) -> Self {
        let (job_tx, job_rx) = mpsc::channel::<WorkItem>(queue_capacity.max(1));
        let (completion_tx, completion_rx) = mpsc::unbounded_channel::<Completion>();

        let job_rx = Arc::new(Mutex::new(job_rx));
        let mut handles = Vec::with_capacity(workers.max(1));
        for _ in 0..workers.max(1) {
            let job_rx = Arc::clone(&job_rx);
            let completion_tx = completion_tx.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let item = { job_rx.lock().await.recv().await };
                    match item {
                        Some(WorkItem::Run(job)) => {
                            let completion = job.await;
                            // A closed completion channel means the boundary
                            // is gone; the outcome is abandoned with it.
                            let _ = completion_tx.send(completion);
                        }
                        Some(WorkItem::Exit) | None => break,
                    }
                }
            }));
        }

        Self {
            job_tx,
            completion_rx: Mutex::new(completion_rx),
            workers: Mutex::new(handles),
            accepting: AtomicBool::new(true),
        }
    }

    /// Submits an operation. The operation future runs on a worker; `apply`
    /// runs later on the host context, right before the handle resolves to
    /// the operation's outcome.
    pub fn try_submit<T, U, F, A>(
        &self,
        operation: F,
        apply: A,
        fallback: T,
    ) -> Result<OperationHandle<T>, SubmitError>
    where
        T: Send + 'static,
        U: Send + 'static,
        F: Future<Output = (T, U)> + Send + 'static,
        A: FnOnce(U) + Send + 'static,
    {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(SubmitError::ShuttingDown);
        }

        let (tx, rx) = oneshot::channel();
        let job: Job = Box::pin(async move {
            let (outcome, side_effect) = operation.await;
            let completion: Completion = Box::new(move || {
                apply(side_effect);
                let _ = tx.send(outcome);
            });
            completion
        });

        match self.job_tx.try_send(WorkItem::Run(job)) {
            Ok(()) => Ok(OperationHandle {
                rx: Some(rx),
                fallback,
            }),
            Err(mpsc::error::TrySendError::Full(_)) => Err(SubmitError::QueueFull),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SubmitError::ShuttingDown),
        }
    }

    /// Runs every queued completion. The host calls this once per tick; it
    /// never blocks.
    pub fn drain_completions(&self) -> usize {
        let Ok(mut rx) = self.completion_rx.try_lock() else {
            // A dedicated completion loop already owns the queue.
            return 0;
        };

        let mut ran = 0;
        while let Ok(completion) = rx.try_recv() {
            completion();
            ran += 1;
        }
        ran
    }

    /// Awaits and runs completions until the workers are gone. For hosts
    /// (and tests) that dedicate a task to the boundary instead of draining
    /// per tick.
    pub async fn run_completion_loop(&self) {
        let mut rx = self.completion_rx.lock().await;
        while let Some(completion) = rx.recv().await {
            completion();
        }
    }

    /// Stops intake, drains queued work, and waits for in-flight operations.
    /// Whatever still runs at the deadline is aborted and logged; abandoned
    /// handles resolve to their fallback outcome.
    pub async fn shutdown(&self, drain_timeout: Duration) {
        self.accepting.store(false, Ordering::SeqCst);

        let drained = timeout(drain_timeout, async {
            let worker_count = { self.workers.lock().await.len() };
            for _ in 0..worker_count {
                if self.job_tx.send(WorkItem::Exit).await.is_err() {
                    break;
                }
            }
            let mut workers = self.workers.lock().await;
            for handle in workers.iter_mut() {
                let _ = handle.await;
            }
        })
        .await;

        let mut workers = self.workers.lock().await;
        if drained.is_err() {
            let abandoned = workers.iter().filter(|h| !h.is_finished()).count();
            for handle in workers.iter() {
                handle.abort();
            }
            tracing::warn!(
                abandoned,
                "async boundary drain timed out; abandoning in-flight operations"
            );
        }
        workers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI64;

    fn spawn_pump(dispatcher: &Arc<Dispatcher>) -> JoinHandle<()> {
        let dispatcher = Arc::clone(dispatcher);
        tokio::spawn(async move { dispatcher.run_completion_loop().await })
    }

    #[tokio::test]
    async fn test_apply_runs_only_on_drain() {
        let dispatcher = Dispatcher::new(2, 16);
        let applied = Arc::new(AtomicI64::new(0));

        let handle = {
            let applied = Arc::clone(&applied);
            dispatcher
                .try_submit(
                    async move { (42i64, 7i64) },
                    move |side_effect| {
                        applied.store(side_effect, Ordering::SeqCst);
                    },
                    -1i64,
                )
                .unwrap()
        };

        // The worker finishes the operation, but nothing is applied until
        // the host drains.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(applied.load(Ordering::SeqCst), 0);

        assert_eq!(dispatcher.drain_completions(), 1);
        assert_eq!(applied.load(Ordering::SeqCst), 7);
        assert_eq!(handle.outcome().await, 42);
    }

    #[tokio::test]
    async fn test_queue_overflow_rejects_immediately() {
        let dispatcher = Arc::new(Dispatcher::new(1, 1));
        let (started_tx, started_rx) = oneshot::channel::<()>();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        // Occupies the single worker until released.
        let blocker = dispatcher
            .try_submit(
                async move {
                    let _ = started_tx.send(());
                    let _ = release_rx.await;
                    (1i64, ())
                },
                |_| {},
                -1i64,
            )
            .unwrap();
        started_rx.await.unwrap();

        // Fills the single queue slot.
        let queued = dispatcher
            .try_submit(async move { (2i64, ()) }, |_| {}, -1i64)
            .unwrap();

        // No capacity left: rejected now, not queued.
        let rejected = dispatcher.try_submit(async move { (3i64, ()) }, |_| {}, -1i64);
        assert_eq!(rejected.unwrap_err(), SubmitError::QueueFull);

        let pump = spawn_pump(&dispatcher);
        release_tx.send(()).unwrap();
        assert_eq!(blocker.outcome().await, 1);
        assert_eq!(queued.outcome().await, 2);

        dispatcher.shutdown(Duration::from_secs(1)).await;
        pump.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_drains_queued_work() {
        let dispatcher = Arc::new(Dispatcher::new(2, 16));
        let pump = spawn_pump(&dispatcher);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                dispatcher
                    .try_submit(async move { (i, ()) }, |_| {}, -1i64)
                    .unwrap()
            })
            .collect();

        dispatcher.shutdown(Duration::from_secs(1)).await;

        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.outcome().await, i as i64);
        }

        // New work is refused after shutdown.
        let refused = dispatcher.try_submit(async move { (0i64, ()) }, |_| {}, -1i64);
        assert_eq!(refused.unwrap_err(), SubmitError::ShuttingDown);
        pump.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_abandons_stuck_work() {
        let dispatcher = Dispatcher::new(1, 4);

        let stuck = dispatcher
            .try_submit(
                async move {
                    std::future::pending::<()>().await;
                    (1i64, ())
                },
                |_| {},
                -1i64,
            )
            .unwrap();

        dispatcher.shutdown(Duration::from_millis(50)).await;
        dispatcher.drain_completions();

        // The abandoned operation resolves to its fallback, never hangs.
        assert_eq!(stuck.outcome().await, -1);
    }
}

//! Single in-flight execution with a bounded backlog (spec.md §5: a queue
//! depth over 10 is rejected with 503 rather than accepted and stalled).

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;

pub const MAX_QUEUE_DEPTH: usize = 10;

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

#[derive(Clone)]
pub struct ExecutionQueue {
    tx: mpsc::Sender<Job>,
}

impl ExecutionQueue {
    /// Spawns the worker that drains the queue one job at a time.
    pub fn start() -> Self {
        let (tx, mut rx) = mpsc::channel::<Job>(MAX_QUEUE_DEPTH);
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job.await;
            }
        });
        Self { tx }
    }

    /// Returns `false` if the backlog is already at [`MAX_QUEUE_DEPTH`].
    pub fn try_enqueue(&self, job: impl Future<Output = ()> + Send + 'static) -> bool {
        self.tx.try_send(Box::pin(job)).is_ok()
    }
}

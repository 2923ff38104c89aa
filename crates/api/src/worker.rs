use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info};

type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Stage work runs in the background on a bounded pool; a full queue
/// rejects the trigger instead of queueing unboundedly. Status reads
/// always go to the job store, never to these tasks.
pub struct WorkerPool {
    tx: mpsc::Sender<Task>,
}

#[derive(Debug, thiserror::Error)]
#[error("worker queue is full")]
pub struct QueueFull;

impl WorkerPool {
    pub fn new(workers: usize, queue_depth: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Task>(queue_depth.max(1));
        let rx = Arc::new(Mutex::new(rx));

        for worker_id in 0..workers.max(1) {
            let rx = rx.clone();
            tokio::spawn(async move {
                loop {
                    let task = { rx.lock().await.recv().await };
                    match task {
                        Some(task) => {
                            debug!(worker_id, "Worker picked up task");
                            task.await;
                        }
                        None => break,
                    }
                }
                info!(worker_id, "Worker shutting down");
            });
        }

        Self { tx }
    }

    pub fn try_submit(
        &self,
        task: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), QueueFull> {
        self.tx.try_send(Box::pin(task)).map_err(|_| QueueFull)
    }
}

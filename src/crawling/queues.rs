//! # Crawl Queues
//!
//! Priority-ordered, concurrency-bounded job queues. A queue runs its pending
//! jobs in batches: it takes up to `concurrency` jobs, runs them together,
//! waits for the whole batch, then takes the next batch. A slow job therefore
//! holds the batch open even after its batch-mates have finished.
//!
//! Queues are plain owned values; a [`CrawlScheduler`] owns the chapter queue
//! and the image queue of one pipeline instance.

use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, error, warn};

use crate::crawling::tasks::TaskId;
use crate::infrastructure::config::QueueConfig;

/// Priority used when the caller has no preference. Lower runs first.
pub const DEFAULT_PRIORITY: i64 = 0;

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueError {
    #[error("task {task_id} on the {queue} queue ended without a result (panicked)")]
    TaskDropped { queue: String, task_id: TaskId },
}

/// Point-in-time view of one queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub name: String,
    pub pending: usize,
    pub in_flight: usize,
    pub concurrency: usize,
    pub in_flight_ids: Vec<TaskId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub chapter: QueueStatus,
    pub image: QueueStatus,
}

struct PendingTask {
    id: TaskId,
    priority: i64,
    seq: u64,
    job: BoxFuture<'static, ()>,
}

#[derive(Default)]
struct QueueState {
    pending: Vec<PendingTask>,
    in_flight: Vec<TaskId>,
    draining: bool,
    next_seq: u64,
}

struct QueueInner {
    name: String,
    concurrency: usize,
    state: Mutex<QueueState>,
}

/// Batch-draining priority queue. Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct CrawlQueue {
    inner: Arc<QueueInner>,
}

impl fmt::Debug for CrawlQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrawlQueue")
            .field("name", &self.inner.name)
            .field("concurrency", &self.inner.concurrency)
            .finish_non_exhaustive()
    }
}

impl CrawlQueue {
    /// Concurrency below 1 is raised to 1.
    #[must_use]
    pub fn new(name: impl Into<String>, concurrency: usize) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                name: name.into(),
                concurrency: concurrency.max(1),
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn concurrency(&self) -> usize {
        self.inner.concurrency
    }

    /// Queue `task` and wait for its own result.
    ///
    /// The result arrives as soon as this task finishes, even while the rest
    /// of its batch is still running. A failed task is logged here as well as
    /// returned; a panicking task surfaces as [`QueueError::TaskDropped`].
    pub async fn submit<T, E, F>(&self, id: impl Into<TaskId>, priority: i64, task: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: From<QueueError> + fmt::Display + Send + 'static,
    {
        let id = id.into();
        let (result_tx, result_rx) = oneshot::channel();

        let label = id.clone();
        let queue_name = self.inner.name.clone();
        let job = async move {
            let result = task.await;
            if let Err(e) = &result {
                warn!("⚠️ Task {} on {} queue failed: {}", label, queue_name, e);
            }
            // The submitter may have stopped waiting; nothing else to do then.
            let _ = result_tx.send(result);
        }
        .boxed();

        self.enqueue(id.clone(), priority, job).await;

        match result_rx.await {
            Ok(result) => result,
            Err(_) => Err(E::from(QueueError::TaskDropped {
                queue: self.inner.name.clone(),
                task_id: id,
            })),
        }
    }

    async fn enqueue(&self, id: TaskId, priority: i64, job: BoxFuture<'static, ()>) {
        let start_drain = {
            let mut state = self.inner.state.lock().await;
            let seq = state.next_seq;
            state.next_seq += 1;
            state.pending.push(PendingTask { id, priority, seq, job });
            state.pending.sort_by_key(|task| (task.priority, task.seq));

            if state.draining {
                false
            } else {
                state.draining = true;
                true
            }
        };

        if start_drain {
            tokio::spawn(Self::drain(Arc::clone(&self.inner)));
        }
    }

    async fn drain(inner: Arc<QueueInner>) {
        loop {
            let batch = {
                let mut state = inner.state.lock().await;
                if state.pending.is_empty() {
                    state.draining = false;
                    state.in_flight.clear();
                    return;
                }
                let take = inner.concurrency.min(state.pending.len());
                let batch: Vec<PendingTask> = state.pending.drain(..take).collect();
                state.in_flight = batch.iter().map(|task| task.id.clone()).collect();
                batch
            };

            debug!("{} queue: running batch of {}", inner.name, batch.len());

            let (ids, jobs): (Vec<TaskId>, Vec<_>) = batch
                .into_iter()
                .map(|task| (task.id, AssertUnwindSafe(task.job).catch_unwind()))
                .unzip();

            for (id, outcome) in ids.iter().zip(join_all(jobs).await) {
                if outcome.is_err() {
                    error!("❌ Task {} on {} queue panicked", id, inner.name);
                }
            }

            inner.state.lock().await.in_flight.clear();
        }
    }

    pub async fn status(&self) -> QueueStatus {
        let state = self.inner.state.lock().await;
        QueueStatus {
            name: self.inner.name.clone(),
            pending: state.pending.len(),
            in_flight: state.in_flight.len(),
            concurrency: self.inner.concurrency,
            in_flight_ids: state.in_flight.clone(),
        }
    }
}

/// The two independent queues of one ingestion pipeline.
#[derive(Debug, Clone)]
pub struct CrawlScheduler {
    pub chapter: CrawlQueue,
    pub image: CrawlQueue,
}

impl CrawlScheduler {
    #[must_use]
    pub fn new(chapter_concurrency: usize, image_concurrency: usize) -> Self {
        Self {
            chapter: CrawlQueue::new("chapter", chapter_concurrency),
            image: CrawlQueue::new("image", image_concurrency),
        }
    }

    #[must_use]
    pub fn from_config(config: &QueueConfig) -> Self {
        Self::new(config.chapter_concurrency, config.image_concurrency)
    }

    pub async fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            chapter: self.chapter.status().await,
            image: self.image.status().await,
        }
    }
}

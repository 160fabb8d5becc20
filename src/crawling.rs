//! # Crawl scheduling
//!
//! Owned, priority-ordered job queues that bound how many chapter and image
//! jobs run at once.

pub mod queues;
pub mod tasks;

pub use queues::{CrawlQueue, CrawlScheduler, DEFAULT_PRIORITY, QueueError, QueueStatus, SchedulerStatus};
pub use tasks::TaskId;

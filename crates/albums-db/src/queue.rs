//! The database access queue
//!
//! Single choke point in front of the database. Every read and write is
//! submitted as a task; with the default concurrency of 1 tasks execute
//! strictly in submission order, which is what a single-writer SQLite
//! store needs. Concurrency above 1 is honored but carries no ordering
//! guarantee.
//!
//! Each task gets its own timeout; a timed-out task fails alone and the
//! queue keeps serving. `pause`/`start` gate dispatch, `clear` drops
//! queued (not running) tasks, and `on_idle` awaits full drain.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{Notify, oneshot};
use tracing::{debug, trace};

use crate::error::DbError;

/// Configuration for [`DbQueue`]
#[derive(Debug, Clone)]
pub struct DbQueueConfig {
    /// Tasks allowed to run at once. 1 preserves submission order.
    pub concurrency: usize,
    /// Maximum queued (not yet running) tasks; `None` is unbounded
    pub capacity: Option<usize>,
    /// When full: reject with `QueueFull` instead of blocking the caller
    pub reject_when_full: bool,
    /// Per-task execution timeout
    pub task_timeout: Duration,
}

impl Default for DbQueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            capacity: None,
            reject_when_full: false,
            task_timeout: Duration::from_secs(60),
        }
    }
}

type QueuedTask = BoxFuture<'static, ()>;

struct Inner {
    config: DbQueueConfig,
    queued: Mutex<VecDeque<QueuedTask>>,
    running: AtomicUsize,
    paused: AtomicBool,
    /// Signals possible idleness to `on_idle` waiters
    idle: Notify,
    /// Signals freed queue space to blocked submitters
    space: Notify,
}

impl Inner {
    /// Move tasks from the queue onto the runtime while slots are free.
    fn dispatch(self: &Arc<Self>) {
        loop {
            if self.paused.load(Ordering::Acquire) {
                return;
            }

            let task = {
                let mut queued = self.queued.lock().expect("queue lock");
                if self.running.load(Ordering::Acquire) >= self.config.concurrency {
                    return;
                }
                match queued.pop_front() {
                    Some(task) => {
                        self.running.fetch_add(1, Ordering::AcqRel);
                        task
                    }
                    None => return,
                }
            };

            self.space.notify_one();

            let inner = Arc::clone(self);
            tokio::spawn(async move {
                task.await;
                inner.running.fetch_sub(1, Ordering::AcqRel);
                if inner.is_idle() {
                    inner.idle.notify_waiters();
                }
                inner.dispatch();
            });
        }
    }

    fn is_idle(&self) -> bool {
        self.running.load(Ordering::Acquire) == 0
            && self.queued.lock().expect("queue lock").is_empty()
    }
}

/// Serializing task queue in front of the database
#[derive(Clone)]
pub struct DbQueue {
    inner: Arc<Inner>,
}

impl DbQueue {
    /// Create a queue with the given configuration
    pub fn new(config: DbQueueConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                queued: Mutex::new(VecDeque::new()),
                running: AtomicUsize::new(0),
                paused: AtomicBool::new(false),
                idle: Notify::new(),
                space: Notify::new(),
            }),
        }
    }

    /// Submit a task and await its result.
    ///
    /// The closure is not called until the task is dispatched, and the
    /// timeout covers execution only, never queue wait. A task dropped
    /// by [`clear`](Self::clear) resolves with [`DbError::QueueCleared`].
    pub async fn add<T, F, Fut>(&self, make: F) -> Result<T, DbError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, DbError>> + Send + 'static,
        T: Send + 'static,
    {
        if let Some(capacity) = self.inner.config.capacity {
            loop {
                let notified = self.inner.space.notified();
                tokio::pin!(notified);
                // Register before checking so a concurrent notify_one
                // between check and await is not lost.
                notified.as_mut().enable();
                if self.inner.queued.lock().expect("queue lock").len() < capacity {
                    break;
                }
                if self.inner.config.reject_when_full {
                    trace!(capacity, "Rejecting task, queue full");
                    return Err(DbError::QueueFull { capacity });
                }
                notified.await;
            }
        }

        let (tx, rx) = oneshot::channel();
        let timeout = self.inner.config.task_timeout;
        let task: QueuedTask = Box::pin(async move {
            let result = match tokio::time::timeout(timeout, make()).await {
                Ok(result) => result,
                Err(_) => Err(DbError::TaskTimeout { timeout }),
            };
            let _ = tx.send(result);
        });

        self.inner.queued.lock().expect("queue lock").push_back(task);
        self.inner.dispatch();

        rx.await.map_err(|_| DbError::QueueCleared)?
    }

    /// Tasks waiting to run
    pub fn size(&self) -> usize {
        self.inner.queued.lock().expect("queue lock").len()
    }

    /// Tasks currently running
    pub fn pending(&self) -> usize {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Whether nothing is queued or running
    pub fn is_idle(&self) -> bool {
        self.inner.is_idle()
    }

    /// Wait until the queue is fully drained
    pub async fn on_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.inner.is_idle() {
                return;
            }
            notified.await;
        }
    }

    /// Stop dispatching queued tasks. Running tasks finish normally.
    pub fn pause(&self) {
        self.inner.paused.store(true, Ordering::Release);
        debug!("Queue paused");
    }

    /// Resume dispatching
    pub fn start(&self) {
        self.inner.paused.store(false, Ordering::Release);
        debug!("Queue started");
        self.inner.dispatch();
    }

    /// Drop every queued task, resolving each submitter with
    /// [`DbError::QueueCleared`]. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let dropped: Vec<QueuedTask> = {
            let mut queued = self.inner.queued.lock().expect("queue lock");
            queued.drain(..).collect()
        };
        // notify_one stores a permit, so a submitter blocked between its
        // capacity check and its await still sees the freed space.
        self.inner.space.notify_one();
        if self.inner.is_idle() {
            self.inner.idle.notify_waiters();
        }
        debug!(dropped = dropped.len(), "Queue cleared");
        dropped.len()
    }
}

impl Default for DbQueue {
    fn default() -> Self {
        Self::new(DbQueueConfig::default())
    }
}

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

/// One entry on the shared task queue.
///
/// `Stop` sentinels are enqueued once per worker so each worker exits
/// exactly once after the backlog drains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkItem<T> {
    Task(T),
    Stop,
}

/// Unbounded multi-consumer FIFO shared between the supervisor and all
/// workers.
///
/// Supports the two access patterns the engine needs: an async blocking
/// `pop` for workers and a non-blocking `len` for the supervisor's
/// backlog check. First available worker wins; consumption order across
/// workers is unspecified.
pub struct TaskQueue<T> {
    inner: Arc<QueueInner<T>>,
}

struct QueueInner<T> {
    items: Mutex<VecDeque<WorkItem<T>>>,
    notify: Notify,
}

impl<T> Clone for TaskQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TaskQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(QueueInner {
                items: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
            }),
        }
    }

    pub fn push(&self, task: T) {
        self.push_item(WorkItem::Task(task));
    }

    pub fn push_stop(&self) {
        self.push_item(WorkItem::Stop);
    }

    fn push_item(&self, item: WorkItem<T>) {
        self.inner.items.lock().unwrap().push_back(item);
        self.inner.notify.notify_one();
    }

    /// Put a redelivered task at the front of the queue, ahead of any stop
    /// sentinels already enqueued behind the backlog.
    pub fn requeue(&self, task: T) {
        self.inner
            .items
            .lock()
            .unwrap()
            .push_front(WorkItem::Task(task));
        self.inner.notify.notify_one();
    }

    /// Pop the next item, waiting until one is available.
    pub async fn pop(&self) -> WorkItem<T> {
        loop {
            if let Some(item) = self.inner.items.lock().unwrap().pop_front() {
                return item;
            }
            self.inner.notify.notified().await;
        }
    }

    /// Remaining queue depth, stop sentinels included.
    pub fn len(&self) -> usize {
        self.inner.items.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

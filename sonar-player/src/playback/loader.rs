//! Bounded priority load queue
//!
//! Fetch+decode tasks are queued with a [`Priority`] and run on the tokio
//! runtime, at most `concurrency` at a time. Higher priorities start
//! first; equal priorities start in submission order. Callers await
//! [`LoadQueue::wait_idle`] to learn when everything submitted so far has
//! finished.

use crate::playback::types::Priority;
use futures::future::BoxFuture;
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, trace};

/// A unit of load work
pub type LoadTask = BoxFuture<'static, ()>;

struct QueuedTask {
    priority: Priority,
    seq: u64,
    task: LoadTask,
}

/// Max-heap order: higher priority first, then lower sequence number
impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedTask {}

#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<QueuedTask>,
    running: usize,
    next_seq: u64,
}

impl QueueState {
    fn outstanding(&self) -> usize {
        self.heap.len() + self.running
    }
}

struct Inner {
    state: Mutex<QueueState>,
    concurrency: usize,
    outstanding: watch::Sender<usize>,
    runtime: Handle,
}

/// Cloneable handle to a shared load queue
#[derive(Clone)]
pub struct LoadQueue {
    inner: Arc<Inner>,
}

/// Marks a running slot free when the task completes (or panics)
struct RunningSlot {
    queue: LoadQueue,
}

impl Drop for RunningSlot {
    fn drop(&mut self) {
        self.queue.finish_one();
    }
}

impl LoadQueue {
    /// Creates a queue spawning onto `runtime` with at most `concurrency`
    /// tasks in flight (minimum 1)
    pub fn new(concurrency: usize, runtime: Handle) -> Self {
        let (outstanding, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState::default()),
                concurrency: concurrency.max(1),
                outstanding,
                runtime,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &QueueState) {
        self.inner.outstanding.send_replace(state.outstanding());
    }

    /// Queues a batch of tasks at one priority
    pub fn submit<I>(&self, priority: Priority, tasks: I)
    where
        I: IntoIterator<Item = LoadTask>,
    {
        {
            let mut state = self.lock();
            let mut added = 0usize;
            for task in tasks {
                let seq = state.next_seq;
                state.next_seq += 1;
                state.heap.push(QueuedTask {
                    priority,
                    seq,
                    task,
                });
                added += 1;
            }
            debug!(
                "Queued {} load task(s) at {} priority ({} outstanding)",
                added,
                priority,
                state.outstanding()
            );
            self.publish(&state);
        }
        self.pump();
    }

    /// Starts queued tasks while slots are free
    fn pump(&self) {
        let ready = {
            let mut state = self.lock();
            let mut ready = Vec::new();
            while state.running < self.inner.concurrency {
                let Some(queued) = state.heap.pop() else {
                    break;
                };
                state.running += 1;
                ready.push(queued);
            }
            self.publish(&state);
            ready
        };

        // Spawned outside the lock: a slot dropped early re-enters the queue
        for queued in ready {
            trace!("Starting load task #{} at {} priority", queued.seq, queued.priority);
            let slot = RunningSlot {
                queue: self.clone(),
            };
            self.inner.runtime.spawn(async move {
                let _slot = slot;
                queued.task.await;
            });
        }
    }

    fn finish_one(&self) {
        {
            let mut state = self.lock();
            state.running = state.running.saturating_sub(1);
            self.publish(&state);
        }
        self.pump();
    }

    /// Drops every task that has not started yet
    ///
    /// Running tasks are left to complete.
    pub fn clear(&self) {
        let mut state = self.lock();
        let dropped = state.heap.len();
        state.heap.clear();
        if dropped > 0 {
            debug!("Dropped {} queued load task(s)", dropped);
        }
        self.publish(&state);
    }

    /// Resolves once no task is queued or running
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.outstanding.subscribe();
        // The sender lives as long as `self`, so this only ends on idle
        let _ = rx.wait_for(|outstanding| *outstanding == 0).await;
    }

    /// Queued plus running tasks
    pub fn outstanding(&self) -> usize {
        self.lock().outstanding()
    }

    pub fn running(&self) -> usize {
        self.lock().running
    }

    pub fn concurrency(&self) -> usize {
        self.inner.concurrency
    }
}

impl std::fmt::Debug for LoadQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("LoadQueue")
            .field("queued", &state.heap.len())
            .field("running", &state.running)
            .field("concurrency", &self.inner.concurrency)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn sleeper(
        ms: u64,
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        done: Arc<AtomicUsize>,
    ) -> LoadTask {
        async move {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            active.fetch_sub(1, Ordering::SeqCst);
            done.fetch_add(1, Ordering::SeqCst);
        }
        .boxed()
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let queue = LoadQueue::new(3, Handle::current());
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<LoadTask> = (0..8)
            .map(|_| sleeper(20, active.clone(), peak.clone(), done.clone()))
            .collect();
        queue.submit(Priority::Normal, tasks);
        queue.wait_idle().await;

        assert_eq!(done.load(Ordering::SeqCst), 8);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(queue.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_wait_idle_on_empty_queue_returns() {
        let queue = LoadQueue::new(2, Handle::current());
        tokio::time::timeout(Duration::from_secs(1), queue.wait_idle())
            .await
            .expect("idle queue must resolve immediately");
    }

    #[tokio::test]
    async fn test_higher_priority_starts_first() {
        let queue = LoadQueue::new(1, Handle::current());
        let order = Arc::new(Mutex::new(Vec::new()));

        // Occupy the single slot so later submissions queue up
        let gate = Arc::new(tokio::sync::Notify::new());
        let gate_task = {
            let gate = gate.clone();
            async move { gate.notified().await }.boxed()
        };
        queue.submit(Priority::High, vec![gate_task]);

        let record = |name: &'static str| -> LoadTask {
            let order = order.clone();
            async move { order.lock().unwrap().push(name) }.boxed()
        };
        queue.submit(Priority::Pending, vec![record("pending")]);
        queue.submit(Priority::Normal, vec![record("normal-1"), record("normal-2")]);
        queue.submit(Priority::Low, vec![record("low")]);

        gate.notify_one();
        queue.wait_idle().await;

        assert_eq!(
            *order.lock().unwrap(),
            vec!["normal-1", "normal-2", "low", "pending"]
        );
    }

    #[tokio::test]
    async fn test_clear_drops_queued_but_not_running() {
        let queue = LoadQueue::new(1, Handle::current());
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<LoadTask> = (0..4)
            .map(|_| sleeper(30, active.clone(), peak.clone(), done.clone()))
            .collect();
        queue.submit(Priority::High, tasks);
        assert_eq!(queue.running(), 1);

        queue.clear();
        queue.wait_idle().await;

        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panicking_task_frees_its_slot() {
        let queue = LoadQueue::new(1, Handle::current());
        let done = Arc::new(AtomicUsize::new(0));

        let boom: LoadTask = async { panic!("decoder blew up") }.boxed();
        let ok: LoadTask = {
            let done = done.clone();
            async move {
                done.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        };
        queue.submit(Priority::High, vec![boom, ok]);

        tokio::time::timeout(Duration::from_secs(2), queue.wait_idle())
            .await
            .expect("queue must drain after a panic");
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }
}

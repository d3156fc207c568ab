//! Generic goal-state engine.
//!
//! A delay-ordered queue of entities drained by a pool of workers. Each
//! entity resolves its own current/goal state and action when run; the
//! engine only owns scheduling:
//!
//! - `enqueue` is idempotent; a second enqueue keeps the earlier deadline
//! - two executions for the same entity key never overlap
//! - transient action errors re-enqueue with exponential backoff up to a
//!   ceiling; fatal errors drop the entity
//! - an entity that reports itself gone is silently removed

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// What an action asks the engine to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    /// Run again after the given delay.
    Requeue(Duration),
    /// Nothing left to do; drop the entity from the queue.
    Done,
}

/// Action failure kinds.
#[derive(Debug, Error)]
pub enum ActionError {
    /// Worth retrying with backoff (store timeout, peer unavailable).
    #[error("transient: {0}")]
    Transient(String),

    /// Not retryable (corrupt state); the entity is dropped and operator
    /// tooling re-injects via recovery.
    #[error("fatal: {0}")]
    Fatal(String),
}

/// A queue element: resolves its states and runs the due action.
#[async_trait]
pub trait Entity: Send + Sync + 'static {
    /// Stable key; two enqueues with the same key coalesce.
    fn key(&self) -> String;

    /// Runs the action for the entity's current (state, goal state) pair.
    async fn run(&self) -> Result<ActionOutcome, ActionError>;
}

/// Engine tuning.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Parallel workers draining the queue.
    pub workers: usize,

    /// First retry delay after a transient failure.
    pub base_backoff: Duration,

    /// Retry delay ceiling.
    pub max_backoff: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(60),
        }
    }
}

#[derive(PartialEq, Eq)]
struct HeapEntry {
    deadline: Instant,
    seq: u64,
    key: String,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.deadline, self.seq).cmp(&(other.deadline, other.seq))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

struct Item {
    entity: Arc<dyn Entity>,
    deadline: Instant,
    attempts: u32,
    /// Deadline requested while the entity was running.
    pending: Option<Instant>,
}

#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<Reverse<HeapEntry>>,
    items: HashMap<String, Item>,
    running: HashSet<String>,
    seq: u64,
}

enum Next {
    Due(String, Arc<dyn Entity>, u32),
    WaitUntil(Instant),
    Idle,
}

struct EngineInner {
    config: EngineConfig,
    queue: Mutex<QueueState>,
    notify: Notify,
}

/// The timer-driven entity queue.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                config,
                queue: Mutex::new(QueueState::default()),
                notify: Notify::new(),
            }),
        }
    }

    /// Starts the worker pool; workers exit when `shutdown` flips true.
    pub fn start(&self, shutdown: watch::Receiver<bool>) -> Vec<tokio::task::JoinHandle<()>> {
        info!(workers = self.inner.config.workers, "Starting goal-state engine");
        (0..self.inner.config.workers)
            .map(|_| {
                let inner = Arc::clone(&self.inner);
                let shutdown = shutdown.clone();
                tokio::spawn(worker_loop(inner, shutdown))
            })
            .collect()
    }

    /// Schedules the entity to run after `delay`.
    ///
    /// Idempotent: re-enqueueing keeps the earlier of the two deadlines.
    /// Producers never block.
    pub fn enqueue(&self, entity: Arc<dyn Entity>, delay: Duration) {
        let deadline = Instant::now() + delay;
        let key = entity.key();
        let mut queue = self.inner.queue.lock().expect("engine lock poisoned");

        let is_running = queue.running.contains(&key);
        if let Some(item) = queue.items.get_mut(&key) {
            item.entity = entity;
            if is_running {
                item.pending = Some(match item.pending {
                    Some(existing) => existing.min(deadline),
                    None => deadline,
                });
                return;
            }
            if deadline >= item.deadline {
                return;
            }
            item.deadline = deadline;
        } else {
            queue.items.insert(
                key.clone(),
                Item {
                    entity,
                    deadline,
                    attempts: 0,
                    pending: None,
                },
            );
        }

        push_entry(&mut queue, key, deadline);
        drop(queue);
        self.inner.notify.notify_one();
    }

    /// Removes the entity from the queue; a running execution finishes.
    pub fn delete(&self, key: &str) {
        let mut queue = self.inner.queue.lock().expect("engine lock poisoned");
        queue.items.remove(key);
    }

    /// Number of queued (not running) entities.
    pub fn len(&self) -> usize {
        self.inner.queue.lock().expect("engine lock poisoned").items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn push_entry(queue: &mut QueueState, key: String, deadline: Instant) {
    queue.seq += 1;
    let seq = queue.seq;
    queue.heap.push(Reverse(HeapEntry { deadline, seq, key }));
}

fn next_due(inner: &EngineInner) -> Next {
    let mut queue = inner.queue.lock().expect("engine lock poisoned");
    let now = Instant::now();

    loop {
        let Some(Reverse(top)) = queue.heap.peek() else {
            return Next::Idle;
        };

        // Stale heap entries: the item was deleted or rescheduled.
        let valid = queue
            .items
            .get(&top.key)
            .is_some_and(|item| item.deadline == top.deadline);
        if !valid {
            // A running entity's pending deadline is re-pushed on finish.
            queue.heap.pop();
            continue;
        }

        if top.deadline > now {
            return Next::WaitUntil(top.deadline);
        }

        let Reverse(entry) = queue.heap.pop().expect("peeked entry");
        if queue.running.contains(&entry.key) {
            continue;
        }

        let item = queue.items.get(&entry.key).expect("validated above");
        let entity = Arc::clone(&item.entity);
        let attempts = item.attempts;
        queue.running.insert(entry.key.clone());
        return Next::Due(entry.key, entity, attempts);
    }
}

fn finish(inner: &EngineInner, key: &str, result: Result<ActionOutcome, ActionError>, attempts: u32) {
    let mut queue = inner.queue.lock().expect("engine lock poisoned");
    queue.running.remove(key);

    let Some(item) = queue.items.get_mut(key) else {
        return; // deleted while running
    };

    // An enqueue that arrived mid-run wins over the action's own verdict.
    if let Some(pending) = item.pending.take() {
        item.deadline = pending;
        item.attempts = 0;
        push_entry(&mut queue, key.to_string(), pending);
        drop(queue);
        inner.notify.notify_one();
        return;
    }

    match result {
        Ok(ActionOutcome::Requeue(delay)) => {
            let deadline = Instant::now() + delay;
            item.deadline = deadline;
            item.attempts = 0;
            push_entry(&mut queue, key.to_string(), deadline);
            drop(queue);
            inner.notify.notify_one();
        }
        Ok(ActionOutcome::Done) => {
            queue.items.remove(key);
        }
        Err(ActionError::Transient(reason)) => {
            let attempts = attempts.saturating_add(1);
            let backoff = transient_backoff(&inner.config, attempts);
            debug!(
                key,
                attempts,
                backoff_ms = backoff.as_millis() as u64,
                reason = %reason,
                "Transient action failure"
            );
            let deadline = Instant::now() + backoff;
            item.deadline = deadline;
            item.attempts = attempts;
            push_entry(&mut queue, key.to_string(), deadline);
            drop(queue);
            inner.notify.notify_one();
        }
        Err(ActionError::Fatal(reason)) => {
            error!(key, reason = %reason, "Fatal action failure, dropping entity");
            queue.items.remove(key);
        }
    }
}

fn transient_backoff(config: &EngineConfig, attempts: u32) -> Duration {
    let exp = attempts.min(16);
    let backoff = config
        .base_backoff
        .saturating_mul(1u32 << exp.min(31));
    backoff.min(config.max_backoff)
}

async fn worker_loop(inner: Arc<EngineInner>, mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        match next_due(&inner) {
            Next::Due(key, entity, attempts) => {
                let result = entity.run().await;
                if let Err(ActionError::Transient(ref reason)) = result {
                    warn!(key = %key, reason = %reason, "Action will retry");
                }
                finish(&inner, &key, result, attempts);
            }
            Next::WaitUntil(deadline) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {}
                    _ = inner.notify.notified() => {}
                    _ = shutdown.changed() => {}
                }
            }
            Next::Idle => {
                tokio::select! {
                    _ = inner.notify.notified() => {}
                    _ = shutdown.changed() => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingEntity {
        key: String,
        runs: Arc<AtomicU32>,
        outcome: fn(u32) -> Result<ActionOutcome, ActionError>,
    }

    #[async_trait]
    impl Entity for CountingEntity {
        fn key(&self) -> String {
            self.key.clone()
        }

        async fn run(&self) -> Result<ActionOutcome, ActionError> {
            let n = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
            (self.outcome)(n)
        }
    }

    fn engine() -> (Engine, watch::Sender<bool>) {
        let engine = Engine::new(EngineConfig {
            workers: 2,
            base_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(80),
        });
        let (tx, rx) = watch::channel(false);
        engine.start(rx);
        (engine, tx)
    }

    #[tokio::test]
    async fn test_runs_and_removes_done_entity() {
        let (engine, _tx) = engine();
        let runs = Arc::new(AtomicU32::new(0));
        engine.enqueue(
            Arc::new(CountingEntity {
                key: "e1".into(),
                runs: Arc::clone(&runs),
                outcome: |_| Ok(ActionOutcome::Done),
            }),
            Duration::from_millis(5),
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(engine.is_empty());
    }

    #[tokio::test]
    async fn test_requeue_runs_again() {
        let (engine, _tx) = engine();
        let runs = Arc::new(AtomicU32::new(0));
        engine.enqueue(
            Arc::new(CountingEntity {
                key: "e1".into(),
                runs: Arc::clone(&runs),
                outcome: |n| {
                    if n < 3 {
                        Ok(ActionOutcome::Requeue(Duration::from_millis(5)))
                    } else {
                        Ok(ActionOutcome::Done)
                    }
                },
            }),
            Duration::from_millis(1),
        );

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert!(engine.is_empty());
    }

    #[tokio::test]
    async fn test_transient_error_backs_off_then_succeeds() {
        let (engine, _tx) = engine();
        let runs = Arc::new(AtomicU32::new(0));
        engine.enqueue(
            Arc::new(CountingEntity {
                key: "flaky".into(),
                runs: Arc::clone(&runs),
                outcome: |n| {
                    if n < 3 {
                        Err(ActionError::Transient("store timeout".into()))
                    } else {
                        Ok(ActionOutcome::Done)
                    }
                },
            }),
            Duration::from_millis(1),
        );

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert!(engine.is_empty());
    }

    #[tokio::test]
    async fn test_fatal_error_drops_entity() {
        let (engine, _tx) = engine();
        let runs = Arc::new(AtomicU32::new(0));
        engine.enqueue(
            Arc::new(CountingEntity {
                key: "corrupt".into(),
                runs: Arc::clone(&runs),
                outcome: |_| Err(ActionError::Fatal("bad state".into())),
            }),
            Duration::from_millis(1),
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(engine.is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_keeps_earlier_deadline() {
        let (engine, _tx) = engine();
        let runs = Arc::new(AtomicU32::new(0));
        let entity = Arc::new(CountingEntity {
            key: "e1".into(),
            runs: Arc::clone(&runs),
            outcome: |_| Ok(ActionOutcome::Done),
        });

        engine.enqueue(Arc::clone(&entity) as Arc<dyn Entity>, Duration::from_secs(60));
        engine.enqueue(entity, Duration::from_millis(5));

        tokio::time::sleep(Duration::from_millis(100)).await;
        // The later deadline did not shadow the earlier one.
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    struct SlowEntity {
        key: String,
        concurrent: Arc<AtomicU32>,
        max_seen: Arc<AtomicU32>,
        runs: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Entity for SlowEntity {
        fn key(&self) -> String {
            self.key.clone()
        }

        async fn run(&self) -> Result<ActionOutcome, ActionError> {
            let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_seen.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.concurrent.fetch_sub(1, Ordering::SeqCst);
            let n = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Ok(ActionOutcome::Requeue(Duration::from_millis(1)))
            } else {
                Ok(ActionOutcome::Done)
            }
        }
    }

    #[tokio::test]
    async fn test_per_entity_serialization() {
        let (engine, _tx) = engine();
        let concurrent = Arc::new(AtomicU32::new(0));
        let max_seen = Arc::new(AtomicU32::new(0));
        let runs = Arc::new(AtomicU32::new(0));
        let entity = Arc::new(SlowEntity {
            key: "slow".into(),
            concurrent: Arc::clone(&concurrent),
            max_seen: Arc::clone(&max_seen),
            runs: Arc::clone(&runs),
        });

        // Hammer the same key; executions must never overlap.
        for _ in 0..5 {
            engine.enqueue(Arc::clone(&entity) as Arc<dyn Entity>, Duration::from_millis(1));
        }

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert!(runs.load(Ordering::SeqCst) >= 3);
    }
}

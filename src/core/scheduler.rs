//! Bounded-concurrency task scheduling
//!
//! Tasks are admitted in submission order by a single dispatch loop and run
//! on a worker pool, subject to:
//! - a weight budget (sum of running task costs never exceeds the cap)
//! - barriers (a barrier task runs alone, after everything submitted before it)
//! - drain-on-failure (after the first error, queued tasks are skipped)

use crate::error::{OverlaySyncError, Result};
use crossbeam::channel::{bounded, Receiver, Sender};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

/// Default concurrency cap for a sync session
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Default capacity of the pending queue before `schedule` applies backpressure
pub const DEFAULT_QUEUE_SIZE: usize = 100;

/// Body of a scheduled task
pub type TaskAction = Box<dyn FnOnce(&TaskHandle) -> Result<()> + Send + 'static>;

/// Identity of a running task, passed to its action
#[derive(Debug, Clone)]
pub struct TaskHandle {
    index: i64,
    name: String,
}

impl TaskHandle {
    /// Submission sequence number
    pub fn index(&self) -> i64 {
        self.index
    }

    /// Human-readable label
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A unit of work queued on the scheduler
pub struct Task {
    handle: TaskHandle,
    action: TaskAction,
    thread_cost: usize,
    is_barrier: bool,
}

impl Task {
    /// Submission sequence number
    pub fn index(&self) -> i64 {
        self.handle.index
    }

    /// Human-readable label
    pub fn name(&self) -> &str {
        &self.handle.name
    }

    /// Weight consumed from the concurrency budget while running
    pub fn thread_cost(&self) -> usize {
        self.thread_cost
    }

    /// Whether the task must run with nothing else active
    pub fn is_barrier(&self) -> bool {
        self.is_barrier
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("index", &self.handle.index)
            .field("name", &self.handle.name)
            .field("thread_cost", &self.thread_cost)
            .field("is_barrier", &self.is_barrier)
            .finish()
    }
}

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum summed weight of running tasks
    pub max_concurrency: usize,
    /// Pending queue capacity
    pub queue_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            queue_size: DEFAULT_QUEUE_SIZE,
        }
    }
}

/// Scheduler statistics
#[derive(Debug, Default)]
pub struct SchedulerStats {
    /// Tasks accepted into the queue (barriers included)
    pub tasks_submitted: AtomicU64,
    /// Tasks that ran and succeeded
    pub tasks_completed: AtomicU64,
    /// Tasks that ran and failed
    pub tasks_failed: AtomicU64,
    /// Tasks skipped because a failure was already recorded
    pub tasks_drained: AtomicU64,
    /// Barrier markers accepted
    pub barriers: AtomicU64,
    /// Highest active weight observed
    pub peak_weight: AtomicUsize,
}

impl SchedulerStats {
    /// Get completion percentage (ran or drained vs. submitted)
    pub fn completion_percentage(&self) -> f64 {
        let total = self.tasks_submitted.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        let done = self.tasks_completed.load(Ordering::Relaxed)
            + self.tasks_failed.load(Ordering::Relaxed)
            + self.tasks_drained.load(Ordering::Relaxed);
        (done as f64 / total as f64) * 100.0
    }
}

#[derive(Default)]
struct SchedulerState {
    next_index: i64,
    active_weight: usize,
    barrier_active: bool,
    outstanding: usize,
    scheduling_done: bool,
    first_error: Option<(String, Arc<OverlaySyncError>)>,
}

impl SchedulerState {
    fn failure(&self) -> Option<OverlaySyncError> {
        self.first_error
            .as_ref()
            .map(|(task, source)| OverlaySyncError::SchedulerFailed {
                task: task.clone(),
                source: Arc::clone(source),
            })
    }
}

struct Shared {
    state: Mutex<SchedulerState>,
    cond: Condvar,
    stats: SchedulerStats,
    max_concurrency: usize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, SchedulerState>) -> MutexGuard<'a, SchedulerState> {
        self.cond.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until `task` may start or a failure has been recorded
    fn admit<'a>(
        &'a self,
        mut state: MutexGuard<'a, SchedulerState>,
        task: &Task,
    ) -> MutexGuard<'a, SchedulerState> {
        loop {
            if state.first_error.is_some() {
                return state;
            }

            let ready = if task.is_barrier {
                state.active_weight == 0
            } else {
                // An over-weight task is admitted once nothing else runs
                let fits = state.active_weight == 0
                    || state.active_weight + task.thread_cost <= self.max_concurrency;
                fits && !state.barrier_active
            };
            if ready {
                return state;
            }

            tracing::trace!(
                "task {} waiting for admission - active {}, max {}",
                task.handle.index,
                state.active_weight,
                self.max_concurrency
            );
            state = self.wait(state);
        }
    }

    fn drain(&self, mut state: MutexGuard<'_, SchedulerState>, task: &Task) {
        tracing::debug!("skipping task {} ({}) after failure", task.handle.index, task.handle.name);
        state.outstanding -= 1;
        self.stats.tasks_drained.fetch_add(1, Ordering::Relaxed);
        drop(state);
        self.cond.notify_all();
    }
}

/// Bounded-concurrency scheduler with barrier support
///
/// Lifecycle: `start()`, any number of `schedule`/`schedule_barrier` calls,
/// `done_scheduling()`, then `wait()`.
pub struct TaskScheduler {
    config: SchedulerConfig,
    shared: Arc<Shared>,
    sender: Mutex<Option<Sender<Task>>>,
    receiver: Mutex<Option<Receiver<Task>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl TaskScheduler {
    /// Create a new task scheduler
    pub fn new(config: SchedulerConfig) -> Self {
        let config = SchedulerConfig {
            max_concurrency: config.max_concurrency.max(1),
            queue_size: config.queue_size.max(1),
        };
        let (sender, receiver) = bounded(config.queue_size);

        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SchedulerState::default()),
                cond: Condvar::new(),
                stats: SchedulerStats::default(),
                max_concurrency: config.max_concurrency,
            }),
            config,
            sender: Mutex::new(Some(sender)),
            receiver: Mutex::new(Some(receiver)),
            dispatcher: Mutex::new(None),
        }
    }

    /// Create a scheduler with the given concurrency cap and default queue size
    pub fn with_max_concurrency(max_concurrency: usize) -> Self {
        Self::new(SchedulerConfig {
            max_concurrency,
            ..Default::default()
        })
    }

    /// Concurrency cap
    pub fn max_concurrency(&self) -> usize {
        self.config.max_concurrency
    }

    /// Get statistics
    pub fn stats(&self) -> &SchedulerStats {
        &self.shared.stats
    }

    /// Whether a task has failed
    pub fn is_failed(&self) -> bool {
        self.shared.lock().first_error.is_some()
    }

    /// Schedule a regular task
    ///
    /// Fails fast if a task has already failed. The check is not atomic with
    /// the dispatch loop, so a task racing with a failure is queued and then
    /// drained without running.
    pub fn schedule<F>(&self, name: impl Into<String>, action: F, thread_cost: usize) -> Result<()>
    where
        F: FnOnce(&TaskHandle) -> Result<()> + Send + 'static,
    {
        self.enqueue(name.into(), Box::new(action), thread_cost.max(1), false)
    }

    /// Schedule a barrier marker
    pub fn schedule_barrier(&self, name: impl Into<String>) -> Result<()> {
        self.enqueue(name.into(), Box::new(|_: &TaskHandle| Ok(())), 1, true)
    }

    /// Schedule a task that runs alone, with barrier ordering on both sides
    pub fn schedule_exclusive<F>(&self, name: impl Into<String>, action: F) -> Result<()>
    where
        F: FnOnce(&TaskHandle) -> Result<()> + Send + 'static,
    {
        self.enqueue(name.into(), Box::new(action), 1, true)
    }

    fn enqueue(&self, name: String, action: TaskAction, thread_cost: usize, is_barrier: bool) -> Result<()> {
        let (sender, index) = {
            let mut state = self.shared.lock();
            if let Some(err) = state.failure() {
                return Err(err);
            }
            if state.scheduling_done {
                return Err(OverlaySyncError::SchedulingClosed);
            }
            let sender = self
                .sender
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
                .ok_or(OverlaySyncError::SchedulingClosed)?;

            let index = state.next_index;
            state.next_index += 1;
            state.outstanding += 1;
            (sender, index)
        };

        let task = Task {
            handle: TaskHandle { index, name },
            action,
            thread_cost,
            is_barrier,
        };

        // Sent without the state lock held: a full queue blocks until the
        // dispatch loop frees a slot.
        if sender.send(task).is_err() {
            let mut state = self.shared.lock();
            state.outstanding -= 1;
            drop(state);
            self.shared.cond.notify_all();
            return Err(OverlaySyncError::ThreadPoolError(
                "dispatch loop is not running".to_string(),
            ));
        }

        self.shared.stats.tasks_submitted.fetch_add(1, Ordering::Relaxed);
        if is_barrier {
            self.shared.stats.barriers.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Start the dispatch loop
    pub fn start(&self) -> Result<()> {
        let receiver = self
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| OverlaySyncError::ThreadPoolError("scheduler already started".to_string()))?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.max_concurrency)
            .thread_name(|i| format!("sync-worker-{i}"))
            .build()
            .map_err(|e| OverlaySyncError::ThreadPoolError(e.to_string()))?;

        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("sync-dispatch".to_string())
            .spawn(move || dispatch_loop(shared, receiver, pool))
            .map_err(|e| OverlaySyncError::ThreadPoolError(e.to_string()))?;

        *self.dispatcher.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    /// Signal that no more tasks will be submitted
    pub fn done_scheduling(&self) {
        {
            let mut state = self.shared.lock();
            state.scheduling_done = true;
        }
        self.shared.cond.notify_all();

        // Dropping the last sender lets the dispatch loop exit once drained
        self.sender.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    /// Block until scheduling is done and every submitted task has finished
    ///
    /// Returns the first task error, if any.
    pub fn wait(&self) -> Result<()> {
        if self.receiver.lock().unwrap_or_else(PoisonError::into_inner).is_some() {
            return Err(OverlaySyncError::ThreadPoolError(
                "wait called before start".to_string(),
            ));
        }

        tracing::trace!("waiting for scheduled tasks");
        let failure = {
            let mut state = self.shared.lock();
            while !(state.scheduling_done && state.outstanding == 0) {
                state = self.shared.wait(state);
            }
            state.failure()
        };

        let dispatcher = self.dispatcher.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = dispatcher {
            handle
                .join()
                .map_err(|_| OverlaySyncError::ThreadPoolError("dispatch loop panicked".to_string()))?;
        }

        failure.map_or(Ok(()), Err)
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        // Lets a started dispatch loop terminate if the owner bailed out early
        self.sender.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

fn dispatch_loop(shared: Arc<Shared>, receiver: Receiver<Task>, pool: rayon::ThreadPool) {
    tracing::debug!("start task dispatch loop");

    for task in receiver.iter() {
        let state = shared.lock();
        if state.first_error.is_some() {
            shared.drain(state, &task);
            continue;
        }

        let mut state = shared.admit(state, &task);
        if state.first_error.is_some() {
            shared.drain(state, &task);
            continue;
        }

        state.active_weight += task.thread_cost;
        if task.is_barrier {
            state.barrier_active = true;
        }
        shared.stats.peak_weight.fetch_max(state.active_weight, Ordering::Relaxed);
        drop(state);

        let worker = Arc::clone(&shared);
        pool.spawn(move || run_task(worker, task));
    }

    tracing::debug!("exit task dispatch loop");
}

fn run_task(shared: Arc<Shared>, task: Task) {
    let Task {
        handle,
        action,
        thread_cost,
        is_barrier,
    } = task;

    tracing::trace!("run task {}, {}", handle.index, handle.name);
    let result = match catch_unwind(AssertUnwindSafe(|| action(&handle))) {
        Ok(result) => result,
        Err(_) => Err(OverlaySyncError::TaskPanicked(handle.name.clone())),
    };

    let mut state = shared.lock();
    state.active_weight -= thread_cost;
    if is_barrier {
        state.barrier_active = false;
    }
    state.outstanding -= 1;

    match result {
        Ok(()) => {
            shared.stats.tasks_completed.fetch_add(1, Ordering::Relaxed);
        }
        Err(err) => {
            shared.stats.tasks_failed.fetch_add(1, Ordering::Relaxed);
            tracing::error!("task {} ({}) failed: {}", handle.index, handle.name, err);
            if state.first_error.is_none() {
                state.first_error = Some((handle.name, Arc::new(err)));
            }
        }
    }

    drop(state);
    shared.cond.notify_all();
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::AtomicBool;
    use std::time::{Duration, Instant};

    /// Records start/end instants of labelled tasks
    #[derive(Default)]
    struct Timeline {
        spans: Mutex<Vec<(usize, Instant, Instant)>>,
    }

    impl Timeline {
        fn record(&self, id: usize, start: Instant) {
            self.spans.lock().unwrap().push((id, start, Instant::now()));
        }

        fn span(&self, id: usize) -> (Instant, Instant) {
            let spans = self.spans.lock().unwrap();
            let (_, start, end) = spans.iter().find(|(i, _, _)| *i == id).unwrap();
            (*start, *end)
        }
    }

    fn timed_task(
        timeline: &Arc<Timeline>,
        id: usize,
        sleep: Duration,
    ) -> impl FnOnce(&TaskHandle) -> Result<()> + Send + 'static {
        let timeline = Arc::clone(timeline);
        move |_| {
            let start = Instant::now();
            std::thread::sleep(sleep);
            timeline.record(id, start);
            Ok(())
        }
    }

    #[test]
    fn test_runs_all_tasks() {
        let scheduler = TaskScheduler::with_max_concurrency(3);
        scheduler.start().unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        for i in 0..25 {
            let counter = Arc::clone(&counter);
            scheduler
                .schedule(format!("task {i}"), move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }, 1)
                .unwrap();
        }

        scheduler.done_scheduling();
        scheduler.wait().unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 25);
        assert_eq!(scheduler.stats().tasks_completed.load(Ordering::Relaxed), 25);
        assert_eq!(scheduler.stats().completion_percentage(), 100.0);
    }

    #[test]
    fn test_five_tasks_with_barrier() {
        let scheduler = TaskScheduler::with_max_concurrency(2);
        scheduler.start().unwrap();
        let timeline = Arc::new(Timeline::default());
        let sleep = Duration::from_millis(40);

        scheduler.schedule("task 1", timed_task(&timeline, 1, sleep), 1).unwrap();
        scheduler.schedule("task 2", timed_task(&timeline, 2, sleep), 1).unwrap();
        scheduler.schedule_exclusive("task 3", timed_task(&timeline, 3, sleep)).unwrap();
        scheduler.schedule("task 4", timed_task(&timeline, 4, sleep), 1).unwrap();
        scheduler.schedule("task 5", timed_task(&timeline, 5, sleep), 1).unwrap();

        scheduler.done_scheduling();
        scheduler.wait().unwrap();

        let (s1, e1) = timeline.span(1);
        let (s2, e2) = timeline.span(2);
        let (s3, e3) = timeline.span(3);
        let (s4, _) = timeline.span(4);
        let (s5, _) = timeline.span(5);

        // 1 and 2 overlap
        assert!(s2 < e1 && s1 < e2);
        // barrier waits for both
        assert!(s3 >= e1.max(e2));
        // 4 and 5 wait for the barrier
        assert!(s4 >= e3);
        assert!(s5 >= e3);
    }

    #[test]
    fn test_barrier_marker_orders_groups() {
        let scheduler = TaskScheduler::with_max_concurrency(4);
        scheduler.start().unwrap();
        let timeline = Arc::new(Timeline::default());

        for id in 0..4 {
            scheduler
                .schedule(format!("before {id}"), timed_task(&timeline, id, Duration::from_millis(15)), 1)
                .unwrap();
        }
        scheduler.schedule_barrier("barrier").unwrap();
        for id in 10..14 {
            scheduler
                .schedule(format!("after {id}"), timed_task(&timeline, id, Duration::from_millis(1)), 1)
                .unwrap();
        }

        scheduler.done_scheduling();
        scheduler.wait().unwrap();

        let last_before = (0..4).map(|id| timeline.span(id).1).max().unwrap();
        let first_after = (10..14).map(|id| timeline.span(id).0).min().unwrap();
        assert!(first_after >= last_before);
        assert_eq!(scheduler.stats().barriers.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_drain_on_failure() {
        let scheduler = TaskScheduler::with_max_concurrency(1);
        scheduler.start().unwrap();
        let invoked = Arc::new(AtomicBool::new(false));

        scheduler
            .schedule("failing", |_| {
                std::thread::sleep(Duration::from_millis(20));
                Err(OverlaySyncError::remote("upload", "/zone/a", "denied"))
            }, 1)
            .unwrap();

        let mut rejected = 0;
        for i in 0..4 {
            let invoked = Arc::clone(&invoked);
            let res = scheduler.schedule(format!("after {i}"), move |_| {
                invoked.store(true, Ordering::SeqCst);
                Ok(())
            }, 1);
            if res.is_err() {
                rejected += 1;
            }
        }

        scheduler.done_scheduling();
        let err = scheduler.wait().unwrap_err();

        assert!(matches!(err, OverlaySyncError::SchedulerFailed { ref task, .. } if task == "failing"));
        assert!(!invoked.load(Ordering::SeqCst));
        let drained = scheduler.stats().tasks_drained.load(Ordering::Relaxed) as usize;
        assert_eq!(drained + rejected, 4);
        assert!(scheduler.is_failed());
    }

    #[test]
    fn test_schedule_fails_fast_after_failure() {
        let scheduler = TaskScheduler::with_max_concurrency(2);
        scheduler.start().unwrap();

        scheduler
            .schedule("failing", |_| Err(OverlaySyncError::remote("mkdir", "/zone/d", "io")), 1)
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while !scheduler.is_failed() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }

        let err = scheduler.schedule("late", |_| Ok(()), 1).unwrap_err();
        assert!(matches!(err, OverlaySyncError::SchedulerFailed { .. }));
        assert!(scheduler.schedule_barrier("late barrier").is_err());

        scheduler.done_scheduling();
        assert!(scheduler.wait().is_err());
    }

    #[test]
    fn test_first_error_is_kept() {
        let scheduler = TaskScheduler::with_max_concurrency(2);
        scheduler.start().unwrap();

        scheduler
            .schedule("first", |_| Err(OverlaySyncError::remote("stat", "/a", "one")), 1)
            .unwrap();
        scheduler
            .schedule("second", |_| {
                std::thread::sleep(Duration::from_millis(30));
                Err(OverlaySyncError::remote("stat", "/b", "two"))
            }, 1)
            .unwrap();

        scheduler.done_scheduling();
        match scheduler.wait() {
            Err(OverlaySyncError::SchedulerFailed { task, .. }) => assert_eq!(task, "first"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_panicking_task_becomes_error() {
        let scheduler = TaskScheduler::with_max_concurrency(2);
        scheduler.start().unwrap();
        scheduler.schedule("boom", |_| panic!("boom"), 1).unwrap();
        scheduler.done_scheduling();

        let err = scheduler.wait().unwrap_err();
        match err {
            OverlaySyncError::SchedulerFailed { source, .. } => {
                assert!(matches!(*source, OverlaySyncError::TaskPanicked(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_overweight_task_runs_alone() {
        let scheduler = TaskScheduler::with_max_concurrency(2);
        scheduler.start().unwrap();
        let timeline = Arc::new(Timeline::default());

        scheduler.schedule("small", timed_task(&timeline, 1, Duration::from_millis(20)), 1).unwrap();
        scheduler.schedule("huge", timed_task(&timeline, 2, Duration::from_millis(20)), 5).unwrap();
        scheduler.schedule("small 2", timed_task(&timeline, 3, Duration::from_millis(5)), 1).unwrap();

        scheduler.done_scheduling();
        scheduler.wait().unwrap();

        let (_, e1) = timeline.span(1);
        let (s2, e2) = timeline.span(2);
        let (s3, _) = timeline.span(3);
        assert!(s2 >= e1);
        assert!(s3 >= e2);
    }

    #[test]
    fn test_lifecycle_misuse() {
        let scheduler = TaskScheduler::with_max_concurrency(2);
        assert!(scheduler.wait().is_err());

        scheduler.start().unwrap();
        assert!(scheduler.start().is_err());

        scheduler.done_scheduling();
        assert!(matches!(
            scheduler.schedule("late", |_| Ok(()), 1),
            Err(OverlaySyncError::SchedulingClosed)
        ));
        scheduler.wait().unwrap();
    }

    #[test]
    fn test_task_handle_indices_are_monotonic() {
        let scheduler = TaskScheduler::with_max_concurrency(1);
        scheduler.start().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let seen = Arc::clone(&seen);
            scheduler
                .schedule(format!("t{i}"), move |handle| {
                    seen.lock().unwrap().push((handle.index(), handle.name().to_string()));
                    Ok(())
                }, 1)
                .unwrap();
        }
        scheduler.done_scheduling();
        scheduler.wait().unwrap();

        let seen = seen.lock().unwrap();
        let indices: Vec<i64> = seen.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
        assert_eq!(seen[2].1, "t2");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(12))]

        #[test]
        fn prop_weight_never_exceeds_cap(
            max in 1usize..4,
            costs in proptest::collection::vec(1usize..3, 1..16),
            barrier_every in 2usize..6,
        ) {
            let scheduler = TaskScheduler::with_max_concurrency(max);
            scheduler.start().unwrap();

            let running = Arc::new(AtomicUsize::new(0));
            let barrier_running = Arc::new(AtomicBool::new(false));
            let violations = Arc::new(AtomicUsize::new(0));

            for (i, cost) in costs.iter().copied().enumerate() {
                if i % barrier_every == 0 {
                    let running = Arc::clone(&running);
                    let barrier_running = Arc::clone(&barrier_running);
                    let violations = Arc::clone(&violations);
                    scheduler.schedule_exclusive(format!("barrier {i}"), move |_| {
                        barrier_running.store(true, Ordering::SeqCst);
                        if running.load(Ordering::SeqCst) != 0 {
                            violations.fetch_add(1, Ordering::SeqCst);
                        }
                        std::thread::sleep(Duration::from_millis(1));
                        barrier_running.store(false, Ordering::SeqCst);
                        Ok(())
                    }).unwrap();
                }

                let running = Arc::clone(&running);
                let barrier_running = Arc::clone(&barrier_running);
                let violations = Arc::clone(&violations);
                scheduler.schedule(format!("task {i}"), move |_| {
                    let now = running.fetch_add(cost, Ordering::SeqCst) + cost;
                    if (now > max && now != cost) || barrier_running.load(Ordering::SeqCst) {
                        violations.fetch_add(1, Ordering::SeqCst);
                    }
                    std::thread::sleep(Duration::from_millis(2));
                    running.fetch_sub(cost, Ordering::SeqCst);
                    Ok(())
                }, cost).unwrap();
            }

            scheduler.done_scheduling();
            scheduler.wait().unwrap();

            prop_assert_eq!(violations.load(Ordering::SeqCst), 0);
        }
    }
}

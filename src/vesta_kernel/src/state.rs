//! Shared kernel state and the kernel-state lock
//!
//! All scheduler queues and IPC object fields live behind one mutex; holding
//! its guard *is* the critical section, and passing the guard down the call
//! stack expresses nesting. The tick handler and every API entry point
//! acquire it for the duration of their queue mutations, which serializes
//! tick effects against the rest of the kernel.
use std::sync::{Condvar, Mutex, MutexGuard};

use slab::Slab;

use crate::{
    cfg::Cfg,
    event_group::EventGroupCb,
    mutex::MutexCb,
    queue::QueueCb,
    sched::{Policy, RunState, SchedStats},
    semaphore::SemaphoreCb,
    task::{readyqueue::ReadyQueue, TaskCb, TaskId},
    threading,
    time::Time32,
};

/// The state shared between the embedder, the task threads, and the tick
/// driver.
pub(crate) struct KernelShared {
    pub(crate) state: Mutex<KernelState>,
    /// Signalled whenever the scheduler falls back to the idle task. This is
    /// the simulation's quiescence point: every task thread is parked.
    pub(crate) idle_cond: Condvar,
}

/// Guard representing an entered critical section.
pub(crate) type KernelGuard<'a> = MutexGuard<'a, KernelState>;

impl KernelShared {
    /// Enter the critical section.
    pub(crate) fn lock(&self) -> KernelGuard<'_> {
        self.state.lock().unwrap()
    }
}

pub(crate) struct KernelState {
    pub(crate) cfg: Cfg,

    /// The monotonic tick counter.
    pub(crate) clock: Time32,

    pub(crate) run_state: RunState,
    pub(crate) policy: Policy,

    /// Scheduler lock nesting depth. While non-zero, context switches are
    /// withheld; the unlock that drops it to zero performs the pending one.
    pub(crate) lock_depth: u32,

    /// A context switch was requested from outside the running task's thread
    /// and is deferred to the task's next cooperation point.
    pub(crate) dispatch_pending: bool,

    /// Set once at teardown; parked task threads observe it and exit.
    pub(crate) shutdown: bool,

    /// A wall-clock tick driver thread is alive.
    pub(crate) ticker_running: bool,

    /// The running task. Equal to [`Self::idle`] when no task is runnable.
    pub(crate) running: TaskId,
    /// The idle task. It owns no thread and is never queued anywhere.
    pub(crate) idle: TaskId,

    pub(crate) ready: ReadyQueue,
    pub(crate) blocked: Vec<TaskId>,
    pub(crate) suspended: Vec<TaskId>,

    pub(crate) tasks: Slab<TaskCb>,
    pub(crate) semaphores: Slab<SemaphoreCb>,
    pub(crate) mutexes: Slab<MutexCb>,
    pub(crate) queues: Slab<QueueCb>,
    pub(crate) event_groups: Slab<EventGroupCb>,

    pub(crate) stats: SchedStats,
}

impl KernelState {
    pub(crate) fn new(cfg: Cfg, policy: Policy) -> Self {
        let mut tasks = Slab::with_capacity(cfg.max_tasks + 1);
        let idle = tasks.insert(TaskCb::idle(cfg.priority_levels, cfg.default_time_slice));

        Self {
            clock: 0,
            run_state: RunState::Stopped,
            policy,
            lock_depth: 0,
            dispatch_pending: false,
            shutdown: false,
            ticker_running: false,
            running: idle,
            idle,
            ready: ReadyQueue::new(cfg.priority_levels),
            blocked: Vec::new(),
            suspended: Vec::new(),
            semaphores: Slab::with_capacity(cfg.max_semaphores),
            mutexes: Slab::with_capacity(cfg.max_mutexes),
            queues: Slab::with_capacity(cfg.max_queues),
            event_groups: Slab::with_capacity(cfg.max_event_groups),
            stats: SchedStats::default(),
            tasks,
            cfg,
        }
    }

    pub(crate) fn is_idle(&self, id: TaskId) -> bool {
        id == self.idle
    }

    /// Number of live tasks, the idle task excluded.
    pub(crate) fn task_count(&self) -> usize {
        self.tasks.len() - 1
    }
}

/// The calling thread's task, provided it belongs to this kernel *and* is the
/// running task. Returns `None` for the boot thread, the tick driver, and
/// other foreign threads.
pub(crate) fn running_caller(shared: &KernelShared, st: &KernelState) -> Option<TaskId> {
    let me = threading::current_task(shared)?;
    (st.running == me).then_some(me)
}

/// Check that the current context may block: the scheduler must be running,
/// the caller must be the running task, and the scheduler lock must not be
/// held (a task blocking with context switches withheld could never be
/// resumed).
pub(crate) fn expect_waitable_context(
    shared: &KernelShared,
    st: &KernelState,
) -> Result<TaskId, BadContext> {
    match running_caller(shared, st) {
        Some(me) if st.lock_depth == 0 && st.run_state == RunState::Running => Ok(me),
        _ => Err(BadContext),
    }
}

/// Marker for "the caller is not in a waitable context"; callers map it onto
/// the `BadContext` variant of their own error type.
pub(crate) struct BadContext;

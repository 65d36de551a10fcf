//! Tasks
//!
//! A task is a named entry function with a dedicated execution context,
//! scheduled by effective priority. The control block carries both the
//! assigned (`base`) and the effective priority so mutex priority
//! inheritance can raise and later restore it.
use core::fmt;
use std::thread;

use arrayvec::ArrayString;

use crate::{
    cfg::MAX_NAME_LEN,
    error::{
        CreateTaskError, DeleteTaskError, QueryError, ResumeTaskError, SetPeriodicError,
        SetTaskPriorityError, SleepError, SuspendTaskError, WaitPeriodError,
    },
    mutex, sched, state,
    threading,
    time::{self, Time32},
    wait::{BlockReason, TaskWait, WaitPayload},
    Kernel,
};

pub(crate) mod readyqueue;

pub(crate) type TaskId = usize;

/// Handle to a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Task {
    pub(crate) id: TaskId,
}

/// Task scheduling state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Ready,
    Running,
    Blocked,
    Suspended,
    Terminated,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ready => "READY",
            Self::Running => "RUNNING",
            Self::Blocked => "BLOCKED",
            Self::Suspended => "SUSPENDED",
            Self::Terminated => "TERMINATED",
        })
    }
}

/// Per-task execution statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskStats {
    /// Ticks spent running, summed over all activations.
    pub total_runtime: Time32,
    /// Tick at which the task was last dispatched.
    pub last_start_time: Time32,
    /// Number of times the task was dispatched.
    pub activations: u32,
    /// Missed deadlines of this task's periodic releases.
    pub deadline_misses: u32,
    /// Longest single execution burst in ticks.
    pub max_burst: Time32,
}

/// Parameters for [`Kernel::spawn_task`].
#[derive(Debug, Clone)]
pub struct TaskOptions {
    pub(crate) name: String,
    pub(crate) priority: u8,
    pub(crate) stack_size: Option<usize>,
    pub(crate) time_slice: Option<Time32>,
}

impl TaskOptions {
    pub fn new(name: &str, priority: u8) -> Self {
        Self {
            name: name.to_owned(),
            priority,
            stack_size: None,
            time_slice: None,
        }
    }

    /// Stack size in bytes; defaults to the configured default.
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    /// Round-robin time slice in ticks; defaults to the configured default.
    pub fn time_slice(mut self, ticks: Time32) -> Self {
        self.time_slice = Some(ticks);
        self
    }
}

/// *Task control block* - the state data of a task.
pub(crate) struct TaskCb {
    pub(crate) name: ArrayString<MAX_NAME_LEN>,
    pub(crate) st: TaskState,
    /// The priority assigned by the creator (or `set_priority`).
    pub(crate) base_priority: u8,
    /// The priority the scheduler uses; differs from `base_priority` only
    /// while the task inherits a waiter's priority through a mutex.
    pub(crate) effective_priority: u8,
    pub(crate) time_slice: Time32,
    pub(crate) slice_left: Time32,
    /// Unpark handle of the backing host thread. `None` for the idle task
    /// and for terminated tasks.
    pub(crate) thread: Option<thread::Thread>,
    pub(crate) stack_size: usize,
    pub(crate) wait: TaskWait,
    /// Release period in ticks; `0` for an aperiodic task.
    pub(crate) period: Time32,
    /// Relative deadline in ticks from each release.
    pub(crate) deadline: Time32,
    pub(crate) next_release: Time32,
    pub(crate) absolute_deadline: Time32,
    /// The current release has been dispatched and has not yet completed
    /// (completion is parking for the next period).
    pub(crate) job_active: bool,
    pub(crate) stats: TaskStats,
}

impl TaskCb {
    fn new(name: ArrayString<MAX_NAME_LEN>, priority: u8, slice: Time32, stack: usize) -> Self {
        Self {
            name,
            st: TaskState::Ready,
            base_priority: priority,
            effective_priority: priority,
            time_slice: slice,
            slice_left: slice,
            thread: None,
            stack_size: stack,
            wait: TaskWait::new(),
            period: 0,
            deadline: 0,
            next_release: 0,
            absolute_deadline: 0,
            job_active: false,
            stats: TaskStats::default(),
        }
    }

    /// The idle task: a thread-less placeholder at the lowest priority that
    /// "runs" whenever nothing else can.
    pub(crate) fn idle(priority_levels: usize, slice: Time32) -> Self {
        let mut name = ArrayString::new();
        name.push_str("idle");
        Self::new(name, (priority_levels - 1) as u8, slice, 0)
    }

    pub(crate) fn is_periodic(&self) -> bool {
        self.period > 0
    }
}

impl Kernel {
    /// Create a task and make it Ready. The entry closure runs once the
    /// scheduler first dispatches the task; a task whose entry returns is
    /// terminated.
    pub fn spawn_task(
        &self,
        options: TaskOptions,
        entry: impl FnOnce() + Send + 'static,
    ) -> Result<Task, CreateTaskError> {
        let mut st = self.shared.lock();

        let name = ArrayString::from(&options.name).map_err(|_| CreateTaskError::BadParam)?;
        if usize::from(options.priority) >= st.cfg.priority_levels {
            return Err(CreateTaskError::BadParam);
        }
        let slice = options.time_slice.unwrap_or(st.cfg.default_time_slice);
        if slice == 0 {
            return Err(CreateTaskError::BadParam);
        }
        if st.task_count() >= st.cfg.max_tasks {
            log::error!("no free task slots for '{}'", options.name);
            return Err(CreateTaskError::NoCapacity);
        }

        let stack = options.stack_size.unwrap_or(st.cfg.default_stack_size);
        let id = st.tasks.insert(TaskCb::new(name, options.priority, slice, stack));

        match threading::spawn(self.shared.clone(), id, &options.name, stack, Box::new(entry)) {
            Ok(handle) => st.tasks[id].thread = Some(handle),
            Err(err) => {
                log::error!("could not spawn host thread for '{}': {err}", options.name);
                st.tasks.remove(id);
                return Err(CreateTaskError::NoCapacity);
            }
        }

        st.ready.push_back(usize::from(options.priority), id);
        st.stats.tasks_created += 1;
        log::info!(
            "created task '{}', priority={}, stack={} bytes",
            options.name,
            options.priority,
            stack
        );

        // A creation is not a cooperation point; the new task is only
        // dispatched right away if the processor is otherwise idle.
        if st.running == st.idle {
            sched::context_switch(&self.shared, &mut st);
        }

        Ok(Task { id })
    }

    /// Delete a task. The running task and the idle task cannot be deleted;
    /// suspend the current task from elsewhere and delete it externally.
    pub fn delete_task(&self, task: Task) -> Result<(), DeleteTaskError> {
        let mut st = self.shared.lock();
        let cb = st.tasks.get(task.id).ok_or(DeleteTaskError::BadId)?;
        if st.is_idle(task.id) || cb.st == TaskState::Running {
            log::warn!("cannot delete task '{}' in state {}", cb.name, cb.st);
            return Err(DeleteTaskError::BadObjectState);
        }

        let state = cb.st;
        let prio = usize::from(cb.effective_priority);
        match state {
            TaskState::Ready => {
                st.ready.remove(prio, task.id);
            }
            TaskState::Blocked => {
                crate::wait::unlink_from_object(&mut st, task.id);
                st.blocked.retain(|&t| t != task.id);
            }
            TaskState::Suspended => {
                st.suspended.retain(|&t| t != task.id);
            }
            TaskState::Terminated => {}
            TaskState::Running => unreachable!(),
        }

        mutex::abandon_held(&mut st, task.id);

        let cb = st.tasks.remove(task.id);
        st.stats.tasks_deleted += 1;
        log::info!("deleted task '{}'", cb.name);
        if let Some(thread) = cb.thread {
            // Wake the backing thread so it can observe the deletion and exit.
            thread.unpark();
        }

        sched::check_preemption(&self.shared, &mut st);
        drop(st);
        threading::settle(&self.shared);
        Ok(())
    }

    /// Suspend a Ready or Running task. Suspending the current task yields
    /// immediately.
    pub fn suspend(&self, task: Task) -> Result<(), SuspendTaskError> {
        let mut st = self.shared.lock();
        let cb = st.tasks.get(task.id).ok_or(SuspendTaskError::BadId)?;
        if st.is_idle(task.id) {
            log::warn!("cannot suspend the idle task");
            return Err(SuspendTaskError::BadObjectState);
        }

        let (tstate, prio, name) = (cb.st, usize::from(cb.effective_priority), cb.name);
        match tstate {
            TaskState::Ready => {
                st.ready.remove(prio, task.id);
                st.tasks[task.id].st = TaskState::Suspended;
                st.suspended.push(task.id);
            }
            TaskState::Running => {
                sched::account_deschedule(&mut st, task.id);
                st.tasks[task.id].st = TaskState::Suspended;
                st.suspended.push(task.id);
                sched::context_switch(&self.shared, &mut st);
            }
            _ => {
                log::warn!("cannot suspend task '{name}' in state {tstate}");
                return Err(SuspendTaskError::BadObjectState);
            }
        }
        log::info!("suspended task '{}'", st.tasks[task.id].name);
        drop(st);
        threading::settle(&self.shared);
        Ok(())
    }

    /// Resume a suspended task. Resuming a task that is not suspended is a
    /// no-op.
    pub fn resume(&self, task: Task) -> Result<(), ResumeTaskError> {
        let mut st = self.shared.lock();
        let cb = st.tasks.get(task.id).ok_or(ResumeTaskError::BadId)?;
        if cb.st != TaskState::Suspended {
            log::warn!("task '{}' is not suspended", cb.name);
            return Ok(());
        }

        let prio = usize::from(cb.effective_priority);
        st.suspended.retain(|&t| t != task.id);
        st.tasks[task.id].st = TaskState::Ready;
        st.ready.push_back(prio, task.id);
        log::info!("resumed task '{}'", st.tasks[task.id].name);

        sched::check_preemption(&self.shared, &mut st);
        drop(st);
        threading::settle(&self.shared);
        Ok(())
    }

    /// Set a task's assigned priority. An active inheritance boost is never
    /// weakened by this call.
    pub fn set_priority(&self, task: Task, priority: u8) -> Result<(), SetTaskPriorityError> {
        let mut st = self.shared.lock();
        let cb = st.tasks.get(task.id).ok_or(SetTaskPriorityError::BadId)?;
        if usize::from(priority) >= st.cfg.priority_levels || st.is_idle(task.id) {
            return Err(SetTaskPriorityError::BadParam);
        }

        let old_effective = cb.effective_priority;
        let boosted = cb.effective_priority < cb.base_priority;
        let new_effective = if boosted {
            old_effective.min(priority)
        } else {
            priority
        };

        let cb = &mut st.tasks[task.id];
        cb.base_priority = priority;
        cb.effective_priority = new_effective;
        let name = cb.name;
        let requeue = cb.st == TaskState::Ready && new_effective != old_effective;
        if requeue {
            st.ready.remove(usize::from(old_effective), task.id);
            st.ready.push_back(usize::from(new_effective), task.id);
        }
        log::info!("set task '{name}' priority to {priority}");

        sched::check_preemption(&self.shared, &mut st);
        drop(st);
        threading::settle(&self.shared);
        Ok(())
    }

    /// A task's effective priority (the one the scheduler uses).
    pub fn priority(&self, task: Task) -> Result<u8, QueryError> {
        let st = self.shared.lock();
        let cb = st.tasks.get(task.id).ok_or(QueryError::BadId)?;
        Ok(cb.effective_priority)
    }

    /// A task's assigned priority.
    pub fn base_priority(&self, task: Task) -> Result<u8, QueryError> {
        let st = self.shared.lock();
        let cb = st.tasks.get(task.id).ok_or(QueryError::BadId)?;
        Ok(cb.base_priority)
    }

    /// Make a task periodic with the given period and relative deadline in
    /// ticks (a zero deadline defaults to the period). The first release is
    /// one period from now.
    pub fn set_periodic(
        &self,
        task: Task,
        period: Time32,
        deadline: Time32,
    ) -> Result<(), SetPeriodicError> {
        let mut st = self.shared.lock();
        if period == 0 {
            return Err(SetPeriodicError::BadParam);
        }
        let now = st.clock;
        let cb = st.tasks.get_mut(task.id).ok_or(SetPeriodicError::BadId)?;
        cb.period = period;
        cb.deadline = if deadline > 0 { deadline } else { period };
        cb.next_release = now + period;
        cb.absolute_deadline = cb.next_release + cb.deadline;
        cb.job_active = false;
        log::info!(
            "set task '{}' periodic (period={}, deadline={})",
            cb.name,
            cb.period,
            cb.deadline
        );
        Ok(())
    }

    /// Complete the current periodic release and sleep until the next one.
    pub fn wait_period(&self) -> Result<(), WaitPeriodError> {
        let mut st = self.shared.lock();
        let me = state::expect_waitable_context(&self.shared, &st)
            .map_err(|_| WaitPeriodError::BadContext)?;
        if !st.tasks[me].is_periodic() {
            return Err(WaitPeriodError::BadObjectState);
        }

        st.tasks[me].job_active = false;
        let next_release = st.tasks[me].next_release;
        if next_release <= st.clock {
            drop(st);
            self.yield_now();
            return Ok(());
        }

        sched::block_current(
            &mut st,
            me,
            BlockReason::Delay,
            None,
            WaitPayload::None,
            Some(next_release),
        );
        sched::context_switch(&self.shared, &mut st);
        drop(st);
        threading::settle(&self.shared);
        Ok(())
    }

    /// Block the current task for `ticks` ticks. `delay(0)` is equivalent to
    /// [`Kernel::yield_now`]; `MAX_TIMEOUT` sleeps until woken by a periodic
    /// release.
    pub fn delay(&self, ticks: Time32) -> Result<(), SleepError> {
        let mut st = self.shared.lock();
        let me =
            state::expect_waitable_context(&self.shared, &st).map_err(|_| SleepError::BadContext)?;
        if ticks == 0 {
            sched::context_switch(&self.shared, &mut st);
            drop(st);
            threading::settle(&self.shared);
            return Ok(());
        }

        let deadline = time::expiry(st.clock, ticks);
        sched::block_current(&mut st, me, BlockReason::Delay, None, WaitPayload::None, deadline);
        sched::context_switch(&self.shared, &mut st);
        drop(st);
        threading::settle(&self.shared);
        Ok(())
    }

    /// Block the current task until the given absolute tick. A tick value in
    /// the past degenerates to a yield.
    pub fn delay_until(&self, tick: Time32) -> Result<(), SleepError> {
        let mut st = self.shared.lock();
        let me =
            state::expect_waitable_context(&self.shared, &st).map_err(|_| SleepError::BadContext)?;
        if tick <= st.clock {
            sched::context_switch(&self.shared, &mut st);
            drop(st);
            threading::settle(&self.shared);
            return Ok(());
        }

        sched::block_current(
            &mut st,
            me,
            BlockReason::Delay,
            None,
            WaitPayload::None,
            Some(tick),
        );
        sched::context_switch(&self.shared, &mut st);
        drop(st);
        threading::settle(&self.shared);
        Ok(())
    }

    /// Offer the processor to the scheduler. The caller keeps running unless
    /// an equally or more urgent task is ready.
    pub fn yield_now(&self) {
        let mut st = self.shared.lock();
        sched::context_switch(&self.shared, &mut st);
        drop(st);
        threading::settle(&self.shared);
    }

    /// The task owning the calling thread, if any.
    pub fn current_task(&self) -> Option<Task> {
        threading::current_task(&self.shared).map(|id| Task { id })
    }

    /// Look a task up by name. Returns the first match.
    pub fn task_by_name(&self, name: &str) -> Option<Task> {
        let st = self.shared.lock();
        st.tasks
            .iter()
            .find(|(_, cb)| cb.name.as_str() == name)
            .map(|(id, _)| Task { id })
    }

    pub fn task_name(&self, task: Task) -> Result<String, QueryError> {
        let st = self.shared.lock();
        let cb = st.tasks.get(task.id).ok_or(QueryError::BadId)?;
        Ok(cb.name.to_string())
    }

    pub fn task_state(&self, task: Task) -> Result<TaskState, QueryError> {
        let st = self.shared.lock();
        let cb = st.tasks.get(task.id).ok_or(QueryError::BadId)?;
        Ok(cb.st)
    }

    /// Why a task is blocked; [`BlockReason::None`] unless it is Blocked.
    pub fn task_block_reason(&self, task: Task) -> Result<BlockReason, QueryError> {
        let st = self.shared.lock();
        let cb = st.tasks.get(task.id).ok_or(QueryError::BadId)?;
        Ok(cb.wait.reason)
    }

    pub fn task_stats(&self, task: Task) -> Result<TaskStats, QueryError> {
        let st = self.shared.lock();
        let cb = st.tasks.get(task.id).ok_or(QueryError::BadId)?;
        Ok(cb.stats)
    }

    pub fn reset_task_stats(&self, task: Task) -> Result<(), QueryError> {
        let mut st = self.shared.lock();
        let cb = st.tasks.get_mut(task.id).ok_or(QueryError::BadId)?;
        cb.stats = TaskStats::default();
        Ok(())
    }

    /// Remaining stack of a task, best effort. Stack usage is not modeled by
    /// the simulation; this reports half the provisioned size like the
    /// reference hardware port would for a healthy task.
    pub fn stack_free(&self, task: Task) -> Result<usize, QueryError> {
        let st = self.shared.lock();
        let cb = st.tasks.get(task.id).ok_or(QueryError::BadId)?;
        Ok(cb.stack_size / 2)
    }
}

/// Terminate the calling task after its entry function returned or panicked.
/// Invoked by the thread wrapper with no kernel lock held.
pub(crate) fn finalize_current(shared: &crate::state::KernelShared, id: TaskId, panicked: bool) {
    let mut st = shared.lock();
    if st.shutdown || st.tasks.get(id).is_none() {
        return;
    }

    if !panicked {
        log::info!("task '{}' returned from its entry function", st.tasks[id].name);
    }

    if st.running == id {
        sched::account_deschedule(&mut st, id);
    }
    mutex::abandon_held(&mut st, id);
    let cb = &mut st.tasks[id];
    cb.st = TaskState::Terminated;
    cb.thread = None;

    sched::context_switch(shared, &mut st);
}

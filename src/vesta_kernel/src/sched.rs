//! Scheduler
//!
//! Ready tasks live in per-priority FIFO queues; blocked and suspended tasks
//! in flat lists scanned linearly. The running task is in no queue at all.
//! `context_switch` implements the switch protocol: the outgoing task is
//! requeued first (at the front of its level, or at the tail when its
//! round-robin slice expired), then the policy selects the successor, so an
//! equally urgent wakeup never displaces the running task.
//!
//! The tick handler wakes expired timed waits, releases periodic tasks,
//! accounts deadline misses and drives the round-robin slice. It runs under
//! the kernel-state lock like every other queue mutation.
use core::fmt;
use std::sync::Arc;

use crate::{
    state::{KernelShared, KernelState},
    task::{TaskId, TaskState},
    threading,
    time::{self, Time32},
    wait::{self, BlockReason, WaitFailure, WaitObject, WaitPayload},
    Kernel,
};

/// Scheduling policy, selectable at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// Fixed priority, FIFO within a level.
    Priority = 0,
    /// Fixed priority with time-sliced rotation within a level.
    RoundRobin = 1,
    /// Earliest deadline first among periodic tasks, priority fallback.
    Edf = 2,
    /// Rate monotonic: the queue lookup of `Priority`, with the embedder
    /// expected to have assigned priorities inversely to period.
    Rms = 3,
}

impl Policy {
    /// Numeric policy identifier.
    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Self::Priority),
            1 => Some(Self::RoundRobin),
            2 => Some(Self::Edf),
            3 => Some(Self::Rms),
            _ => None,
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Priority => "Priority",
            Self::RoundRobin => "Round Robin",
            Self::Edf => "Earliest Deadline First",
            Self::Rms => "Rate Monotonic",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunState {
    Stopped,
    Running,
}

/// Raw scheduler counters.
#[derive(Debug, Default)]
pub(crate) struct SchedStats {
    pub(crate) context_switches: u32,
    pub(crate) tasks_created: u32,
    pub(crate) tasks_deleted: u32,
    pub(crate) scheduler_invocations: u32,
    pub(crate) idle_time: Time32,
    pub(crate) deadline_misses: u32,
}

/// Scheduler statistics snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulerStats {
    pub context_switches: u32,
    pub tasks_created: u32,
    pub tasks_deleted: u32,
    pub scheduler_invocations: u32,
    /// Ticks spent with no runnable task.
    pub idle_time: Time32,
    /// Total uptime in ticks.
    pub system_time: Time32,
    /// 1 − idle/uptime, clamped to [0, 1].
    pub cpu_load: f32,
    /// Deadline misses summed over all tasks.
    pub deadline_misses: u32,
}

/// Select the task to run next under the current policy. Only queued Ready
/// tasks compete; returns the idle task when every queue is empty.
pub(crate) fn next_task(st: &mut KernelState) -> TaskId {
    st.stats.scheduler_invocations += 1;

    match st.policy {
        Policy::Priority | Policy::RoundRobin | Policy::Rms => st
            .ready
            .first_level()
            .and_then(|level| st.ready.front(level))
            .unwrap_or(st.idle),
        Policy::Edf => {
            let mut best: Option<(Time32, u8, TaskId)> = None;
            for id in st.ready.iter() {
                let cb = &st.tasks[id];
                if !cb.is_periodic() {
                    continue;
                }
                let key = (cb.absolute_deadline, cb.effective_priority);
                if best.map_or(true, |(d, p, _)| key < (d, p)) {
                    best = Some((key.0, key.1, id));
                }
            }
            best.map(|(_, _, id)| id)
                .or_else(|| st.ready.first_level().and_then(|level| st.ready.front(level)))
                .unwrap_or(st.idle)
        }
    }
}

/// Charge the running time since the last dispatch to a task leaving the
/// processor.
pub(crate) fn account_deschedule(st: &mut KernelState, id: TaskId) {
    let now = st.clock;
    let cb = &mut st.tasks[id];
    let burst = now.saturating_sub(cb.stats.last_start_time);
    cb.stats.total_runtime = cb.stats.total_runtime.saturating_add(burst);
    if burst > cb.stats.max_burst {
        cb.stats.max_burst = burst;
    }
}

/// Perform a context switch if the scheduler allows one.
///
/// A switch requested from a thread other than the running task's is recorded
/// in `dispatch_pending` and carried out at the task's next cooperation
/// point; a cooperative kernel cannot stop a task that is between kernel
/// calls.
pub(crate) fn context_switch(shared: &KernelShared, st: &mut KernelState) {
    if st.run_state != RunState::Running || st.lock_depth > 0 {
        return;
    }

    let cur = st.running;
    let cur_running =
        !st.is_idle(cur) && st.tasks.get(cur).map_or(false, |t| t.st == TaskState::Running);

    if cur_running && threading::current_task(shared) != Some(cur) {
        st.dispatch_pending = true;
        return;
    }
    st.dispatch_pending = false;

    if cur_running {
        account_deschedule(st, cur);
        let rr = st.policy == Policy::RoundRobin;
        let cb = &mut st.tasks[cur];
        let expired = rr && cb.slice_left == 0;
        if expired {
            cb.slice_left = cb.time_slice;
        }
        cb.st = TaskState::Ready;
        let level = usize::from(cb.effective_priority);
        if expired {
            st.ready.push_back(level, cur);
        } else {
            st.ready.push_front(level, cur);
        }
    }

    let next = next_task(st);
    if !st.is_idle(next) {
        let level = usize::from(st.tasks[next].effective_priority);
        st.ready.remove(level, next);
    }

    if next == cur {
        if cur_running {
            st.tasks[cur].st = TaskState::Running;
        }
        return;
    }

    st.stats.context_switches += 1;
    if !st.is_idle(next) {
        let now = st.clock;
        let cb = &mut st.tasks[next];
        cb.st = TaskState::Running;
        cb.stats.last_start_time = now;
        cb.stats.activations += 1;
    }
    st.running = next;
    log::trace!("context switch: task {cur} -> task {next}");

    if st.is_idle(next) {
        shared.idle_cond.notify_all();
    } else if let Some(thread) = &st.tasks[next].thread {
        thread.unpark();
    }
}

/// Re-evaluate the schedule after tasks were made Ready. The running task
/// keeps the processor unless a more urgent one surfaced.
pub(crate) fn check_preemption(shared: &KernelShared, st: &mut KernelState) {
    context_switch(shared, st);
}

/// Cooperation point for operations that do not otherwise invoke the
/// scheduler: carries out a deferred dispatch request.
pub(crate) fn cooperate(shared: &KernelShared, st: &mut KernelState) {
    if st.dispatch_pending {
        context_switch(shared, st);
    }
}

/// Transition the running task into Blocked with the given wait bookkeeping.
/// The caller requests a context switch afterwards; the primitive is
/// responsible for wait-set membership.
pub(crate) fn block_current(
    st: &mut KernelState,
    me: TaskId,
    reason: BlockReason,
    object: Option<WaitObject>,
    payload: WaitPayload,
    deadline: Option<Time32>,
) {
    debug_assert_eq!(st.running, me);
    debug_assert!(reason != BlockReason::None);
    account_deschedule(st, me);
    let cb = &mut st.tasks[me];
    cb.st = TaskState::Blocked;
    cb.wait.reason = reason;
    cb.wait.object = object;
    cb.wait.payload = payload;
    cb.wait.deadline = deadline;
    cb.wait.result = Ok(());
    st.blocked.push(me);
}

/// End a task's wait with the given result and make it Ready. The block
/// fields are cleared before the task can resume, which is what lets the
/// resuming side tell acquisition, timeout and object deletion apart.
pub(crate) fn complete_wait(st: &mut KernelState, id: TaskId, result: Result<(), WaitFailure>) {
    let cb = &mut st.tasks[id];
    assert_eq!(cb.st, TaskState::Blocked, "wait completion on a non-blocked task");
    cb.wait.clear_block();
    cb.wait.result = result;
    cb.st = TaskState::Ready;
    let level = usize::from(cb.effective_priority);
    st.blocked.retain(|&t| t != id);
    st.ready.push_back(level, id);
}

/// Time out a blocked task: unlink it from the primitive's wait set and ready
/// it with a `Timeout` result.
pub(crate) fn expire_wait(st: &mut KernelState, id: TaskId) {
    wait::unlink_from_object(st, id);
    complete_wait(st, id, Err(WaitFailure::Timeout));
}

/// Process one tick: advance the clock, wake expired waits, release periodic
/// tasks, account deadline misses, and drive the round-robin slice.
pub(crate) fn tick_handler(shared: &KernelShared, st: &mut KernelState) {
    if st.run_state != RunState::Running {
        return;
    }

    st.clock = st.clock.wrapping_add(1);
    let now = st.clock;
    if st.running == st.idle {
        st.stats.idle_time += 1;
    }

    let mut woke_any = false;

    // Expired timed waits. The unlink from the primitive's wait set happens
    // here, so a timed-out waiter never touches the primitive again.
    let expired: Vec<TaskId> = st
        .blocked
        .iter()
        .copied()
        .filter(|&id| st.tasks[id].wait.deadline.map_or(false, |d| d <= now))
        .collect();
    for id in expired {
        if st.tasks[id].wait.reason == BlockReason::Delay {
            complete_wait(st, id, Ok(()));
        } else {
            expire_wait(st, id);
        }
        woke_any = true;
    }

    // Periodic releases.
    let idle = st.idle;
    let periodic: Vec<TaskId> = st
        .tasks
        .iter()
        .filter(|(id, cb)| cb.is_periodic() && *id != idle)
        .map(|(id, _)| id)
        .collect();
    for id in periodic {
        if now < st.tasks[id].next_release {
            continue;
        }

        let missed = {
            let cb = &st.tasks[id];
            cb.job_active && now > cb.absolute_deadline
        };
        if missed {
            st.stats.deadline_misses += 1;
            let cb = &mut st.tasks[id];
            cb.stats.deadline_misses += 1;
            log::warn!(
                "task '{}' missed deadline (abs={}, now={})",
                cb.name,
                cb.absolute_deadline,
                now
            );
        }

        let cb = &mut st.tasks[id];
        // Stamp the released job's deadline from this boundary, then re-arm.
        let release_time = cb.next_release;
        cb.absolute_deadline = release_time.saturating_add(cb.deadline);
        cb.next_release = release_time.saturating_add(cb.period);
        cb.job_active = true;
        let tstate = cb.st;
        log::debug!(
            "released periodic task '{}' (next={}, deadline={})",
            cb.name,
            cb.next_release,
            cb.absolute_deadline
        );

        match tstate {
            TaskState::Blocked => {
                wait::unlink_from_object(st, id);
                let completed_delay = st.tasks[id].wait.reason == BlockReason::Delay;
                let result = if completed_delay {
                    Ok(())
                } else {
                    // Forced off an IPC wait by its release; the blocking
                    // call reports a timeout.
                    Err(WaitFailure::Timeout)
                };
                complete_wait(st, id, result);
                woke_any = true;
            }
            TaskState::Suspended => {
                st.suspended.retain(|&t| t != id);
                let cb = &mut st.tasks[id];
                cb.st = TaskState::Ready;
                let level = usize::from(cb.effective_priority);
                st.ready.push_back(level, id);
                woke_any = true;
            }
            _ => {}
        }
    }

    // Round-robin slice.
    let mut slice_expired = false;
    if st.policy == Policy::RoundRobin && st.running != st.idle {
        let running = st.running;
        let cb = &mut st.tasks[running];
        cb.slice_left = cb.slice_left.saturating_sub(1);
        slice_expired = cb.slice_left == 0;
    }

    if (woke_any || slice_expired) && st.lock_depth == 0 {
        context_switch(shared, st);
    }
}

fn ticker_main(weak: std::sync::Weak<KernelShared>, period_ms: u32) {
    loop {
        std::thread::sleep(std::time::Duration::from_millis(u64::from(period_ms)));
        let Some(shared) = weak.upgrade() else { return };
        let mut st = shared.lock();
        if st.shutdown || st.run_state != RunState::Running {
            st.ticker_running = false;
            return;
        }
        tick_handler(&shared, &mut st);
    }
}

impl Kernel {
    /// Start the scheduler and dispatch the most urgent ready task. With
    /// `Cfg::auto_tick` a timer thread is spawned that delivers a tick every
    /// configured tick period; otherwise the embedder drives [`Kernel::tick`].
    pub fn start(&self) {
        let mut st = self.shared.lock();
        if st.run_state == RunState::Running {
            log::warn!("scheduler already running");
            return;
        }
        st.run_state = RunState::Running;
        log::info!("starting scheduler (policy: {})", st.policy);
        context_switch(&self.shared, &mut st);

        if st.cfg.auto_tick && !st.ticker_running {
            let period = st.cfg.tick_period_ms;
            let weak = Arc::downgrade(&self.shared);
            let spawned = std::thread::Builder::new()
                .name("vesta-tick".to_owned())
                .spawn(move || ticker_main(weak, period));
            match spawned {
                Ok(_) => st.ticker_running = true,
                Err(err) => log::error!("could not spawn the tick driver: {err}"),
            }
        }
    }

    /// Stop scheduling. Tasks keep their states; the running task continues
    /// until its next cooperation point and no further switches occur until
    /// [`Kernel::start`] is called again.
    pub fn stop(&self) {
        let mut st = self.shared.lock();
        if st.run_state == RunState::Stopped {
            log::warn!("scheduler already stopped");
            return;
        }
        st.run_state = RunState::Stopped;
        log::info!("stopped scheduler");
    }

    /// Deliver one tick to the scheduler. Callable from a task (modelling a
    /// timer interrupt taken while it runs) or from any other thread (the
    /// tick driver, the boot thread).
    pub fn tick(&self) {
        let mut st = self.shared.lock();
        tick_handler(&self.shared, &mut st);
        drop(st);
        threading::settle(&self.shared);
    }

    pub fn set_policy(&self, policy: Policy) {
        let mut st = self.shared.lock();
        log::info!("changing scheduling policy from {} to {}", st.policy, policy);
        st.policy = policy;
    }

    pub fn policy(&self) -> Policy {
        self.shared.lock().policy
    }

    /// Prevent context switches until the matching [`Kernel::unlock`].
    /// Nestable.
    pub fn lock(&self) {
        let mut st = self.shared.lock();
        st.lock_depth += 1;
    }

    /// Undo one [`Kernel::lock`]; the call that drops the depth to zero
    /// performs the context switch that was withheld.
    pub fn unlock(&self) {
        let mut st = self.shared.lock();
        if st.lock_depth > 0 {
            st.lock_depth -= 1;
        }
        if st.lock_depth == 0 {
            context_switch(&self.shared, &mut st);
        }
        drop(st);
        threading::settle(&self.shared);
    }

    /// Current tick count.
    pub fn now(&self) -> Time32 {
        self.shared.lock().clock
    }

    /// Uptime in milliseconds.
    pub fn uptime_ms(&self) -> u32 {
        let st = self.shared.lock();
        time::ticks_to_ms(st.cfg.tick_period_ms, st.clock)
    }

    /// Convert milliseconds to ticks under the configured tick period,
    /// rounding up.
    pub fn ms_to_ticks(&self, ms: u32) -> Time32 {
        let st = self.shared.lock();
        time::ms_to_ticks(st.cfg.tick_period_ms, ms)
    }

    /// Convert ticks to milliseconds under the configured tick period.
    pub fn ticks_to_ms(&self, ticks: Time32) -> u32 {
        let st = self.shared.lock();
        time::ticks_to_ms(st.cfg.tick_period_ms, ticks)
    }

    /// Scheduler statistics snapshot.
    pub fn stats(&self) -> SchedulerStats {
        let st = self.shared.lock();
        let uptime = st.clock;
        let cpu_load = if uptime == 0 {
            0.0
        } else {
            (1.0 - st.stats.idle_time as f32 / uptime as f32).clamp(0.0, 1.0)
        };
        SchedulerStats {
            context_switches: st.stats.context_switches,
            tasks_created: st.stats.tasks_created,
            tasks_deleted: st.stats.tasks_deleted,
            scheduler_invocations: st.stats.scheduler_invocations,
            idle_time: st.stats.idle_time,
            system_time: uptime,
            cpu_load,
            deadline_misses: st.stats.deadline_misses,
        }
    }

    /// Reset the scheduler counters. Uptime and the task creation/deletion
    /// totals are preserved.
    pub fn reset_stats(&self) {
        let mut st = self.shared.lock();
        let kept = SchedStats {
            tasks_created: st.stats.tasks_created,
            tasks_deleted: st.stats.tasks_deleted,
            ..SchedStats::default()
        };
        st.stats = kept;
    }

    /// Block the calling (non-task) thread until no task is runnable. This is
    /// the simulation's quiescence point, used by tick drivers and tests to
    /// synchronize with task execution.
    pub fn wait_for_idle(&self) {
        let mut st = self.shared.lock();
        while st.running != st.idle && !st.shutdown {
            st = self.shared.idle_cond.wait(st).unwrap();
        }
    }
}

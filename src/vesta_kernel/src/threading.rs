//! Context substrate: tasks as parked host threads
//!
//! Every task is backed by a host thread that is allowed to run only while
//! the scheduler names it the running task. Relinquishing the processor is a
//! `park` on the own thread; dispatching is an `unpark` of the target. The
//! parked side re-checks the schedule under the kernel lock on every wakeup,
//! so a stray or early unpark is harmless.
//!
//! A terminated-while-parked task (deleted, or torn down at shutdown) leaves
//! its blocking call by unwinding with [`ExitThread`]; the spawn wrapper
//! catches it and lets the thread end quietly. Any other panic in a task body
//! terminates only that task.
use std::{
    cell::RefCell,
    io,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, Weak},
    thread,
};

use crate::{
    cfg::MIN_HOST_STACK,
    state::KernelShared,
    task::{self, TaskId},
};

/// Unwind payload used to force a task thread out of its entry function.
pub(crate) struct ExitThread;

struct CurrentTask {
    shared: Weak<KernelShared>,
    id: TaskId,
}

thread_local! {
    static CURRENT: RefCell<Option<CurrentTask>> = const { RefCell::new(None) };
}

/// The task owning the calling thread, if the thread is a task thread of
/// `shared`'s kernel.
pub(crate) fn current_task(shared: &KernelShared) -> Option<TaskId> {
    CURRENT.with(|cell| {
        let cur = cell.borrow();
        let cur = cur.as_ref()?;
        (cur.shared.as_ptr() == shared as *const _).then_some(cur.id)
    })
}

/// Spawn the host thread backing a task. The thread stays parked until the
/// scheduler dispatches the task for the first time.
pub(crate) fn spawn(
    shared: Arc<KernelShared>,
    id: TaskId,
    name: &str,
    stack_size: usize,
    entry: Box<dyn FnOnce() + Send + 'static>,
) -> io::Result<thread::Thread> {
    let builder = thread::Builder::new()
        .name(name.to_owned())
        .stack_size(stack_size.max(MIN_HOST_STACK));

    let handle = builder.spawn(move || {
        CURRENT.with(|cell| {
            *cell.borrow_mut() = Some(CurrentTask {
                shared: Arc::downgrade(&shared),
                id,
            });
        });

        // Wait to be dispatched for the first time.
        if !wait_until_running(&shared, id) {
            log::trace!("task thread {id} torn down before first dispatch");
            return;
        }

        let result = catch_unwind(AssertUnwindSafe(entry));

        let panicked = match result {
            Ok(()) => false,
            Err(payload) if payload.is::<ExitThread>() => return,
            Err(_) => {
                log::error!("task thread {id} panicked; terminating the task");
                true
            }
        };

        task::finalize_current(&shared, id, panicked);
    })?;

    Ok(handle.thread().clone())
}

/// Park until the scheduler names `me` the running task. Returns `false` if
/// the task was terminated or the kernel shut down instead.
pub(crate) fn wait_until_running(shared: &KernelShared, me: TaskId) -> bool {
    loop {
        {
            let st = shared.lock();
            if st.shutdown {
                return false;
            }
            match st.tasks.get(me) {
                None => return false,
                Some(t) if t.st == task::TaskState::Terminated => return false,
                _ => {}
            }
            if st.running == me {
                return true;
            }
        }
        thread::park();
    }
}

/// Cooperation point: called after every kernel operation made from task
/// context, once the critical section has been left. Returns immediately if
/// the caller is still the running task; otherwise parks until it is
/// rescheduled, and unwinds with [`ExitThread`] if it never will be.
pub(crate) fn settle(shared: &KernelShared) {
    let Some(me) = current_task(shared) else {
        return;
    };

    if !wait_until_running(shared, me) {
        // `resume_unwind` bypasses the panic hook; this is teardown, not a
        // fault.
        std::panic::resume_unwind(Box::new(ExitThread));
    }
}

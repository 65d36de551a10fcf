//! Wait state carried by a blocked task
//!
//! The waking side completes the whole operation on behalf of the waiter: a
//! semaphore handoff, a message copy, the matched event bits. The waiter only
//! inspects [`TaskWait::result`] (and its payload) after being rescheduled,
//! so acquisition, timeout and object deletion are told apart without the
//! waiter touching the primitive again.
use crate::{event_group::EventOptions, state::KernelState, task::TaskId, time::Time32};

/// Why a task is blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    /// Not blocked.
    None,
    /// `delay` / `delay_until` / waiting for the next periodic release.
    Delay,
    /// Waiting on a semaphore.
    Semaphore,
    /// Waiting for space in a full message queue.
    QueueFull,
    /// Waiting for a message in an empty queue.
    QueueEmpty,
    /// Waiting on an event group.
    Event,
    /// Waiting on a mutex.
    Mutex,
}

/// The primitive a blocked task sits in the wait set of; used to unlink the
/// task when its timeout expires or the task is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitObject {
    Semaphore(usize),
    Mutex(usize),
    QueueSend(usize),
    QueueRecv(usize),
    Event(usize),
}

/// Per-wait data stashed in the TCB while the task is blocked.
#[derive(Debug)]
pub(crate) enum WaitPayload {
    None,
    Semaphore,
    Mutex,
    /// The outgoing message, copied into the ring (or straight to a waiting
    /// receiver) by whoever makes room.
    QueueSend(Box<[u8]>),
    /// Filled in by the sender performing the rendezvous.
    QueueRecv(Option<Box<[u8]>>),
    /// Wanted mask and options; `matched` is recorded by the waker.
    Event {
        wanted: u32,
        options: EventOptions,
        matched: u32,
    },
}

/// How a wait ended when it did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitFailure {
    Timeout,
    Destroyed,
}

/// Wait bookkeeping embedded in every TCB.
#[derive(Debug)]
pub(crate) struct TaskWait {
    pub(crate) reason: BlockReason,
    pub(crate) object: Option<WaitObject>,
    /// Absolute tick at which the wait times out; `None` waits forever.
    pub(crate) deadline: Option<Time32>,
    pub(crate) payload: WaitPayload,
    /// Outcome of the last wait, recorded by the waking side.
    pub(crate) result: Result<(), WaitFailure>,
}

impl TaskWait {
    pub(crate) fn new() -> Self {
        Self {
            reason: BlockReason::None,
            object: None,
            deadline: None,
            payload: WaitPayload::None,
            result: Ok(()),
        }
    }

    /// Clear the block fields, leaving `payload` and `result` for the
    /// resuming task to pick up.
    pub(crate) fn clear_block(&mut self) {
        self.reason = BlockReason::None;
        self.object = None;
        self.deadline = None;
    }
}

/// Move the wait payload out of a TCB, leaving `WaitPayload::None`.
pub(crate) fn take_payload(st: &mut KernelState, id: TaskId) -> WaitPayload {
    core::mem::replace(&mut st.tasks[id].wait.payload, WaitPayload::None)
}

/// Remove `id` from the wait set of the primitive it is blocked on, if any.
pub(crate) fn unlink_from_object(st: &mut KernelState, id: TaskId) {
    let Some(object) = st.tasks[id].wait.object else {
        return;
    };
    match object {
        WaitObject::Semaphore(s) => {
            if let Some(cb) = st.semaphores.get_mut(s) {
                cb.wait_queue.retain(|&t| t != id);
            }
        }
        WaitObject::Mutex(m) => {
            if let Some(cb) = st.mutexes.get_mut(m) {
                cb.wait_queue.retain(|&t| t != id);
            }
        }
        WaitObject::QueueSend(q) => {
            if let Some(cb) = st.queues.get_mut(q) {
                cb.send_queue.retain(|&t| t != id);
            }
        }
        WaitObject::QueueRecv(q) => {
            if let Some(cb) = st.queues.get_mut(q) {
                cb.recv_queue.retain(|&t| t != id);
            }
        }
        WaitObject::Event(e) => {
            if let Some(cb) = st.event_groups.get_mut(e) {
                cb.wait_queue.retain(|&t| t != id);
            }
        }
    }
}

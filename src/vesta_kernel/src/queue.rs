//! Bounded message queues
//!
//! Fixed-size messages in a FIFO ring of `capacity` slots, with separate
//! sender and receiver wait sets. A send to a waiting receiver hands the
//! message over directly without touching the ring, and a receive that frees
//! a slot backfills it from the head sender. A capacity of zero turns the
//! queue into a synchronous rendezvous channel.
use core::fmt;
use std::{collections::VecDeque, sync::Arc};

use arrayvec::ArrayString;

use crate::{
    cfg::MAX_NAME_LEN,
    error::{CreateQueueError, DeleteObjectError, QueryError, ReceiveQueueError, SendQueueError},
    sched, state,
    state::KernelShared,
    task::TaskId,
    threading,
    time::{self, Time32},
    wait::{self, BlockReason, WaitFailure, WaitObject, WaitPayload},
    Kernel,
};

/// *Queue control block* - the state data of a message queue.
pub(crate) struct QueueCb {
    pub(crate) name: ArrayString<MAX_NAME_LEN>,
    pub(crate) msg_size: usize,
    pub(crate) capacity: usize,
    /// The ring. `ring.len()` is the message count.
    pub(crate) ring: VecDeque<Box<[u8]>>,
    pub(crate) send_queue: VecDeque<TaskId>,
    pub(crate) recv_queue: VecDeque<TaskId>,
}

/// Handle to a bounded message queue.
#[derive(Clone)]
pub struct Queue {
    shared: Arc<KernelShared>,
    id: usize,
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Queue").field(&self.id).finish()
    }
}

impl Kernel {
    /// Create a message queue of `capacity` slots of `msg_size` bytes each.
    /// A zero capacity yields a synchronous queue where every transfer is a
    /// rendezvous.
    pub fn create_queue(
        &self,
        name: &str,
        msg_size: usize,
        capacity: usize,
    ) -> Result<Queue, CreateQueueError> {
        let mut st = self.shared.lock();
        let name = ArrayString::from(name).map_err(|_| CreateQueueError::BadParam)?;
        if msg_size == 0 {
            return Err(CreateQueueError::BadParam);
        }
        if st.queues.len() >= st.cfg.max_queues {
            log::error!("no free queue slots for '{name}'");
            return Err(CreateQueueError::NoCapacity);
        }

        let id = st.queues.insert(QueueCb {
            name,
            msg_size,
            capacity,
            ring: VecDeque::with_capacity(capacity),
            send_queue: VecDeque::new(),
            recv_queue: VecDeque::new(),
        });
        log::info!("created queue '{name}' (msg_size={msg_size}, capacity={capacity})");
        Ok(Queue {
            shared: self.shared.clone(),
            id,
        })
    }
}

impl Queue {
    /// Send a message, blocking for up to `timeout` ticks while the queue is
    /// full. `msg` must be exactly the queue's message size; it is copied.
    pub fn send(&self, msg: &[u8], timeout: Time32) -> Result<(), SendQueueError> {
        let mut st = self.shared.lock();
        let cb = st.queues.get(self.id).ok_or(SendQueueError::BadId)?;
        if msg.len() != cb.msg_size {
            return Err(SendQueueError::BadParam);
        }

        // A waiting receiver means the ring is empty: hand the message over
        // directly.
        if let Some(receiver) = st.queues[self.id].recv_queue.pop_front() {
            st.tasks[receiver].wait.payload = WaitPayload::QueueRecv(Some(msg.into()));
            sched::complete_wait(&mut st, receiver, Ok(()));
            sched::check_preemption(&self.shared, &mut st);
            drop(st);
            threading::settle(&self.shared);
            return Ok(());
        }

        let cb = &mut st.queues[self.id];
        if cb.ring.len() < cb.capacity {
            cb.ring.push_back(msg.into());
            sched::cooperate(&self.shared, &mut st);
            drop(st);
            threading::settle(&self.shared);
            return Ok(());
        }

        if timeout == 0 {
            return Err(SendQueueError::Timeout);
        }

        let me = state::expect_waitable_context(&self.shared, &st)
            .map_err(|_| SendQueueError::BadContext)?;
        let deadline = time::expiry(st.clock, timeout);
        st.queues[self.id].send_queue.push_back(me);
        sched::block_current(
            &mut st,
            me,
            BlockReason::QueueFull,
            Some(WaitObject::QueueSend(self.id)),
            WaitPayload::QueueSend(msg.into()),
            deadline,
        );
        sched::context_switch(&self.shared, &mut st);
        drop(st);
        threading::settle(&self.shared);

        let mut st = self.shared.lock();
        let result = st.tasks[me].wait.result;
        // On success the receiving side consumed the stashed message.
        wait::take_payload(&mut st, me);
        match result {
            Ok(()) => Ok(()),
            Err(WaitFailure::Timeout) => Err(SendQueueError::Timeout),
            Err(WaitFailure::Destroyed) => Err(SendQueueError::Destroyed),
        }
    }

    /// Receive a message into `buf`, blocking for up to `timeout` ticks while
    /// the queue is empty. `buf` must be exactly the queue's message size.
    pub fn receive(&self, buf: &mut [u8], timeout: Time32) -> Result<(), ReceiveQueueError> {
        let mut st = self.shared.lock();
        let cb = st.queues.get(self.id).ok_or(ReceiveQueueError::BadId)?;
        if buf.len() != cb.msg_size {
            return Err(ReceiveQueueError::BadParam);
        }

        if let Some(msg) = st.queues[self.id].ring.pop_front() {
            buf.copy_from_slice(&msg);
            // A slot came free; backfill it from the head sender.
            if let Some(sender) = st.queues[self.id].send_queue.pop_front() {
                let WaitPayload::QueueSend(stash) = wait::take_payload(&mut st, sender) else {
                    unreachable!("sender blocked without a stashed message");
                };
                st.queues[self.id].ring.push_back(stash);
                sched::complete_wait(&mut st, sender, Ok(()));
                sched::check_preemption(&self.shared, &mut st);
            } else {
                sched::cooperate(&self.shared, &mut st);
            }
            drop(st);
            threading::settle(&self.shared);
            return Ok(());
        }

        // Empty ring but a waiting sender: only possible on a zero-capacity
        // queue. Take the message straight from the sender's stash.
        if let Some(sender) = st.queues[self.id].send_queue.pop_front() {
            let WaitPayload::QueueSend(stash) = wait::take_payload(&mut st, sender) else {
                unreachable!("sender blocked without a stashed message");
            };
            buf.copy_from_slice(&stash);
            sched::complete_wait(&mut st, sender, Ok(()));
            sched::check_preemption(&self.shared, &mut st);
            drop(st);
            threading::settle(&self.shared);
            return Ok(());
        }

        if timeout == 0 {
            return Err(ReceiveQueueError::Timeout);
        }

        let me = state::expect_waitable_context(&self.shared, &st)
            .map_err(|_| ReceiveQueueError::BadContext)?;
        let deadline = time::expiry(st.clock, timeout);
        st.queues[self.id].recv_queue.push_back(me);
        sched::block_current(
            &mut st,
            me,
            BlockReason::QueueEmpty,
            Some(WaitObject::QueueRecv(self.id)),
            WaitPayload::QueueRecv(None),
            deadline,
        );
        sched::context_switch(&self.shared, &mut st);
        drop(st);
        threading::settle(&self.shared);

        let mut st = self.shared.lock();
        let result = st.tasks[me].wait.result;
        let payload = wait::take_payload(&mut st, me);
        drop(st);
        match result {
            Ok(()) => {
                let WaitPayload::QueueRecv(Some(msg)) = payload else {
                    unreachable!("receiver woken without a delivered message");
                };
                buf.copy_from_slice(&msg);
                Ok(())
            }
            Err(WaitFailure::Timeout) => Err(ReceiveQueueError::Timeout),
            Err(WaitFailure::Destroyed) => Err(ReceiveQueueError::Destroyed),
        }
    }

    /// Copy the head message into `buf` without removing it. Returns
    /// `Ok(false)` if the queue is empty. Never blocks.
    pub fn peek(&self, buf: &mut [u8]) -> Result<bool, ReceiveQueueError> {
        let st = self.shared.lock();
        let cb = st.queues.get(self.id).ok_or(ReceiveQueueError::BadId)?;
        if buf.len() != cb.msg_size {
            return Err(ReceiveQueueError::BadParam);
        }
        match cb.ring.front() {
            Some(msg) => {
                buf.copy_from_slice(msg);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Number of messages currently queued.
    pub fn len(&self) -> Result<usize, QueryError> {
        let st = self.shared.lock();
        let cb = st.queues.get(self.id).ok_or(QueryError::BadId)?;
        Ok(cb.ring.len())
    }

    pub fn is_empty(&self) -> Result<bool, QueryError> {
        Ok(self.len()? == 0)
    }

    pub fn capacity(&self) -> Result<usize, QueryError> {
        let st = self.shared.lock();
        let cb = st.queues.get(self.id).ok_or(QueryError::BadId)?;
        Ok(cb.capacity)
    }

    /// Delete the queue. Blocked senders and receivers are woken and their
    /// calls report the deletion.
    pub fn delete(self) -> Result<(), DeleteObjectError> {
        let mut st = self.shared.lock();
        let cb = st
            .queues
            .try_remove(self.id)
            .ok_or(DeleteObjectError::BadId)?;
        if !cb.send_queue.is_empty() || !cb.recv_queue.is_empty() {
            log::warn!("deleting queue '{}' with waiting tasks", cb.name);
        }
        for waiter in cb.send_queue.into_iter().chain(cb.recv_queue) {
            sched::complete_wait(&mut st, waiter, Err(WaitFailure::Destroyed));
        }
        log::info!("deleted queue '{}'", cb.name);
        sched::check_preemption(&self.shared, &mut st);
        drop(st);
        threading::settle(&self.shared);
        Ok(())
    }
}

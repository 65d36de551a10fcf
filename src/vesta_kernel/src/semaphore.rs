//! Semaphores
//!
//! Counting semaphores with a FIFO wait set. `give` to a non-empty wait set
//! hands the permit straight to the head waiter without touching the count,
//! so a resumed `take` must not decrement again.
use core::fmt;
use std::{collections::VecDeque, sync::Arc};

use arrayvec::ArrayString;

use crate::{
    cfg::MAX_NAME_LEN,
    error::{
        CreateSemaphoreError, DeleteObjectError, GiveSemaphoreError, QueryError,
        TakeSemaphoreError,
    },
    sched, state,
    state::KernelShared,
    task::TaskId,
    threading,
    time::{self, Time32},
    wait::{BlockReason, WaitFailure, WaitObject, WaitPayload},
    Kernel,
};

/// *Semaphore control block* - the state data of a semaphore.
pub(crate) struct SemaphoreCb {
    pub(crate) name: ArrayString<MAX_NAME_LEN>,
    pub(crate) count: u32,
    pub(crate) max_count: u32,
    pub(crate) wait_queue: VecDeque<TaskId>,
}

/// Handle to a counting semaphore.
#[derive(Clone)]
pub struct Semaphore {
    shared: Arc<KernelShared>,
    id: usize,
}

impl fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Semaphore").field(&self.id).finish()
    }
}

impl Kernel {
    /// Create a counting semaphore with the given initial and maximum count.
    pub fn create_semaphore(
        &self,
        name: &str,
        initial: u32,
        max_count: u32,
    ) -> Result<Semaphore, CreateSemaphoreError> {
        let mut st = self.shared.lock();
        let name = ArrayString::from(name).map_err(|_| CreateSemaphoreError::BadParam)?;
        if max_count == 0 || initial > max_count {
            return Err(CreateSemaphoreError::BadParam);
        }
        if st.semaphores.len() >= st.cfg.max_semaphores {
            log::error!("no free semaphore slots for '{name}'");
            return Err(CreateSemaphoreError::NoCapacity);
        }

        let id = st.semaphores.insert(SemaphoreCb {
            name,
            count: initial,
            max_count,
            wait_queue: VecDeque::new(),
        });
        log::info!("created semaphore '{name}' (count={initial}, max={max_count})");
        Ok(Semaphore {
            shared: self.shared.clone(),
            id,
        })
    }
}

impl Semaphore {
    /// Acquire one permit, blocking for up to `timeout` ticks. A zero timeout
    /// polls; [`MAX_TIMEOUT`](crate::MAX_TIMEOUT) waits forever.
    pub fn take(&self, timeout: Time32) -> Result<(), TakeSemaphoreError> {
        let mut st = self.shared.lock();
        let cb = st
            .semaphores
            .get_mut(self.id)
            .ok_or(TakeSemaphoreError::BadId)?;

        if cb.count > 0 {
            cb.count -= 1;
            sched::cooperate(&self.shared, &mut st);
            drop(st);
            threading::settle(&self.shared);
            return Ok(());
        }
        if timeout == 0 {
            return Err(TakeSemaphoreError::Timeout);
        }

        let me = state::expect_waitable_context(&self.shared, &st)
            .map_err(|_| TakeSemaphoreError::BadContext)?;
        let deadline = time::expiry(st.clock, timeout);
        st.semaphores[self.id].wait_queue.push_back(me);
        sched::block_current(
            &mut st,
            me,
            BlockReason::Semaphore,
            Some(WaitObject::Semaphore(self.id)),
            WaitPayload::Semaphore,
            deadline,
        );
        sched::context_switch(&self.shared, &mut st);
        drop(st);
        threading::settle(&self.shared);

        // A successful giver has performed the handoff; the count stays as
        // it is.
        let st = self.shared.lock();
        match st.tasks[me].wait.result {
            Ok(()) => Ok(()),
            Err(WaitFailure::Timeout) => Err(TakeSemaphoreError::Timeout),
            Err(WaitFailure::Destroyed) => Err(TakeSemaphoreError::Destroyed),
        }
    }

    /// Release one permit. Wakes the head waiter if there is one (direct
    /// handoff), otherwise increments the count up to `max_count`.
    pub fn give(&self) -> Result<(), GiveSemaphoreError> {
        let mut st = self.shared.lock();
        if st.semaphores.get(self.id).is_none() {
            return Err(GiveSemaphoreError::BadId);
        }

        if let Some(waiter) = st.semaphores[self.id].wait_queue.pop_front() {
            sched::complete_wait(&mut st, waiter, Ok(()));
            sched::check_preemption(&self.shared, &mut st);
        } else {
            let cb = &mut st.semaphores[self.id];
            if cb.count >= cb.max_count {
                log::warn!("semaphore '{}' already at maximum count", cb.name);
                return Err(GiveSemaphoreError::AtMax);
            }
            cb.count += 1;
            sched::cooperate(&self.shared, &mut st);
        }
        drop(st);
        threading::settle(&self.shared);
        Ok(())
    }

    /// The current permit count.
    pub fn count(&self) -> Result<u32, QueryError> {
        let st = self.shared.lock();
        let cb = st.semaphores.get(self.id).ok_or(QueryError::BadId)?;
        Ok(cb.count)
    }

    /// Delete the semaphore. Waiters are woken and their `take` reports the
    /// deletion.
    pub fn delete(self) -> Result<(), DeleteObjectError> {
        let mut st = self.shared.lock();
        let cb = st
            .semaphores
            .try_remove(self.id)
            .ok_or(DeleteObjectError::BadId)?;
        if !cb.wait_queue.is_empty() {
            log::warn!("deleting semaphore '{}' with waiting tasks", cb.name);
        }
        for waiter in cb.wait_queue {
            sched::complete_wait(&mut st, waiter, Err(WaitFailure::Destroyed));
        }
        log::info!("deleted semaphore '{}'", cb.name);
        sched::check_preemption(&self.shared, &mut st);
        drop(st);
        threading::settle(&self.shared);
        Ok(())
    }
}

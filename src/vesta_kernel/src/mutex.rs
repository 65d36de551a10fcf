//! Mutexes with priority inheritance
//!
//! Single-level inheritance: a more urgent task blocking on a held mutex
//! raises the owner's effective priority to its own; the owner's unlock
//! restores its base priority. Ownership is transferred to the most urgent
//! waiter during unlock, so a task barging in between the unlock and the
//! waiter's resumption finds the mutex already owned.
//!
//! Inheritance does not propagate through chains of held mutexes; that is an
//! accepted limitation of the design.
use core::fmt;
use std::{collections::VecDeque, sync::Arc};

use arrayvec::ArrayString;

use crate::{
    cfg::MAX_NAME_LEN,
    error::{CreateMutexError, DeleteObjectError, LockMutexError, QueryError, UnlockMutexError},
    sched, state,
    state::{KernelShared, KernelState},
    task::{TaskId, TaskState},
    threading,
    time::{self, Time32},
    wait::{BlockReason, WaitFailure, WaitObject, WaitPayload},
    Kernel,
};

/// *Mutex control block* - the state data of a mutex.
pub(crate) struct MutexCb {
    pub(crate) name: ArrayString<MAX_NAME_LEN>,
    /// The task that currently owns the lock.
    pub(crate) owner: Option<TaskId>,
    pub(crate) wait_queue: VecDeque<TaskId>,
}

/// Handle to a priority-inheritance mutex.
#[derive(Clone)]
pub struct Mutex {
    shared: Arc<KernelShared>,
    id: usize,
}

impl fmt::Debug for Mutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Mutex").field(&self.id).finish()
    }
}

impl Kernel {
    pub fn create_mutex(&self, name: &str) -> Result<Mutex, CreateMutexError> {
        let mut st = self.shared.lock();
        let name = ArrayString::from(name).map_err(|_| CreateMutexError::BadParam)?;
        if st.mutexes.len() >= st.cfg.max_mutexes {
            log::error!("no free mutex slots for '{name}'");
            return Err(CreateMutexError::NoCapacity);
        }

        let id = st.mutexes.insert(MutexCb {
            name,
            owner: None,
            wait_queue: VecDeque::new(),
        });
        log::info!("created mutex '{name}'");
        Ok(Mutex {
            shared: self.shared.clone(),
            id,
        })
    }
}

/// Raise a task's effective priority to `priority` if that is more urgent,
/// re-filing it if it is queued Ready.
fn raise_effective(st: &mut KernelState, id: TaskId, priority: u8) {
    let cb = &st.tasks[id];
    let old = cb.effective_priority;
    if priority >= old {
        return;
    }
    let requeue = cb.st == TaskState::Ready;
    st.tasks[id].effective_priority = priority;
    if requeue {
        st.ready.remove(usize::from(old), id);
        st.ready.push_back(usize::from(priority), id);
    }
    log::debug!("task '{}' inherits priority {}", st.tasks[id].name, priority);
}

/// Restore a task's effective priority to its base priority.
fn restore_base(st: &mut KernelState, id: TaskId) {
    let cb = &st.tasks[id];
    let (old, base) = (cb.effective_priority, cb.base_priority);
    if old == base {
        return;
    }
    let requeue = cb.st == TaskState::Ready;
    st.tasks[id].effective_priority = base;
    if requeue {
        st.ready.remove(usize::from(old), id);
        st.ready.push_back(usize::from(base), id);
    }
}

/// Remove and return the most urgent waiter; FIFO among equals.
fn pick_waiter(st: &mut KernelState, mutex_id: usize) -> Option<TaskId> {
    let queue = &st.mutexes[mutex_id].wait_queue;
    let mut best: Option<(u8, usize)> = None;
    for (pos, &waiter) in queue.iter().enumerate() {
        let priority = st.tasks[waiter].effective_priority;
        if best.map_or(true, |(p, _)| priority < p) {
            best = Some((priority, pos));
        }
    }
    let (_, pos) = best?;
    st.mutexes[mutex_id].wait_queue.remove(pos)
}

/// Hand every mutex owned by a dying task over to its best waiter.
pub(crate) fn abandon_held(st: &mut KernelState, id: TaskId) {
    let owned: Vec<usize> = st
        .mutexes
        .iter()
        .filter(|(_, cb)| cb.owner == Some(id))
        .map(|(m, _)| m)
        .collect();
    for m in owned {
        log::warn!("mutex '{}' abandoned by its owner", st.mutexes[m].name);
        match pick_waiter(st, m) {
            Some(next) => {
                st.mutexes[m].owner = Some(next);
                sched::complete_wait(st, next, Ok(()));
            }
            None => st.mutexes[m].owner = None,
        }
    }
}

impl Mutex {
    /// Acquire the lock, blocking for up to `timeout` ticks. Recursive
    /// locking is rejected. While blocked, the caller lends its priority to
    /// the owner if it is the more urgent of the two.
    pub fn lock(&self, timeout: Time32) -> Result<(), LockMutexError> {
        let mut st = self.shared.lock();
        if st.mutexes.get(self.id).is_none() {
            return Err(LockMutexError::BadId);
        }
        let me = state::expect_waitable_context(&self.shared, &st)
            .map_err(|_| LockMutexError::BadContext)?;

        let owner = st.mutexes[self.id].owner;
        if owner == Some(me) {
            log::warn!(
                "task '{}' attempted to re-lock mutex '{}' it already owns",
                st.tasks[me].name,
                st.mutexes[self.id].name
            );
            return Err(LockMutexError::WouldDeadlock);
        }

        let Some(owner) = owner else {
            st.mutexes[self.id].owner = Some(me);
            sched::cooperate(&self.shared, &mut st);
            drop(st);
            threading::settle(&self.shared);
            return Ok(());
        };

        if timeout == 0 {
            return Err(LockMutexError::Timeout);
        }

        // Single-level priority inheritance.
        let my_priority = st.tasks[me].effective_priority;
        raise_effective(&mut st, owner, my_priority);

        let deadline = time::expiry(st.clock, timeout);
        st.mutexes[self.id].wait_queue.push_back(me);
        sched::block_current(
            &mut st,
            me,
            BlockReason::Mutex,
            Some(WaitObject::Mutex(self.id)),
            WaitPayload::Mutex,
            deadline,
        );
        sched::context_switch(&self.shared, &mut st);
        drop(st);
        threading::settle(&self.shared);

        // On success the unlocking side has already made us the owner.
        let st = self.shared.lock();
        match st.tasks[me].wait.result {
            Ok(()) => Ok(()),
            Err(WaitFailure::Timeout) => Err(LockMutexError::Timeout),
            Err(WaitFailure::Destroyed) => Err(LockMutexError::Destroyed),
        }
    }

    /// Release the lock. The caller's effective priority is restored, and
    /// ownership passes to the most urgent waiter, if any.
    pub fn unlock(&self) -> Result<(), UnlockMutexError> {
        let mut st = self.shared.lock();
        if st.mutexes.get(self.id).is_none() {
            return Err(UnlockMutexError::BadId);
        }
        let caller = state::running_caller(&self.shared, &st);
        if st.mutexes[self.id].owner.is_none() || st.mutexes[self.id].owner != caller {
            log::warn!(
                "invalid unlock of mutex '{}' (owner {:?})",
                st.mutexes[self.id].name,
                st.mutexes[self.id].owner
            );
            return Err(UnlockMutexError::NotOwner);
        }
        let me = caller.unwrap();

        restore_base(&mut st, me);

        match pick_waiter(&mut st, self.id) {
            Some(next) => {
                st.mutexes[self.id].owner = Some(next);
                sched::complete_wait(&mut st, next, Ok(()));
                sched::check_preemption(&self.shared, &mut st);
            }
            None => {
                st.mutexes[self.id].owner = None;
                sched::cooperate(&self.shared, &mut st);
            }
        }
        drop(st);
        threading::settle(&self.shared);
        Ok(())
    }

    pub fn is_locked(&self) -> Result<bool, QueryError> {
        let st = self.shared.lock();
        let cb = st.mutexes.get(self.id).ok_or(QueryError::BadId)?;
        Ok(cb.owner.is_some())
    }

    /// Delete the mutex. A boosted owner has its base priority restored;
    /// waiters are woken and their `lock` reports the deletion.
    pub fn delete(self) -> Result<(), DeleteObjectError> {
        let mut st = self.shared.lock();
        let cb = st
            .mutexes
            .try_remove(self.id)
            .ok_or(DeleteObjectError::BadId)?;
        if let Some(owner) = cb.owner {
            log::warn!("deleting locked mutex '{}'", cb.name);
            if st.tasks.get(owner).is_some() {
                restore_base(&mut st, owner);
            }
        }
        if !cb.wait_queue.is_empty() {
            log::warn!("deleting mutex '{}' with waiting tasks", cb.name);
        }
        for waiter in cb.wait_queue {
            sched::complete_wait(&mut st, waiter, Err(WaitFailure::Destroyed));
        }
        log::info!("deleted mutex '{}'", cb.name);
        sched::check_preemption(&self.shared, &mut st);
        drop(st);
        threading::settle(&self.shared);
        Ok(())
    }
}

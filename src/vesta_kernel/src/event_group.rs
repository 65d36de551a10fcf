//! Event groups
//!
//! A 32-bit flag word with one wait set. Waiters name a 24-bit wanted mask
//! and options: wait for all wanted bits or any of them, and optionally clear
//! the wanted bits on a successful wait. `set` sweeps the wait set and wakes
//! every waiter whose predicate now holds, clearing bits per waiter as it
//! goes.
use core::fmt;
use std::{collections::VecDeque, sync::Arc};

use arrayvec::ArrayString;
use bitflags::bitflags;

use crate::{
    cfg::MAX_NAME_LEN,
    error::{
        CreateEventGroupError, DeleteObjectError, QueryError, UpdateEventGroupError,
        WaitEventGroupError,
    },
    sched, state,
    state::KernelShared,
    task::TaskId,
    threading,
    time::{self, Time32},
    wait::{self, BlockReason, WaitFailure, WaitObject, WaitPayload},
    Kernel,
};

bitflags! {
    /// Wait options for [`EventGroup::wait`].
    pub struct EventOptions: u8 {
        /// Require every wanted bit; in its absence, any wanted bit suffices.
        const ALL = 1 << 0;
        /// Atomically clear the wanted bits when the wait succeeds.
        const CLEAR = 1 << 1;
    }
}

/// Widest allowed wanted mask.
const WANTED_MASK: u32 = 0x00ff_ffff;

/// *Event group control block* - the state data of an event group.
pub(crate) struct EventGroupCb {
    pub(crate) name: ArrayString<MAX_NAME_LEN>,
    pub(crate) flags: u32,
    pub(crate) wait_queue: VecDeque<TaskId>,
}

/// Handle to an event flag group.
#[derive(Clone)]
pub struct EventGroup {
    shared: Arc<KernelShared>,
    id: usize,
}

impl fmt::Debug for EventGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EventGroup").field(&self.id).finish()
    }
}

/// Check a wait condition `(wanted, options)` against the flag word. On
/// success, clears bits if requested and returns the matched bits.
fn poll_core(flags: &mut u32, wanted: u32, options: EventOptions) -> Option<u32> {
    let satisfied = if options.contains(EventOptions::ALL) {
        (*flags & wanted) == wanted
    } else {
        (*flags & wanted) != 0
    };
    if !satisfied {
        return None;
    }
    let matched = *flags & wanted;
    if options.contains(EventOptions::CLEAR) {
        *flags &= !wanted;
    }
    Some(matched)
}

impl Kernel {
    pub fn create_event_group(&self, name: &str) -> Result<EventGroup, CreateEventGroupError> {
        let mut st = self.shared.lock();
        let name = ArrayString::from(name).map_err(|_| CreateEventGroupError::BadParam)?;
        if st.event_groups.len() >= st.cfg.max_event_groups {
            log::error!("no free event group slots for '{name}'");
            return Err(CreateEventGroupError::NoCapacity);
        }

        let id = st.event_groups.insert(EventGroupCb {
            name,
            flags: 0,
            wait_queue: VecDeque::new(),
        });
        log::info!("created event group '{name}'");
        Ok(EventGroup {
            shared: self.shared.clone(),
            id,
        })
    }
}

impl EventGroup {
    /// Set flag bits and wake every waiter whose predicate becomes true.
    /// Returns the previous flag value.
    pub fn set(&self, bits: u32) -> Result<u32, UpdateEventGroupError> {
        let mut st = self.shared.lock();
        let cb = st
            .event_groups
            .get_mut(self.id)
            .ok_or(UpdateEventGroupError::BadId)?;
        let previous = cb.flags;
        cb.flags |= bits;

        let mut flags = cb.flags;
        let waiters: Vec<TaskId> = cb.wait_queue.iter().copied().collect();
        let mut woke_any = false;
        for waiter in waiters {
            let (wanted, options) = match &st.tasks[waiter].wait.payload {
                WaitPayload::Event { wanted, options, .. } => (*wanted, *options),
                _ => unreachable!("event waiter without an event payload"),
            };
            let Some(matched) = poll_core(&mut flags, wanted, options) else {
                continue;
            };
            if let WaitPayload::Event { matched: slot, .. } = &mut st.tasks[waiter].wait.payload {
                *slot = matched;
            }
            st.event_groups[self.id].wait_queue.retain(|&t| t != waiter);
            sched::complete_wait(&mut st, waiter, Ok(()));
            woke_any = true;
        }
        st.event_groups[self.id].flags = flags;

        if woke_any {
            sched::check_preemption(&self.shared, &mut st);
        } else {
            sched::cooperate(&self.shared, &mut st);
        }
        drop(st);
        threading::settle(&self.shared);
        Ok(previous)
    }

    /// Clear the bits in `mask`. Returns the previous flag value.
    pub fn clear(&self, mask: u32) -> Result<u32, UpdateEventGroupError> {
        let mut st = self.shared.lock();
        let cb = st
            .event_groups
            .get_mut(self.id)
            .ok_or(UpdateEventGroupError::BadId)?;
        let previous = cb.flags;
        cb.flags &= !mask;
        Ok(previous)
    }

    /// The current flag word.
    pub fn get(&self) -> Result<u32, QueryError> {
        let st = self.shared.lock();
        let cb = st.event_groups.get(self.id).ok_or(QueryError::BadId)?;
        Ok(cb.flags)
    }

    /// Wait for the wanted bits, blocking for up to `timeout` ticks. Returns
    /// the matched bits on success.
    pub fn wait(
        &self,
        wanted: u32,
        options: EventOptions,
        timeout: Time32,
    ) -> Result<u32, WaitEventGroupError> {
        if wanted == 0 || wanted & !WANTED_MASK != 0 {
            return Err(WaitEventGroupError::BadParam);
        }

        let mut st = self.shared.lock();
        let cb = st
            .event_groups
            .get_mut(self.id)
            .ok_or(WaitEventGroupError::BadId)?;

        if let Some(matched) = poll_core(&mut cb.flags, wanted, options) {
            sched::cooperate(&self.shared, &mut st);
            drop(st);
            threading::settle(&self.shared);
            return Ok(matched);
        }
        if timeout == 0 {
            return Err(WaitEventGroupError::Timeout);
        }

        let me = state::expect_waitable_context(&self.shared, &st)
            .map_err(|_| WaitEventGroupError::BadContext)?;
        let deadline = time::expiry(st.clock, timeout);
        st.event_groups[self.id].wait_queue.push_back(me);
        sched::block_current(
            &mut st,
            me,
            BlockReason::Event,
            Some(WaitObject::Event(self.id)),
            WaitPayload::Event {
                wanted,
                options,
                matched: 0,
            },
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
                let WaitPayload::Event { matched, .. } = payload else {
                    unreachable!("event waiter woken without an event payload");
                };
                Ok(matched)
            }
            Err(WaitFailure::Timeout) => Err(WaitEventGroupError::Timeout),
            Err(WaitFailure::Destroyed) => Err(WaitEventGroupError::Destroyed),
        }
    }

    /// Delete the event group. Waiters are woken and their `wait` reports the
    /// deletion.
    pub fn delete(self) -> Result<(), DeleteObjectError> {
        let mut st = self.shared.lock();
        let cb = st
            .event_groups
            .try_remove(self.id)
            .ok_or(DeleteObjectError::BadId)?;
        if !cb.wait_queue.is_empty() {
            log::warn!("deleting event group '{}' with waiting tasks", cb.name);
        }
        for waiter in cb.wait_queue {
            sched::complete_wait(&mut st, waiter, Err(WaitFailure::Destroyed));
        }
        log::info!("deleted event group '{}'", cb.name);
        sched::check_preemption(&self.shared, &mut st);
        drop(st);
        threading::settle(&self.shared);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_any_matches_subset() {
        let mut flags = 0b0101;
        assert_eq!(poll_core(&mut flags, 0b0011, EventOptions::empty()), Some(0b0001));
        assert_eq!(flags, 0b0101);
    }

    #[test]
    fn wait_all_requires_every_bit() {
        let mut flags = 0b0101;
        assert_eq!(poll_core(&mut flags, 0b0111, EventOptions::ALL), None);
        flags |= 0b0010;
        assert_eq!(poll_core(&mut flags, 0b0111, EventOptions::ALL), Some(0b0111));
    }

    #[test]
    fn clear_removes_only_wanted_bits() {
        let mut flags = 0b1111;
        let matched = poll_core(&mut flags, 0b0011, EventOptions::ALL | EventOptions::CLEAR);
        assert_eq!(matched, Some(0b0011));
        assert_eq!(flags, 0b1100);
    }

    #[test]
    fn unsatisfied_leaves_flags_untouched() {
        let mut flags = 0b1000;
        assert_eq!(
            poll_core(&mut flags, 0b0111, EventOptions::CLEAR),
            None
        );
        assert_eq!(flags, 0b1000);
    }
}

//! Error types returned by the kernel API
//!
//! Every fallible operation has its own small error enum listing exactly the
//! failures it can produce. [`ResultKind`] groups the variants into the
//! coarse classes the embedder usually dispatches on. Internal consistency
//! failures are not represented here; those halt the simulation with a panic.
use core::fmt;

/// Coarse classification of an API error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    /// A parameter was rejected before any state changed.
    InvalidArgument,
    /// A fixed-capacity pool (tasks, IPC objects) or the host allocator is
    /// exhausted.
    CapacityExhausted,
    /// The operation is not legal in the current object or caller state.
    StateError,
    /// A blocking call elapsed without its predicate being satisfied.
    Timeout,
    /// The object a task was blocked on was deleted out from under it.
    ObjectDestroyed,
}

macro_rules! define_error {
    (
        $(#[$meta:meta])*
        pub enum $Name:ident {
            $(
                $(#[$vmeta:meta])*
                $Variant:ident => ($kind:ident, $msg:expr),
            )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $Name {
            $( $(#[$vmeta])* $Variant, )+
        }

        impl $Name {
            /// The [`ResultKind`] this error belongs to.
            pub fn kind(self) -> ResultKind {
                match self {
                    $( Self::$Variant => ResultKind::$kind, )+
                }
            }
        }

        impl fmt::Display for $Name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    $( Self::$Variant => f.write_str($msg), )+
                }
            }
        }

        impl std::error::Error for $Name {}
    };
}

define_error! {
    /// Error type for [`Kernel::new`](crate::Kernel::new).
    pub enum CreateKernelError {
        /// The configuration is structurally invalid (no priority levels,
        /// more than 32 of them, a zero tick period, ...).
        BadParam => (InvalidArgument, "invalid kernel configuration"),
    }
}

define_error! {
    /// Error type for [`Kernel::spawn_task`](crate::Kernel::spawn_task).
    pub enum CreateTaskError {
        /// The name is too long, the priority is out of range, or the time
        /// slice is zero.
        BadParam => (InvalidArgument, "invalid task parameters"),
        /// The task pool is full or the host thread could not be created.
        NoCapacity => (CapacityExhausted, "out of task slots"),
    }
}

define_error! {
    /// Error type for [`Kernel::delete_task`](crate::Kernel::delete_task).
    pub enum DeleteTaskError {
        /// The handle does not refer to a live task.
        BadId => (InvalidArgument, "no such task"),
        /// The task is currently running or is the idle task.
        BadObjectState => (StateError, "task cannot be deleted in this state"),
    }
}

define_error! {
    /// Error type for [`Kernel::suspend`](crate::Kernel::suspend).
    pub enum SuspendTaskError {
        /// The handle does not refer to a live task.
        BadId => (InvalidArgument, "no such task"),
        /// The task is blocked, terminated, or is the idle task.
        BadObjectState => (StateError, "task cannot be suspended in this state"),
    }
}

define_error! {
    /// Error type for [`Kernel::resume`](crate::Kernel::resume).
    pub enum ResumeTaskError {
        /// The handle does not refer to a live task.
        BadId => (InvalidArgument, "no such task"),
    }
}

define_error! {
    /// Error type for [`Kernel::set_priority`](crate::Kernel::set_priority).
    pub enum SetTaskPriorityError {
        /// The handle does not refer to a live task.
        BadId => (InvalidArgument, "no such task"),
        /// The priority is out of range or the task is the idle task.
        BadParam => (InvalidArgument, "invalid priority"),
    }
}

define_error! {
    /// Error type for [`Kernel::set_periodic`](crate::Kernel::set_periodic).
    pub enum SetPeriodicError {
        /// The handle does not refer to a live task.
        BadId => (InvalidArgument, "no such task"),
        /// The period is zero.
        BadParam => (InvalidArgument, "invalid period"),
    }
}

define_error! {
    /// Error type for [`Kernel::delay`](crate::Kernel::delay),
    /// [`Kernel::delay_until`](crate::Kernel::delay_until) and
    /// [`Kernel::yield_now`](crate::Kernel::yield_now).
    pub enum SleepError {
        /// The caller is not a task, or the scheduler lock is held.
        BadContext => (StateError, "not a waitable context"),
    }
}

define_error! {
    /// Error type for [`Kernel::wait_period`](crate::Kernel::wait_period).
    pub enum WaitPeriodError {
        /// The caller is not a task, or the scheduler lock is held.
        BadContext => (StateError, "not a waitable context"),
        /// The calling task is not periodic.
        BadObjectState => (StateError, "task is not periodic"),
    }
}

define_error! {
    /// Error type for lookups through a stale object handle.
    pub enum QueryError {
        /// The handle does not refer to a live object.
        BadId => (InvalidArgument, "no such object"),
    }
}

define_error! {
    /// Error type for [`Kernel::create_semaphore`](crate::Kernel::create_semaphore).
    pub enum CreateSemaphoreError {
        /// `max_count` is zero, `initial` exceeds it, or the name is too long.
        BadParam => (InvalidArgument, "invalid semaphore parameters"),
        /// The semaphore pool is full.
        NoCapacity => (CapacityExhausted, "out of semaphore slots"),
    }
}

define_error! {
    /// Error type for [`Semaphore::take`](crate::Semaphore::take).
    pub enum TakeSemaphoreError {
        /// The handle does not refer to a live semaphore.
        BadId => (InvalidArgument, "no such semaphore"),
        /// The caller is not a task, or the scheduler lock is held.
        BadContext => (StateError, "not a waitable context"),
        /// The timeout elapsed with the count still zero.
        Timeout => (Timeout, "semaphore take timed out"),
        /// The semaphore was deleted while the caller was waiting.
        Destroyed => (ObjectDestroyed, "semaphore deleted while waiting"),
    }
}

define_error! {
    /// Error type for [`Semaphore::give`](crate::Semaphore::give).
    pub enum GiveSemaphoreError {
        /// The handle does not refer to a live semaphore.
        BadId => (InvalidArgument, "no such semaphore"),
        /// The count is already at `max_count`.
        AtMax => (StateError, "semaphore already at maximum count"),
    }
}

define_error! {
    /// Error type for [`Kernel::create_mutex`](crate::Kernel::create_mutex).
    pub enum CreateMutexError {
        /// The name is too long.
        BadParam => (InvalidArgument, "invalid mutex parameters"),
        /// The mutex pool is full.
        NoCapacity => (CapacityExhausted, "out of mutex slots"),
    }
}

define_error! {
    /// Error type for [`Mutex::lock`](crate::Mutex::lock).
    pub enum LockMutexError {
        /// The handle does not refer to a live mutex.
        BadId => (InvalidArgument, "no such mutex"),
        /// The caller is not a task, or the scheduler lock is held.
        BadContext => (StateError, "not a waitable context"),
        /// The calling task already owns the mutex.
        WouldDeadlock => (StateError, "recursive lock"),
        /// The timeout elapsed with the mutex still held.
        Timeout => (Timeout, "mutex lock timed out"),
        /// The mutex was deleted while the caller was waiting.
        Destroyed => (ObjectDestroyed, "mutex deleted while waiting"),
    }
}

define_error! {
    /// Error type for [`Mutex::unlock`](crate::Mutex::unlock).
    pub enum UnlockMutexError {
        /// The handle does not refer to a live mutex.
        BadId => (InvalidArgument, "no such mutex"),
        /// The mutex is unlocked or owned by another task.
        NotOwner => (StateError, "caller does not own the mutex"),
    }
}

define_error! {
    /// Error type for [`Kernel::create_queue`](crate::Kernel::create_queue).
    pub enum CreateQueueError {
        /// `msg_size` is zero or the name is too long. A capacity of zero is
        /// legal and yields a synchronous rendezvous queue.
        BadParam => (InvalidArgument, "invalid queue parameters"),
        /// The queue pool is full.
        NoCapacity => (CapacityExhausted, "out of queue slots"),
    }
}

define_error! {
    /// Error type for [`Queue::send`](crate::Queue::send).
    pub enum SendQueueError {
        /// The handle does not refer to a live queue.
        BadId => (InvalidArgument, "no such queue"),
        /// The message length does not match the queue's message size.
        BadParam => (InvalidArgument, "message size mismatch"),
        /// The caller is not a task, or the scheduler lock is held.
        BadContext => (StateError, "not a waitable context"),
        /// The timeout elapsed with the queue still full.
        Timeout => (Timeout, "queue send timed out"),
        /// The queue was deleted while the caller was waiting.
        Destroyed => (ObjectDestroyed, "queue deleted while waiting"),
    }
}

define_error! {
    /// Error type for [`Queue::receive`](crate::Queue::receive).
    pub enum ReceiveQueueError {
        /// The handle does not refer to a live queue.
        BadId => (InvalidArgument, "no such queue"),
        /// The buffer length does not match the queue's message size.
        BadParam => (InvalidArgument, "buffer size mismatch"),
        /// The caller is not a task, or the scheduler lock is held.
        BadContext => (StateError, "not a waitable context"),
        /// The timeout elapsed with the queue still empty.
        Timeout => (Timeout, "queue receive timed out"),
        /// The queue was deleted while the caller was waiting.
        Destroyed => (ObjectDestroyed, "queue deleted while waiting"),
    }
}

define_error! {
    /// Error type for [`Kernel::create_event_group`](crate::Kernel::create_event_group).
    pub enum CreateEventGroupError {
        /// The name is too long.
        BadParam => (InvalidArgument, "invalid event group parameters"),
        /// The event group pool is full.
        NoCapacity => (CapacityExhausted, "out of event group slots"),
    }
}

define_error! {
    /// Error type for [`EventGroup::wait`](crate::EventGroup::wait).
    pub enum WaitEventGroupError {
        /// The handle does not refer to a live event group.
        BadId => (InvalidArgument, "no such event group"),
        /// The wanted mask is zero or wider than 24 bits.
        BadParam => (InvalidArgument, "invalid wanted mask"),
        /// The caller is not a task, or the scheduler lock is held.
        BadContext => (StateError, "not a waitable context"),
        /// The timeout elapsed with the predicate unsatisfied.
        Timeout => (Timeout, "event wait timed out"),
        /// The event group was deleted while the caller was waiting.
        Destroyed => (ObjectDestroyed, "event group deleted while waiting"),
    }
}

define_error! {
    /// Error type for [`EventGroup::set`](crate::EventGroup::set) and
    /// [`EventGroup::clear`](crate::EventGroup::clear).
    pub enum UpdateEventGroupError {
        /// The handle does not refer to a live event group.
        BadId => (InvalidArgument, "no such event group"),
    }
}

define_error! {
    /// Error type for deleting an IPC object.
    pub enum DeleteObjectError {
        /// The handle does not refer to a live object.
        BadId => (InvalidArgument, "no such object"),
    }
}

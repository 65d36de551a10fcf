//! A tick-driven cooperative RTOS kernel running as a hosted simulation.
//!
//! The kernel multiplexes named tasks over a single logical processor:
//! per-priority ready queues, four runtime-selectable scheduling policies
//! (fixed priority, round-robin, earliest deadline first, rate monotonic),
//! tick-driven delays and periodic releases with deadline accounting, and
//! the usual inter-task primitives - counting semaphores, priority
//! inheritance mutexes, bounded message queues, and event flag groups.
//!
//! Each task is backed by a host thread that only runs while the scheduler
//! names it the running task, so at most one task executes at any instant
//! and "concurrency" is the cooperative interleaving an embedded target
//! would see. Time is a monotonic tick counter: delivered by an embedder
//! calling [`Kernel::tick`], by a task (modelling a timer interrupt taken
//! mid-execution), or by the built-in wall-clock driver
//! ([`Cfg::auto_tick`]).
//!
//! ```no_run
//! use vesta_kernel::{Cfg, Kernel, Policy, TaskOptions, MAX_TIMEOUT};
//!
//! let kernel = Kernel::new(Cfg::default(), Policy::Priority).unwrap();
//! let sem = kernel.create_semaphore("ping", 0, 1).unwrap();
//!
//! let (kernel2, sem2) = (kernel.clone(), sem.clone());
//! kernel
//!     .spawn_task(TaskOptions::new("waiter", 1), move || {
//!         sem2.take(MAX_TIMEOUT).unwrap();
//!         println!("pinged at tick {}", kernel2.now());
//!     })
//!     .unwrap();
//!
//! kernel.start();
//! kernel.wait_for_idle();
//! sem.give().unwrap();
//! kernel.shutdown();
//! ```
use std::sync::{Arc, Condvar, Mutex as StdMutex};

mod cfg;
mod error;
mod event_group;
mod mutex;
mod queue;
mod sched;
mod semaphore;
mod state;
mod task;
mod threading;
mod time;
mod wait;

pub use cfg::Cfg;
pub use error::*;
pub use event_group::{EventGroup, EventOptions};
pub use mutex::Mutex;
pub use queue::Queue;
pub use sched::{Policy, SchedulerStats};
pub use semaphore::Semaphore;
pub use task::{Task, TaskOptions, TaskState, TaskStats};
pub use time::{Time32, MAX_TIMEOUT};
pub use wait::BlockReason;

use state::{KernelShared, KernelState};

/// Cloneable facade over one kernel instance.
///
/// Clones share the same kernel; task entry closures typically capture one.
/// Dropping every clone without calling [`Kernel::shutdown`] leaves parked
/// task threads behind until the process exits.
#[derive(Clone)]
pub struct Kernel {
    pub(crate) shared: Arc<KernelShared>,
}

impl Kernel {
    /// Build a kernel with the given configuration and initial scheduling
    /// policy. The idle task is created here; the scheduler starts stopped.
    pub fn new(cfg: Cfg, policy: Policy) -> Result<Self, CreateKernelError> {
        if !cfg.validate() {
            return Err(CreateKernelError::BadParam);
        }
        log::info!("initializing kernel (policy: {policy})");
        Ok(Self {
            shared: Arc::new(KernelShared {
                state: StdMutex::new(KernelState::new(cfg, policy)),
                idle_cond: Condvar::new(),
            }),
        })
    }

    /// Stop scheduling and terminate every task thread. Blocked and ready
    /// tasks alike unwind and exit; the kernel is unusable afterwards.
    pub fn shutdown(&self) {
        let mut st = self.shared.lock();
        if st.shutdown {
            return;
        }
        log::info!("shutting down kernel");
        st.shutdown = true;
        st.run_state = sched::RunState::Stopped;
        let threads: Vec<std::thread::Thread> = st
            .tasks
            .iter()
            .filter_map(|(_, cb)| cb.thread.clone())
            .collect();
        drop(st);

        for thread in threads {
            thread.unpark();
        }
        self.shared.idle_cond.notify_all();
    }
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.shared.lock();
        f.debug_struct("Kernel")
            .field("policy", &st.policy)
            .field("clock", &st.clock)
            .field("tasks", &st.task_count())
            .finish()
    }
}

//! Kernel configuration
use crate::time::Time32;

/// Maximum number of tasks, including the idle task.
pub const MAX_TASKS: usize = 32;

/// Number of task priority levels. Priority `0` is the most urgent.
pub const PRIORITY_LEVELS: usize = 16;

/// Maximum number of semaphores.
pub const MAX_SEMAPHORES: usize = 16;

/// Maximum number of mutexes.
pub const MAX_MUTEXES: usize = 16;

/// Maximum number of message queues.
pub const MAX_QUEUES: usize = 16;

/// Maximum number of event groups.
pub const MAX_EVENT_GROUPS: usize = 16;

/// Length of a tick in milliseconds.
pub const TICK_PERIOD_MS: u32 = 10;

/// Round-robin time slice in ticks.
pub const DEFAULT_TIME_SLICE: Time32 = 10;

/// Default task stack size in bytes.
///
/// This is the *simulated* stack size. The host threads backing tasks are
/// provisioned with at least [`MIN_HOST_STACK`] bytes so that the workload
/// cannot overflow a real stack merely by formatting a log line.
pub const DEFAULT_STACK_SIZE: usize = 2048;

/// Lower bound for the host thread stack backing a task.
pub const MIN_HOST_STACK: usize = 256 * 1024;

/// Maximum length of a task or IPC object name.
pub const MAX_NAME_LEN: usize = 15;

/// Kernel construction parameters.
///
/// `Cfg::default()` gives the standard configuration above. All limits are
/// validated by [`Kernel::new`](crate::Kernel::new).
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct Cfg {
    /// Number of priority levels, at most 32. The lowest level doubles as the
    /// idle level.
    pub priority_levels: usize,
    /// Maximum number of tasks.
    pub max_tasks: usize,
    /// Maximum number of semaphores.
    pub max_semaphores: usize,
    /// Maximum number of mutexes.
    pub max_mutexes: usize,
    /// Maximum number of message queues.
    pub max_queues: usize,
    /// Maximum number of event groups.
    pub max_event_groups: usize,
    /// Tick length in milliseconds, used by the ms↔tick conversions and the
    /// wall-clock tick driver.
    pub tick_period_ms: u32,
    /// Round-robin time slice in ticks.
    pub default_time_slice: Time32,
    /// Default task stack size in bytes.
    pub default_stack_size: usize,
    /// Spawn a timer thread on `start` that invokes the tick handler every
    /// `tick_period_ms`. When disabled, the embedder drives `tick` manually.
    pub auto_tick: bool,
}

impl Default for Cfg {
    fn default() -> Self {
        Self {
            priority_levels: PRIORITY_LEVELS,
            max_tasks: MAX_TASKS,
            max_semaphores: MAX_SEMAPHORES,
            max_mutexes: MAX_MUTEXES,
            max_queues: MAX_QUEUES,
            max_event_groups: MAX_EVENT_GROUPS,
            tick_period_ms: TICK_PERIOD_MS,
            default_time_slice: DEFAULT_TIME_SLICE,
            default_stack_size: DEFAULT_STACK_SIZE,
            auto_tick: false,
        }
    }
}

impl Cfg {
    /// Check the configuration for structural validity.
    pub(crate) fn validate(&self) -> bool {
        self.priority_levels >= 2
            && self.priority_levels <= 32
            && self.max_tasks >= 1
            && self.tick_period_ms > 0
            && self.default_time_slice > 0
    }
}

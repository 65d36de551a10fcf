//! Scheduler scenarios: preemption, round-robin rotation, yield semantics,
//! suspend/resume, and the scheduler lock.
use std::sync::{Arc, Mutex as StdMutex};

use vesta_kernel::{Cfg, Kernel, Policy, TaskOptions, TaskState, MAX_TIMEOUT};

fn kernel(policy: Policy) -> Kernel {
    let _ = env_logger::builder().is_test(true).try_init();
    Kernel::new(Cfg::default(), policy).unwrap()
}

type Log<T> = Arc<StdMutex<Vec<T>>>;

fn log_of<T>() -> Log<T> {
    Arc::new(StdMutex::new(Vec::new()))
}

fn push<T>(log: &Log<T>, entry: T) {
    log.lock().unwrap().push(entry);
}

/// Tasks A (prio 0), B (prio 1), C (prio 2). A blocks on a semaphore; B's
/// `give` must hand the processor to A at once, and A's delay must hand it
/// back to B.
#[test]
fn priority_preemption_across_three_tasks() {
    let kernel = kernel(Policy::Priority);
    let sem = kernel.create_semaphore("wake-a", 0, 1).unwrap();
    let park_b = kernel.create_semaphore("park-b", 0, 1).unwrap();
    let park_c = kernel.create_semaphore("park-c", 0, 1).unwrap();
    let log = log_of::<&str>();

    {
        let (k, sem, log) = (kernel.clone(), sem.clone(), log.clone());
        kernel
            .spawn_task(TaskOptions::new("A", 0), move || {
                sem.take(MAX_TIMEOUT).unwrap();
                push(&log, "A");
                k.delay(5).unwrap();
                push(&log, "A-awake");
            })
            .unwrap();
    }
    {
        let (sem, park_b, log) = (sem.clone(), park_b.clone(), log.clone());
        kernel
            .spawn_task(TaskOptions::new("B", 1), move || {
                push(&log, "B-give");
                sem.give().unwrap();
                push(&log, "B-after");
                park_b.take(MAX_TIMEOUT).ok();
            })
            .unwrap();
    }
    {
        let (park_c, log) = (park_c.clone(), log.clone());
        kernel
            .spawn_task(TaskOptions::new("C", 2), move || {
                push(&log, "C");
                park_c.take(MAX_TIMEOUT).ok();
            })
            .unwrap();
    }

    kernel.start();
    kernel.wait_for_idle();

    // A ran first and blocked on the semaphore; B's give preempted B.
    assert_eq!(*log.lock().unwrap(), vec!["B-give", "A", "B-after", "C"]);

    // Five ticks later A's delay expires and it finishes.
    for _ in 0..5 {
        kernel.tick();
        kernel.wait_for_idle();
    }
    assert_eq!(*log.lock().unwrap(), vec!["B-give", "A", "B-after", "C", "A-awake"]);

    let a = kernel.task_by_name("A").unwrap();
    assert_eq!(kernel.task_state(a).unwrap(), TaskState::Terminated);
    kernel.shutdown();
}

/// Two tasks at the same priority with a two-tick slice alternate in pairs:
/// A,A,B,B,A,A,... with ticks delivered from the running task's context.
#[test]
fn round_robin_rotates_on_slice_expiry() {
    let kernel = kernel(Policy::RoundRobin);
    let log = log_of::<(u32, &str)>();

    for name in ["A", "B"] {
        let (k, log) = (kernel.clone(), log.clone());
        kernel
            .spawn_task(
                TaskOptions::new(name, 3).time_slice(2),
                move || {
                    for _ in 0..6 {
                        push(&log, (k.now(), name));
                        k.tick();
                    }
                },
            )
            .unwrap();
    }

    kernel.start();
    kernel.wait_for_idle();

    let expected = vec![
        (0, "A"),
        (1, "A"),
        (2, "B"),
        (3, "B"),
        (4, "A"),
        (5, "A"),
        (6, "B"),
        (7, "B"),
        (8, "A"),
        (9, "A"),
        (10, "B"),
        (11, "B"),
    ];
    assert_eq!(*log.lock().unwrap(), expected);
    kernel.shutdown();
}

/// `delay(0)` behaves like a yield: under fixed priority the caller is
/// re-picked ahead of its equal-priority sibling.
#[test]
fn delay_zero_is_a_yield() {
    let kernel = kernel(Policy::Priority);
    let log = log_of::<&str>();

    {
        let (k, log) = (kernel.clone(), log.clone());
        kernel
            .spawn_task(TaskOptions::new("first", 3), move || {
                push(&log, "first-1");
                k.delay(0).unwrap();
                push(&log, "first-2");
                k.delay(10).unwrap();
                push(&log, "first-3");
            })
            .unwrap();
    }
    {
        let log = log.clone();
        kernel
            .spawn_task(TaskOptions::new("second", 3), move || {
                push(&log, "second");
            })
            .unwrap();
    }

    kernel.start();
    kernel.wait_for_idle();
    // The zero delay did not hand the processor over; the real delay did.
    assert_eq!(*log.lock().unwrap(), vec!["first-1", "first-2", "second"]);
    kernel.shutdown();
}

#[test]
fn self_suspend_parks_until_resumed() {
    let kernel = kernel(Policy::Priority);
    let log = log_of::<&str>();

    let task = {
        let (k, log) = (kernel.clone(), log.clone());
        kernel
            .spawn_task(TaskOptions::new("suspender", 1), move || {
                push(&log, "before");
                let me = k.current_task().unwrap();
                k.suspend(me).unwrap();
                push(&log, "after");
            })
            .unwrap()
    };

    kernel.start();
    kernel.wait_for_idle();
    assert_eq!(*log.lock().unwrap(), vec!["before"]);
    assert_eq!(kernel.task_state(task).unwrap(), TaskState::Suspended);

    kernel.resume(task).unwrap();
    kernel.wait_for_idle();
    assert_eq!(*log.lock().unwrap(), vec!["before", "after"]);
    assert_eq!(kernel.task_state(task).unwrap(), TaskState::Terminated);
    kernel.shutdown();
}

/// While the scheduler lock is held, wakeups do not switch; the unlock that
/// releases the last nesting level performs the withheld switch.
#[test]
fn scheduler_lock_defers_preemption() {
    let kernel = kernel(Policy::Priority);
    let sem = kernel.create_semaphore("wake", 0, 1).unwrap();
    let log = log_of::<&str>();

    {
        let (sem, log) = (sem.clone(), log.clone());
        kernel
            .spawn_task(TaskOptions::new("urgent", 0), move || {
                sem.take(MAX_TIMEOUT).unwrap();
                push(&log, "urgent");
            })
            .unwrap();
    }
    {
        let (k, sem, log) = (kernel.clone(), sem.clone(), log.clone());
        kernel
            .spawn_task(TaskOptions::new("locker", 2), move || {
                k.lock();
                sem.give().unwrap();
                push(&log, "critical");
                k.unlock();
                push(&log, "after-unlock");
            })
            .unwrap();
    }

    kernel.start();
    kernel.wait_for_idle();
    assert_eq!(*log.lock().unwrap(), vec!["critical", "urgent", "after-unlock"]);
    kernel.shutdown();
}

#[test]
fn policy_ids_round_trip() {
    for policy in [Policy::Priority, Policy::RoundRobin, Policy::Edf, Policy::Rms] {
        assert_eq!(Policy::from_id(policy.id()), Some(policy));
    }
    assert_eq!(Policy::from_id(4), None);
    assert_eq!(Policy::Priority.to_string(), "Priority");
    assert_eq!(Policy::Edf.to_string(), "Earliest Deadline First");
}

#[test]
fn stats_track_uptime_and_switches() {
    let kernel = kernel(Policy::Priority);
    {
        let k = kernel.clone();
        kernel
            .spawn_task(TaskOptions::new("worker", 1), move || {
                k.delay(3).unwrap();
            })
            .unwrap();
    }

    kernel.start();
    kernel.wait_for_idle();
    for _ in 0..10 {
        kernel.tick();
        kernel.wait_for_idle();
    }

    let stats = kernel.stats();
    assert_eq!(stats.system_time, 10);
    assert_eq!(stats.tasks_created, 1);
    assert!(stats.context_switches >= 2);
    assert!(stats.idle_time > 0);
    assert!((0.0..=1.0).contains(&stats.cpu_load));

    kernel.reset_stats();
    let stats = kernel.stats();
    assert_eq!(stats.system_time, 10);
    assert_eq!(stats.tasks_created, 1);
    assert_eq!(stats.context_switches, 0);
    kernel.shutdown();
}

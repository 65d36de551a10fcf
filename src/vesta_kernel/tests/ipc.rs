//! IPC scenarios: queue rendezvous and backfill, semaphore handoff,
//! priority inheritance, event groups, and deletion with waiters.
use std::sync::{Arc, Mutex as StdMutex};

use vesta_kernel::{
    Cfg, EventOptions, GiveSemaphoreError, Kernel, LockMutexError, Policy, ReceiveQueueError,
    TakeSemaphoreError, TaskOptions, UnlockMutexError, MAX_TIMEOUT,
};

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

/// A send to a queue with a parked receiver bypasses the ring entirely.
#[test]
fn send_to_waiting_receiver_is_a_rendezvous() {
    let kernel = kernel(Policy::Priority);
    let queue = kernel.create_queue("rendezvous", 4, 1).unwrap();
    let log = log_of::<u32>();

    {
        let (queue, log) = (queue.clone(), log.clone());
        kernel
            .spawn_task(TaskOptions::new("receiver", 1), move || {
                let mut buf = [0u8; 4];
                queue.receive(&mut buf, MAX_TIMEOUT).unwrap();
                push(&log, u32::from_be_bytes(buf));
            })
            .unwrap();
    }

    kernel.start();
    kernel.wait_for_idle();
    assert_eq!(queue.len().unwrap(), 0);

    queue.send(&0xDEADBEEFu32.to_be_bytes(), 0).unwrap();
    kernel.wait_for_idle();

    assert_eq!(*log.lock().unwrap(), vec![0xDEADBEEF]);
    assert_eq!(queue.len().unwrap(), 0);
    kernel.shutdown();
}

/// N ≤ capacity messages come back in FIFO order.
#[test]
fn queue_round_trips_fifo() {
    let kernel = kernel(Policy::Priority);
    let queue = kernel.create_queue("fifo", 2, 4).unwrap();

    for word in [[1u8, 2], [3, 4], [5, 6]] {
        queue.send(&word, 0).unwrap();
    }
    assert_eq!(queue.len().unwrap(), 3);

    let mut peeked = [0u8; 2];
    assert!(queue.peek(&mut peeked).unwrap());
    assert_eq!(peeked, [1, 2]);

    let mut got = Vec::new();
    for _ in 0..3 {
        let mut buf = [0u8; 2];
        queue.receive(&mut buf, 0).unwrap();
        got.push(buf);
    }
    assert_eq!(got, vec![[1, 2], [3, 4], [5, 6]]);
    assert!(queue.is_empty().unwrap());
    assert_eq!(
        queue.receive(&mut [0u8; 2], 0),
        Err(ReceiveQueueError::Timeout)
    );
    kernel.shutdown();
}

/// A receive that frees a slot backfills it from the head blocked sender.
#[test]
fn receive_backfills_from_blocked_sender() {
    let kernel = kernel(Policy::Priority);
    let queue = kernel.create_queue("narrow", 1, 1).unwrap();

    {
        let queue = queue.clone();
        kernel
            .spawn_task(TaskOptions::new("sender", 1), move || {
                queue.send(&[1], MAX_TIMEOUT).unwrap();
                // The ring is full now; this send parks until a receive
                // frees the slot.
                queue.send(&[2], MAX_TIMEOUT).unwrap();
            })
            .unwrap();
    }

    kernel.start();
    kernel.wait_for_idle();
    assert_eq!(queue.len().unwrap(), 1);

    let mut buf = [0u8; 1];
    queue.receive(&mut buf, 0).unwrap();
    assert_eq!(buf, [1]);
    kernel.wait_for_idle();

    // The blocked sender's message was moved into the freed slot.
    assert_eq!(queue.len().unwrap(), 1);
    queue.receive(&mut buf, 0).unwrap();
    assert_eq!(buf, [2]);
    kernel.shutdown();
}

/// A zero-capacity queue transfers every message sender-to-receiver.
#[test]
fn zero_capacity_queue_is_synchronous() {
    let kernel = kernel(Policy::Priority);
    let queue = kernel.create_queue("sync", 1, 0).unwrap();

    {
        let queue = queue.clone();
        kernel
            .spawn_task(TaskOptions::new("sender", 1), move || {
                queue.send(&[42], MAX_TIMEOUT).unwrap();
            })
            .unwrap();
    }

    kernel.start();
    kernel.wait_for_idle();
    assert_eq!(queue.len().unwrap(), 0);

    let mut buf = [0u8; 1];
    queue.receive(&mut buf, 0).unwrap();
    assert_eq!(buf, [42]);
    kernel.shutdown();
}

/// `give` to a parked taker hands the permit over; the count never moves.
#[test]
fn semaphore_handoff_leaves_count_unchanged() {
    let kernel = kernel(Policy::Priority);
    let sem = kernel.create_semaphore("handoff", 0, 1).unwrap();
    let log = log_of::<&str>();

    {
        let (sem, log) = (sem.clone(), log.clone());
        kernel
            .spawn_task(TaskOptions::new("taker", 1), move || {
                sem.take(MAX_TIMEOUT).unwrap();
                push(&log, "took");
            })
            .unwrap();
    }

    kernel.start();
    kernel.wait_for_idle();

    sem.give().unwrap();
    kernel.wait_for_idle();
    assert_eq!(*log.lock().unwrap(), vec!["took"]);
    assert_eq!(sem.count().unwrap(), 0);

    // With nobody waiting, give/take move the count normally.
    sem.give().unwrap();
    assert_eq!(sem.count().unwrap(), 1);
    sem.take(0).unwrap();
    assert_eq!(sem.count().unwrap(), 0);
    kernel.shutdown();
}

#[test]
fn semaphore_rejects_give_at_max() {
    let kernel = kernel(Policy::Priority);
    let sem = kernel.create_semaphore("full", 1, 1).unwrap();
    assert_eq!(sem.give(), Err(GiveSemaphoreError::AtMax));
    kernel.shutdown();
}

/// A timed take expires, and the expired waiter is gone from the wait set.
#[test]
fn semaphore_take_times_out_and_unlinks() {
    let kernel = kernel(Policy::Priority);
    let sem = kernel.create_semaphore("slow", 0, 1).unwrap();
    let log = log_of::<Result<(), TakeSemaphoreError>>();

    {
        let (sem, log) = (sem.clone(), log.clone());
        kernel
            .spawn_task(TaskOptions::new("impatient", 1), move || {
                push(&log, sem.take(3));
            })
            .unwrap();
    }

    kernel.start();
    kernel.wait_for_idle();
    for _ in 0..3 {
        kernel.tick();
        kernel.wait_for_idle();
    }

    assert_eq!(*log.lock().unwrap(), vec![Err(TakeSemaphoreError::Timeout)]);

    // No stale waiter left behind: the give lands in the count.
    sem.give().unwrap();
    assert_eq!(sem.count().unwrap(), 1);
    kernel.shutdown();
}

/// A high-priority waiter lends its priority to a low-priority mutex owner
/// until the owner unlocks.
#[test]
fn mutex_priority_inheritance_raises_and_restores() {
    let kernel = kernel(Policy::Priority);
    let mutex = kernel.create_mutex("shared").unwrap();
    let gate = kernel.create_semaphore("gate", 0, 1).unwrap();
    let log = log_of::<&str>();

    let low = {
        let (m, gate, log) = (mutex.clone(), gate.clone(), log.clone());
        kernel
            .spawn_task(TaskOptions::new("low", 5), move || {
                m.lock(MAX_TIMEOUT).unwrap();
                push(&log, "low-locked");
                gate.take(MAX_TIMEOUT).unwrap();
                push(&log, "low-unlocking");
                m.unlock().unwrap();
                push(&log, "low-done");
            })
            .unwrap()
    };

    kernel.start();
    kernel.wait_for_idle();
    assert_eq!(kernel.priority(low).unwrap(), 5);

    let high = {
        let (m, log) = (mutex.clone(), log.clone());
        kernel
            .spawn_task(TaskOptions::new("high", 1), move || {
                m.lock(MAX_TIMEOUT).unwrap();
                push(&log, "high-locked");
                m.unlock().unwrap();
            })
            .unwrap()
    };

    kernel.wait_for_idle();
    // high is parked on the mutex and low inherited its priority.
    assert_eq!(kernel.priority(low).unwrap(), 1);
    assert_eq!(kernel.base_priority(low).unwrap(), 5);

    gate.give().unwrap();
    kernel.wait_for_idle();

    assert_eq!(
        *log.lock().unwrap(),
        vec!["low-locked", "low-unlocking", "high-locked", "low-done"]
    );
    assert_eq!(kernel.priority(low).unwrap(), 5);
    let _ = high;
    kernel.shutdown();
}

#[test]
fn mutex_rejects_recursion_and_foreign_unlock() {
    let kernel = kernel(Policy::Priority);
    let mutex = kernel.create_mutex("strict").unwrap();
    let log = log_of::<Result<(), LockMutexError>>();

    // Unlocking from outside any task is never legal.
    assert_eq!(mutex.unlock(), Err(UnlockMutexError::NotOwner));

    {
        let (m, log) = (mutex.clone(), log.clone());
        kernel
            .spawn_task(TaskOptions::new("owner", 1), move || {
                m.lock(MAX_TIMEOUT).unwrap();
                push(&log, m.lock(MAX_TIMEOUT));
                m.unlock().unwrap();
            })
            .unwrap();
    }

    kernel.start();
    kernel.wait_for_idle();
    assert_eq!(*log.lock().unwrap(), vec![Err(LockMutexError::WouldDeadlock)]);
    assert!(!mutex.is_locked().unwrap());
    kernel.shutdown();
}

/// Unlock passes ownership to the most urgent waiter, not the first one.
#[test]
fn mutex_unlock_prefers_urgent_waiter() {
    let kernel = kernel(Policy::Priority);
    let mutex = kernel.create_mutex("contended").unwrap();
    let gate = kernel.create_semaphore("gate", 0, 1).unwrap();
    let log = log_of::<&str>();

    {
        let (m, gate, log) = (mutex.clone(), gate.clone(), log.clone());
        kernel
            .spawn_task(TaskOptions::new("owner", 6), move || {
                m.lock(MAX_TIMEOUT).unwrap();
                gate.take(MAX_TIMEOUT).unwrap();
                m.unlock().unwrap();
            })
            .unwrap();
    }
    kernel.start();
    kernel.wait_for_idle();

    // Spawned in this order once the owner holds the lock, "calm" enqueues
    // on the mutex first.
    for (name, prio) in [("calm", 4u8), ("eager", 2u8)] {
        let (m, log) = (mutex.clone(), log.clone());
        kernel
            .spawn_task(TaskOptions::new(name, prio), move || {
                m.lock(MAX_TIMEOUT).unwrap();
                push(&log, name);
                m.unlock().unwrap();
            })
            .unwrap();
    }

    kernel.wait_for_idle();
    gate.give().unwrap();
    kernel.wait_for_idle();

    assert_eq!(*log.lock().unwrap(), vec!["eager", "calm"]);
    kernel.shutdown();
}

/// Wait-all-with-clear: an already-satisfied wait returns at once and wipes
/// the wanted bits.
#[test]
fn event_wait_all_clear_is_immediate() {
    let kernel = kernel(Policy::Priority);
    let group = kernel.create_event_group("flags").unwrap();
    let log = log_of::<u32>();

    assert_eq!(group.set(0b0011).unwrap(), 0);
    assert_eq!(group.get().unwrap(), 0b0011);

    {
        let (group, log) = (group.clone(), log.clone());
        kernel
            .spawn_task(TaskOptions::new("waiter", 1), move || {
                let matched = group
                    .wait(0b0011, EventOptions::ALL | EventOptions::CLEAR, MAX_TIMEOUT)
                    .unwrap();
                push(&log, matched);
            })
            .unwrap();
    }

    kernel.start();
    kernel.wait_for_idle();

    assert_eq!(*log.lock().unwrap(), vec![0b0011]);
    assert_eq!(group.get().unwrap(), 0);
    kernel.shutdown();
}

/// A set wakes every satisfied waiter; clearing is per waiter.
#[test]
fn event_set_sweeps_waiters() {
    let kernel = kernel(Policy::Priority);
    let group = kernel.create_event_group("sweep").unwrap();
    let log = log_of::<(&str, u32)>();

    {
        let (group, log) = (group.clone(), log.clone());
        kernel
            .spawn_task(TaskOptions::new("clearer", 1), move || {
                let matched = group.wait(0b01, EventOptions::CLEAR, MAX_TIMEOUT).unwrap();
                push(&log, ("clearer", matched));
            })
            .unwrap();
    }
    {
        let (group, log) = (group.clone(), log.clone());
        kernel
            .spawn_task(TaskOptions::new("observer", 2), move || {
                let matched = group.wait(0b10, EventOptions::empty(), MAX_TIMEOUT).unwrap();
                push(&log, ("observer", matched));
            })
            .unwrap();
    }

    kernel.start();
    kernel.wait_for_idle();

    group.set(0b11).unwrap();
    kernel.wait_for_idle();

    let mut woken = log.lock().unwrap().clone();
    woken.sort();
    assert_eq!(woken, vec![("clearer", 0b01), ("observer", 0b10)]);
    // The clearer's bit is gone; the observer's remains.
    assert_eq!(group.get().unwrap(), 0b10);
    kernel.shutdown();
}

/// Deleting a primitive with parked waiters wakes them with a distinct
/// error instead of a phantom success.
#[test]
fn delete_with_waiters_reports_destruction() {
    let kernel = kernel(Policy::Priority);
    let sem = kernel.create_semaphore("doomed", 0, 1).unwrap();
    let log = log_of::<Result<(), TakeSemaphoreError>>();

    {
        let (sem, log) = (sem.clone(), log.clone());
        kernel
            .spawn_task(TaskOptions::new("victim", 1), move || {
                push(&log, sem.take(MAX_TIMEOUT));
            })
            .unwrap();
    }

    kernel.start();
    kernel.wait_for_idle();

    sem.delete().unwrap();
    kernel.wait_for_idle();
    assert_eq!(*log.lock().unwrap(), vec![Err(TakeSemaphoreError::Destroyed)]);
    kernel.shutdown();
}

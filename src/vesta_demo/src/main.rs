//! A small satellite-flavored workload for the vesta kernel.
//!
//! Three periodic flight tasks share a telemetry queue, an I2C-bus mutex and
//! an alarm event group, scheduled with wall-clock ticks. Run with
//! `RUST_LOG=info` (or `debug` for releases and context switches).
use std::time::Duration;

use vesta_kernel::{Cfg, EventOptions, Kernel, Policy, TaskOptions, MAX_TIMEOUT};

const ALARM_OVERTEMP: u32 = 0b01;
const ALARM_LOW_POWER: u32 = 0b10;

fn main() {
    env_logger::init();

    let mut cfg = Cfg::default();
    cfg.auto_tick = true;
    let kernel = Kernel::new(cfg, Policy::Priority).expect("kernel configuration");

    let telemetry_q = kernel.create_queue("telemetry", 8, 16).expect("queue");
    let bus = kernel.create_mutex("i2c-bus").expect("mutex");
    let alarms = kernel.create_event_group("alarms").expect("event group");

    // Telemetry producer: samples the "sensors" every 500 ms and queues a
    // frame; raises alarm bits on out-of-range readings.
    {
        let kernel2 = kernel.clone();
        let queue = telemetry_q.clone();
        let alarms2 = alarms.clone();
        let bus2 = bus.clone();
        let task = kernel
            .spawn_task(TaskOptions::new("telemetry", 2), move || {
                let mut seq: u32 = 0;
                loop {
                    bus2.lock(MAX_TIMEOUT).expect("bus lock");
                    let temperature = 20 + (seq * 7) % 30;
                    let voltage = 70 + (seq * 3) % 20;
                    bus2.unlock().expect("bus unlock");

                    let mut frame = [0u8; 8];
                    frame[..4].copy_from_slice(&seq.to_le_bytes());
                    frame[4] = temperature as u8;
                    frame[5] = voltage as u8;
                    queue.send(&frame, kernel2.ms_to_ticks(100)).ok();

                    if temperature > 45 {
                        alarms2.set(ALARM_OVERTEMP).expect("alarm set");
                    }
                    if voltage < 75 {
                        alarms2.set(ALARM_LOW_POWER).expect("alarm set");
                    }

                    seq += 1;
                    kernel2.wait_period().expect("wait_period");
                }
            })
            .expect("telemetry task");
        let period = kernel.ms_to_ticks(500);
        let deadline = kernel.ms_to_ticks(450);
        kernel.set_periodic(task, period, deadline).expect("periodic");
    }

    // Downlink: drains the telemetry queue.
    {
        let kernel2 = kernel.clone();
        let queue = telemetry_q.clone();
        kernel
            .spawn_task(TaskOptions::new("downlink", 4), move || loop {
                let mut frame = [0u8; 8];
                match queue.receive(&mut frame, MAX_TIMEOUT) {
                    Ok(()) => {
                        let seq = u32::from_le_bytes(frame[..4].try_into().unwrap());
                        log::info!(
                            "downlink frame seq={seq} temp={}C bus={}dV at tick {}",
                            frame[4],
                            frame[5],
                            kernel2.now()
                        );
                    }
                    Err(err) => {
                        log::warn!("downlink receive failed: {err}");
                        return;
                    }
                }
            })
            .expect("downlink task");
    }

    // Attitude control: the most urgent flight task, briefly holds the bus
    // every 250 ms.
    {
        let (kernel2, bus) = (kernel.clone(), bus.clone());
        let task = kernel
            .spawn_task(TaskOptions::new("attitude", 0), move || loop {
                bus.lock(MAX_TIMEOUT).expect("bus lock");
                // Wheel torque update would go here.
                bus.unlock().expect("bus unlock");
                kernel2.wait_period().expect("wait_period");
            })
            .expect("attitude task");
        let period = kernel.ms_to_ticks(250);
        kernel.set_periodic(task, period, 0).expect("periodic");
    }

    // Thermal/power watchdog: parked on the alarm group.
    {
        let alarms = alarms.clone();
        kernel
            .spawn_task(TaskOptions::new("watchdog", 1), move || loop {
                match alarms.wait(
                    ALARM_OVERTEMP | ALARM_LOW_POWER,
                    EventOptions::CLEAR,
                    MAX_TIMEOUT,
                ) {
                    Ok(bits) if bits & ALARM_OVERTEMP != 0 => {
                        log::warn!("overtemperature alarm, shedding load")
                    }
                    Ok(_) => log::warn!("low power alarm, trimming duty cycle"),
                    Err(err) => {
                        log::warn!("watchdog wait failed: {err}");
                        return;
                    }
                }
            })
            .expect("watchdog task");
    }

    kernel.start();
    std::thread::sleep(Duration::from_secs(3));

    let stats = kernel.stats();
    log::info!(
        "uptime {} ticks, {} context switches, cpu load {:.1}%, {} deadline misses",
        stats.system_time,
        stats.context_switches,
        stats.cpu_load * 100.0,
        stats.deadline_misses
    );

    kernel.shutdown();
}

//! Host tick source against wall-clock time.

use std::time::{Duration, Instant};

use rtk::{Interval, Kernel, KernelConfig, Priority, ThreadConfig};

#[test]
fn ticker_drives_sleeps_in_real_time() {
    let _ = env_logger::builder().is_test(true).try_init();
    let kernel = Kernel::with_config(KernelConfig::builder().tick_hz(1000).build())
        .build()
        .unwrap();
    let ticker = kernel.start_ticker().unwrap();
    assert!(ticker.is_running());

    let started = Instant::now();
    kernel.sleep(Interval::from_millis(20, 1000));
    assert!(started.elapsed() >= Duration::from_millis(15));
    assert!(kernel.now().raw() >= 20);

    let worker = kernel
        .spawn(ThreadConfig::new("worker", Priority::HIGH), |k| {
            k.sleep(Interval::ticks(5));
            k.now().raw() as isize
        })
        .unwrap();
    assert!(worker.join() >= 25);

    ticker.stop();
    let frozen = kernel.now();
    std::thread::sleep(Duration::from_millis(5));
    assert_eq!(kernel.now(), frozen);
}

#[test]
fn ticker_exits_when_the_kernel_halts() {
    let kernel = Kernel::builder().build().unwrap();
    let ticker = kernel.start_ticker().unwrap();
    kernel.halt("done");
    let deadline = Instant::now() + Duration::from_secs(2);
    while ticker.is_running() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }
    assert!(!ticker.is_running());
}

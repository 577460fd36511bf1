//! Priority inversion, bounded by inheritance.
//!
//! A low-priority thread holds a mutex that a high-priority thread needs,
//! while a medium-priority thread would keep the low one off the CPU. The
//! kernel lends the waiter's priority to the owner, so the low thread runs
//! ahead of the medium one until it releases the mutex.

use std::error::Error;

use log::info;
use rtk::{Interval, Kernel, KernelConfig, Mutex, Priority, ThreadConfig, MSG_OK};

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let kernel = Kernel::with_config(KernelConfig::builder().name("inversion").build()).build()?;
    let hz = kernel.config().tick_hz;
    let ticker = kernel.start_ticker()?;
    let resource = Mutex::new(&kernel);

    let low = {
        let resource = resource.clone();
        kernel.spawn(ThreadConfig::new("low", Priority::new(10)), move |k| {
            resource.lock();
            info!("low: took the resource at {}", k.now());
            k.sleep(Interval::from_millis(30, hz));
            info!(
                "low: releasing at priority {} (nominal {})",
                k.priority(),
                k.nominal_priority()
            );
            resource.unlock();
            info!("low: back to priority {}", k.priority());
            MSG_OK
        })?
    };

    let medium = kernel.spawn(ThreadConfig::new("medium", Priority::new(100)), move |k| {
        for round in 0..5 {
            k.sleep(Interval::from_millis(10, hz));
            info!("medium: round {round} at {}", k.now());
        }
        MSG_OK
    })?;

    let high = {
        let resource = resource.clone();
        kernel.spawn(ThreadConfig::new("high", Priority::new(200)), move |k| {
            k.sleep(Interval::from_millis(5, hz));
            info!("high: needs the resource at {}", k.now());
            resource.lock();
            info!("high: got the resource at {}", k.now());
            resource.unlock();
            MSG_OK
        })?
    };

    high.join();
    medium.join();
    low.join();
    kernel.integrity_check()?;
    ticker.stop();
    Ok(())
}

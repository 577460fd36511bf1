//! Host tick source.
//!
//! A dedicated host thread calls the tick handler at the configured rate.
//! Deadlines are absolute, so the tick period does not drift with
//! scheduling latency.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::KernelError;
use crate::kernel::Kernel;

const NSEC_PER_SEC: u64 = 1_000_000_000;

/// Tick period for a rate in Hz.
pub fn tick_period(hz: u32) -> Duration {
    Duration::from_nanos(NSEC_PER_SEC / u64::from(hz.max(1)))
}

/// Running tick source. Stops and joins its thread when dropped.
pub struct Ticker {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    /// Stops the tick thread and waits for it.
    pub fn stop(mut self) {
        self.shutdown();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Kernel {
    /// Starts ticking the kernel from a host thread at `tick_hz`.
    pub fn start_ticker(&self) -> Result<Ticker, KernelError> {
        let running = Arc::new(AtomicBool::new(true));
        let period = tick_period(self.config().tick_hz);
        let kernel = self.clone();
        let flag = Arc::clone(&running);
        let handle = thread::Builder::new()
            .name(format!("{}-ticker", self.config().name))
            .spawn(move || ticker_thread(kernel, flag, period))?;
        log::debug!("{}: ticker started, period {period:?}", self.config().name);
        Ok(Ticker {
            running,
            handle: Some(handle),
        })
    }

    /// One tick from the host tick source. False once the kernel halted.
    fn host_tick(&self) -> bool {
        let mut st = self.lock_state();
        if st.halted.is_some() {
            return false;
        }
        st.tick_i();
        st.interrupt_epilogue();
        true
    }
}

fn ticker_thread(kernel: Kernel, running: Arc<AtomicBool>, period: Duration) {
    let mut next_tick = Instant::now();
    while running.load(Ordering::Relaxed) {
        next_tick += period;
        let now = Instant::now();
        if next_tick > now {
            thread::sleep(next_tick - now);
        }
        if !kernel.host_tick() {
            break;
        }
    }
    running.store(false, Ordering::SeqCst);
    log::debug!("{}: ticker stopped", kernel.config().name);
}

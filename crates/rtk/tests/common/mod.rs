//! Shared fixtures for the kernel integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use rtk::{IdlePolicy, Kernel, KernelConfig, Priority};

/// A kernel that halts instead of idling, so a test that blocks every
/// thread fails loudly rather than hanging.
pub fn kernel() -> Kernel {
    kernel_with(KernelConfig::builder().name("test"))
}

pub fn kernel_with(builder: rtk::KernelConfigBuilder) -> Kernel {
    let _ = env_logger::builder().is_test(true).try_init();
    Kernel::with_config(builder.idle_policy(IdlePolicy::Halt).build())
        .build()
        .expect("build kernel")
}

/// A kernel whose main thread runs below every test thread.
pub fn low_main_kernel() -> Kernel {
    kernel_with(KernelConfig::builder().name("test").main_priority(Priority::LOW))
}

pub fn ticks(kernel: &Kernel, n: u32) {
    for _ in 0..n {
        kernel.tick();
    }
}

/// Append-only record shared between kernel threads.
#[derive(Clone)]
pub struct Journal<T>(Arc<Mutex<Vec<T>>>);

impl<T: Clone> Journal<T> {
    pub fn new() -> Self {
        Journal(Arc::new(Mutex::new(Vec::new())))
    }

    pub fn push(&self, value: T) {
        self.0.lock().unwrap().push(value);
    }

    pub fn entries(&self) -> Vec<T> {
        self.0.lock().unwrap().clone()
    }
}

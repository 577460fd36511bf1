#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use rtk::{IdlePolicy, Kernel, KernelConfig};

/// A kernel that halts when every thread blocks.
pub fn kernel() -> Kernel {
    let _ = env_logger::builder().is_test(true).try_init();
    Kernel::with_config(KernelConfig::builder().name("lib").idle_policy(IdlePolicy::Halt).build())
        .build()
        .expect("build kernel")
}

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

//! Tests for KernelConfig builder and kernel construction.

use rtk::{IdlePolicy, Kernel, KernelConfig, KernelError, Priority, DEFAULT_STACK_SIZE};

#[test]
fn kernel_config_builder() {
    let config = KernelConfig::builder()
        .name("TestKernel")
        .max_threads(8)
        .main_priority(Priority::new(42))
        .tick_hz(100)
        .idle_policy(IdlePolicy::Halt)
        .trace(false)
        .stack_size(128 * 1024)
        .build();

    assert_eq!(config.name, "TestKernel");
    assert_eq!(config.max_threads, 8);
    assert_eq!(config.main_priority, Priority::new(42));
    assert_eq!(config.tick_hz, 100);
    assert_eq!(config.idle, IdlePolicy::Halt);
    assert!(!config.trace);
    assert_eq!(config.stack_size, 128 * 1024);
}

#[test]
fn kernel_config_default() {
    let config = KernelConfig::default();

    assert_eq!(config.name, "rtk");
    assert_eq!(config.max_threads, 32);
    assert_eq!(config.main_priority, Priority::NORMAL);
    assert_eq!(config.tick_hz, 1000);
    assert_eq!(config.idle, IdlePolicy::Wait);
    assert!(config.idle_callback.is_none());
    assert!(config.trace);
    assert_eq!(config.stack_size, DEFAULT_STACK_SIZE);
}

#[test]
fn kernel_with_custom_config() {
    let config = KernelConfig::builder()
        .name("CustomKernel")
        .main_priority(Priority::new(7))
        .build();

    let kernel = Kernel::with_config(config).build().unwrap();
    assert_eq!(kernel.config().name, "CustomKernel");
    assert_eq!(kernel.priority(), Priority::new(7));
    assert_eq!(kernel.nominal_priority(), Priority::new(7));
    assert!(kernel.current_thread().is_some());
    assert!(!kernel.is_halted());
    kernel.integrity_check().unwrap();
}

#[test]
fn invalid_configurations_are_rejected() {
    let zero_threads = KernelConfig::builder().max_threads(0).build();
    assert!(matches!(
        Kernel::with_config(zero_threads).build(),
        Err(KernelError::InvalidConfig(_))
    ));

    let zero_rate = KernelConfig::builder().tick_hz(0).build();
    assert!(matches!(
        Kernel::with_config(zero_rate).build(),
        Err(KernelError::InvalidConfig(_))
    ));

    let idle_main = KernelConfig::builder().main_priority(Priority::IDLE).build();
    assert!(matches!(
        Kernel::with_config(idle_main).build(),
        Err(KernelError::InvalidPriority(_))
    ));
}

#[test]
fn independent_kernels_coexist() {
    let first = Kernel::builder().build().unwrap();
    let second = std::thread::spawn(|| {
        let kernel = Kernel::builder().build().unwrap();
        kernel.tick();
        kernel.now()
    })
    .join()
    .unwrap();

    first.tick();
    first.tick();
    assert_eq!(first.now().raw(), 2);
    assert_eq!(second.raw(), 1);
}

#[test]
fn trace_hook_sees_switches() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    let seen = Arc::new(AtomicUsize::new(0));
    let hook_seen = seen.clone();
    let kernel = Kernel::builder()
        .with_trace_hook(Arc::new(move |_event: &rtk::TraceEvent| {
            hook_seen.fetch_add(1, Ordering::SeqCst);
        }))
        .build()
        .unwrap();

    let t = kernel
        .spawn(rtk::ThreadConfig::new("t", Priority::HIGH), |_| rtk::MSG_OK)
        .unwrap();
    t.join();
    assert_eq!(seen.load(Ordering::SeqCst), 2);
    assert_eq!(kernel.trace_snapshot().len(), 2);
}

#[test]
fn halt_stops_later_calls() {
    let kernel = Kernel::builder().build().unwrap();
    kernel.halt("test over");
    assert!(kernel.is_halted());
    assert_eq!(kernel.halt_reason().as_deref(), Some("test over"));
    assert!(matches!(
        kernel.integrity_check(),
        Err(KernelError::Halted(_))
    ));
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| kernel.yield_now()));
    assert!(result.is_err());
}

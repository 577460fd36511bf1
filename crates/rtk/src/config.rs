//! Kernel configuration.

use rtk_core::Priority;

/// Default host stack size for kernel threads.
pub const DEFAULT_STACK_SIZE: usize = 64 * 1024;

/// What the kernel does when no thread is ready to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdlePolicy {
    /// Wait for an interrupt to make a thread ready.
    #[default]
    Wait,
    /// Halt the kernel. Useful for deterministic simulations driven from a
    /// kernel thread, where an empty ready list can only mean deadlock.
    Halt,
}

/// Configuration for the kernel.
///
/// Sizes the thread storage, sets the tick rate used for time conversions
/// and by the host ticker, and selects the idle behaviour.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    pub name: &'static str,
    pub max_threads: usize,
    pub main_priority: Priority,
    pub tick_hz: u32,
    pub idle: IdlePolicy,
    pub idle_callback: Option<fn()>,
    /// Round-robin time slice in ticks; 0 disables round robin.
    pub time_quantum: u32,
    pub trace: bool,
    pub stack_size: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            name: "rtk",
            max_threads: 32,
            main_priority: Priority::NORMAL,
            tick_hz: 1_000,
            idle: IdlePolicy::Wait,
            idle_callback: None,
            time_quantum: 0,
            trace: true,
            stack_size: DEFAULT_STACK_SIZE,
        }
    }
}

impl KernelConfig {
    /// Creates a new kernel configuration builder.
    pub fn builder() -> KernelConfigBuilder {
        KernelConfigBuilder::default()
    }
}

/// Builder for ergonomic kernel configuration construction.
#[derive(Debug, Clone, Default)]
pub struct KernelConfigBuilder {
    config: KernelConfig,
}

impl KernelConfigBuilder {
    /// Sets the kernel name.
    pub fn name(mut self, name: &'static str) -> Self {
        self.config.name = name;
        self
    }

    /// Sets the number of TCBs, including the main thread.
    pub fn max_threads(mut self, max: usize) -> Self {
        self.config.max_threads = max;
        self
    }

    /// Sets the priority of the thread that builds the kernel.
    pub fn main_priority(mut self, priority: Priority) -> Self {
        self.config.main_priority = priority;
        self
    }

    /// Sets the tick frequency in Hz.
    pub fn tick_hz(mut self, hz: u32) -> Self {
        self.config.tick_hz = hz;
        self
    }

    pub fn idle_policy(mut self, idle: IdlePolicy) -> Self {
        self.config.idle = idle;
        self
    }

    /// Sets a function called, inside the critical section, each time the
    /// kernel goes idle. It must not call back into the kernel.
    pub fn idle_callback(mut self, callback: fn()) -> Self {
        self.config.idle_callback = Some(callback);
        self
    }

    /// Sets the round-robin time slice. A thread that runs for `ticks` ticks
    /// goes behind its ready priority peers. 0 disables round robin.
    pub fn time_quantum(mut self, ticks: u32) -> Self {
        self.config.time_quantum = ticks;
        self
    }

    /// Enables or disables the context-switch trace buffer.
    pub fn trace(mut self, enabled: bool) -> Self {
        self.config.trace = enabled;
        self
    }

    /// Sets the default host stack size for kernel threads.
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.config.stack_size = bytes;
        self
    }

    /// Builds the kernel configuration.
    pub fn build(self) -> KernelConfig {
        self.config
    }
}

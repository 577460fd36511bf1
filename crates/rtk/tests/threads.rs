//! Thread lifecycle: spawn, start, join, termination and reclamation.

mod common;

use common::{kernel, kernel_with, ticks, Journal};
use rtk::{Interval, KernelConfig, KernelError, Priority, ThreadConfig, ThreadState, MSG_OK};

#[test]
fn join_returns_the_exit_code() {
    let kernel = kernel();
    let quick = kernel
        .spawn(ThreadConfig::new("quick", Priority::HIGH), |_| 17)
        .unwrap();
    assert_eq!(quick.state(), ThreadState::Final);
    assert_eq!(quick.join(), 17);

    let slow = kernel
        .spawn(ThreadConfig::new("slow", Priority::LOW), |_| 5)
        .unwrap();
    assert_eq!(slow.state(), ThreadState::Ready);
    assert_eq!(slow.join(), 5);
}

#[test]
fn suspended_thread_waits_for_start() {
    let kernel = kernel();
    let journal = Journal::new();
    let t = {
        let journal = journal.clone();
        kernel
            .spawn_suspended(ThreadConfig::new("lazy", Priority::HIGH), move |_| {
                journal.push("ran");
                MSG_OK
            })
            .unwrap()
    };
    assert_eq!(t.state(), ThreadState::Suspended);
    assert!(journal.entries().is_empty());
    t.start();
    assert_eq!(journal.entries(), vec!["ran"]);
    t.join();
}

#[test]
fn termination_is_cooperative() {
    let kernel = kernel();
    let worker = kernel
        .spawn(ThreadConfig::new("worker", Priority::HIGH), |k| {
            let mut rounds = 0;
            while !k.should_terminate() {
                k.sleep(Interval::ticks(1));
                rounds += 1;
            }
            rounds
        })
        .unwrap();

    ticks(&kernel, 3);
    worker.request_terminate();
    assert_eq!(worker.state(), ThreadState::Sleeping);
    kernel.tick();
    assert_eq!(worker.join(), 4);
}

#[test]
fn finished_threads_are_reclaimed_when_released() {
    let kernel = kernel();
    let t = kernel
        .spawn(ThreadConfig::new("done", Priority::HIGH), |_| MSG_OK)
        .unwrap();
    let id = t.id();
    assert!(kernel.thread_info(id).is_some());
    drop(t);
    assert!(kernel.thread_info(id).is_none());

    let never = kernel
        .spawn_suspended(ThreadConfig::new("never", Priority::HIGH), |_| MSG_OK)
        .unwrap();
    let id = never.id();
    drop(never);
    assert!(kernel.thread_info(id).is_none());
    assert_eq!(kernel.threads().len(), 1);
}

#[test]
fn thread_is_kept_while_references_remain() {
    let kernel = kernel();
    let t = kernel
        .spawn(ThreadConfig::new("named", Priority::LOW), |_| 3)
        .unwrap();
    let found = kernel.find_thread("named").expect("thread is registered");
    assert_eq!(found.id(), t.id());
    assert_eq!(found.name(), "named");

    assert_eq!(t.join(), 3);
    assert_eq!(found.state(), ThreadState::Final);
    let id = found.id();
    drop(found);
    assert!(kernel.thread_info(id).is_none());
    assert!(kernel.find_thread("named").is_none());
}

#[test]
fn invalid_priority_is_rejected() {
    let kernel = kernel();
    let err = kernel
        .spawn(ThreadConfig::new("idle", Priority::IDLE), |_| MSG_OK)
        .unwrap_err();
    assert!(matches!(err, KernelError::InvalidPriority(p) if p == Priority::IDLE));
}

#[test]
#[should_panic(expected = "thread storage exhausted")]
fn exhausting_thread_storage_halts_the_kernel() {
    let kernel = kernel_with(KernelConfig::builder().max_threads(2));
    let _first = kernel
        .spawn(ThreadConfig::new("first", Priority::LOW), |_| MSG_OK)
        .unwrap();
    let _ = kernel.spawn(ThreadConfig::new("second", Priority::LOW), |_| MSG_OK);
}

#[test]
#[should_panic(expected = "panicked: boom")]
fn panicking_thread_halts_the_kernel() {
    let kernel = kernel();
    let _ = kernel.spawn(ThreadConfig::new("bad", Priority::HIGH), |_| panic!("boom"));
}

#[test]
#[should_panic(expected = "while holding mutexes")]
fn exiting_with_a_held_mutex_halts_the_kernel() {
    let kernel = kernel();
    let m = rtk::Mutex::new(&kernel);
    let _ = kernel.spawn(ThreadConfig::new("greedy", Priority::HIGH), move |_| {
        m.lock();
        MSG_OK
    });
}

#[test]
fn custom_stack_size_is_accepted() {
    let kernel = kernel();
    let t = kernel
        .spawn(
            ThreadConfig::new("big", Priority::HIGH).with_stack_size(256 * 1024),
            |_| {
                let buffer = [1u8; 128 * 1024];
                buffer.iter().map(|&b| b as isize).sum()
            },
        )
        .unwrap();
    assert_eq!(t.join(), 128 * 1024);
}

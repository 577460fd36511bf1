//! Counting and binary semaphores.

mod common;

use common::{kernel, low_main_kernel, ticks, Journal};
use rtk::{BinarySemaphore, Interval, Priority, Semaphore, Status, SysTime, ThreadConfig, MSG_OK};

#[test]
fn waiters_are_served_in_arrival_order_regardless_of_priority() {
    let kernel = low_main_kernel();
    let sem = Semaphore::new(&kernel, 0);
    let woken = Journal::new();

    let waiters: Vec<_> = [50u8, 200, 100, 150]
        .into_iter()
        .map(|p| {
            let (sem, woken) = (sem.clone(), woken.clone());
            kernel
                .spawn(ThreadConfig::new(format!("w{p}"), Priority::new(p)), move |_| {
                    assert_eq!(sem.wait(), Status::Ok);
                    woken.push(p);
                    MSG_OK
                })
                .unwrap()
        })
        .collect();
    assert_eq!(sem.count(), -4);
    kernel.integrity_check().unwrap();

    for _ in 0..4 {
        sem.signal();
    }
    waiters.into_iter().for_each(|t| {
        t.join();
    });
    assert_eq!(woken.entries(), vec![50, 200, 100, 150]);
    assert_eq!(sem.count(), 0);
}

#[test]
fn wait_timeout_expires_and_restores_the_count() {
    let kernel = kernel();
    let sem = Semaphore::new(&kernel, 0);
    let outcome = Journal::new();

    let waiter = {
        let (sem, outcome) = (sem.clone(), outcome.clone());
        kernel
            .spawn(ThreadConfig::new("waiter", Priority::HIGH), move |k| {
                let status = sem.wait_timeout(Interval::ticks(3));
                outcome.push((status, k.now()));
                MSG_OK
            })
            .unwrap()
    };
    assert_eq!(sem.count(), -1);

    ticks(&kernel, 2);
    assert!(outcome.entries().is_empty());
    kernel.tick();
    assert_eq!(outcome.entries(), vec![(Status::Timeout, SysTime::new(3))]);
    assert_eq!(sem.count(), 0);
    waiter.join();
    kernel.integrity_check().unwrap();
}

#[test]
fn signal_before_timeout_cancels_it() {
    let kernel = kernel();
    let sem = Semaphore::new(&kernel, 0);
    let outcome = Journal::new();

    let waiter = {
        let (sem, outcome) = (sem.clone(), outcome.clone());
        kernel
            .spawn(ThreadConfig::new("waiter", Priority::HIGH), move |k| {
                outcome.push(sem.wait_timeout(Interval::ticks(5)));
                k.sleep(Interval::ticks(10));
                MSG_OK
            })
            .unwrap()
    };
    kernel.tick();
    sem.signal();
    ticks(&kernel, 10);
    waiter.join();
    assert_eq!(outcome.entries(), vec![Status::Ok]);
    assert_eq!(sem.count(), 0);
}

#[test]
fn reset_wakes_every_waiter_with_reset() {
    let kernel = low_main_kernel();
    let sem = Semaphore::new(&kernel, 0);
    let outcome = Journal::new();

    let waiters: Vec<_> = (0..3)
        .map(|i| {
            let (sem, outcome) = (sem.clone(), outcome.clone());
            kernel
                .spawn(ThreadConfig::new(format!("w{i}"), Priority::NORMAL), move |_| {
                    outcome.push(sem.wait());
                    MSG_OK
                })
                .unwrap()
        })
        .collect();

    sem.reset(5);
    waiters.into_iter().for_each(|t| {
        t.join();
    });
    assert_eq!(outcome.entries(), vec![Status::Reset; 3]);
    assert_eq!(sem.count(), 5);
}

#[test]
fn non_blocking_variants() {
    let kernel = kernel();
    let sem = Semaphore::new(&kernel, 1);
    assert_eq!(sem.try_wait(), Status::Ok);
    assert_eq!(sem.try_wait(), Status::WouldBlock);
    assert_eq!(sem.wait_timeout(Interval::IMMEDIATE), Status::Timeout);
    assert_eq!(sem.count(), 0);

    kernel.lock(|cs| sem.add_count_i(cs, 3));
    assert_eq!(sem.count(), 3);
    assert_eq!(kernel.lock(|cs| sem.try_wait_i(cs)), Status::Ok);
    assert_eq!(sem.count(), 2);
}

#[test]
fn signal_wait_hands_over_atomically() {
    let kernel = low_main_kernel();
    let (ping, pong) = (Semaphore::new(&kernel, 0), Semaphore::new(&kernel, 0));
    let order = Journal::new();

    let partner = {
        let (ping, pong, order) = (ping.clone(), pong.clone(), order.clone());
        kernel
            .spawn(ThreadConfig::new("partner", Priority::NORMAL), move |_| {
                for _ in 0..2 {
                    let _ = ping.wait();
                    order.push("partner");
                    pong.signal();
                }
                MSG_OK
            })
            .unwrap()
    };

    for _ in 0..2 {
        assert_eq!(Semaphore::signal_wait(&ping, &pong), Status::Ok);
        order.push("main");
    }
    partner.join();
    assert_eq!(order.entries(), vec!["partner", "main", "partner", "main"]);
}

#[test]
fn binary_semaphore_saturates_at_one() {
    let kernel = kernel();
    let bsem = BinarySemaphore::new(&kernel, true);
    assert!(bsem.is_taken());
    bsem.signal();
    bsem.signal();
    assert!(!bsem.is_taken());
    assert_eq!(bsem.wait(), Status::Ok);
    assert!(bsem.is_taken());
    assert_eq!(bsem.try_wait(), Status::WouldBlock);
}

#[test]
fn binary_semaphore_releases_a_waiter() {
    let kernel = low_main_kernel();
    let bsem = BinarySemaphore::new(&kernel, true);
    let order = Journal::new();

    let waiter = {
        let (bsem, order) = (bsem.clone(), order.clone());
        kernel
            .spawn(ThreadConfig::new("waiter", Priority::NORMAL), move |_| {
                order.push(bsem.wait_timeout(Interval::INFINITE));
                MSG_OK
            })
            .unwrap()
    };
    bsem.signal();
    waiter.join();
    assert_eq!(order.entries(), vec![Status::Ok]);
    assert!(bsem.is_taken());
}

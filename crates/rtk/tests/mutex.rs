//! Priority-inheritance mutex.

mod common;

use common::{kernel, low_main_kernel, Journal};
use rtk::{Mutex, Priority, Semaphore, Status, ThreadConfig, MSG_OK};

fn prio(n: u8) -> Priority {
    Priority::new(n)
}

#[test]
fn owner_inherits_waiter_priority_until_unlock() {
    let kernel = low_main_kernel();
    let journal = Journal::new();
    let m = Mutex::new(&kernel);
    let proceed = Semaphore::new(&kernel, 0);

    let low = {
        let (journal, m, proceed) = (journal.clone(), m.clone(), proceed.clone());
        kernel
            .spawn(ThreadConfig::new("low", prio(10)), move |k| {
                m.lock();
                assert!(proceed.wait().is_ok());
                journal.push(("low holding", k.priority().raw()));
                m.unlock();
                journal.push(("low released", k.priority().raw()));
                MSG_OK
            })
            .unwrap()
    };
    assert_eq!(m.owner(), Some(low.id()));

    let high = {
        let (journal, m) = (journal.clone(), m.clone());
        kernel
            .spawn(ThreadConfig::new("high", prio(200)), move |k| {
                m.lock();
                journal.push(("high", k.priority().raw()));
                m.unlock();
                MSG_OK
            })
            .unwrap()
    };

    assert_eq!(low.priority(), prio(200));
    assert_eq!(low.nominal_priority(), prio(10));
    kernel.integrity_check().unwrap();

    proceed.signal();
    high.join();
    low.join();
    assert_eq!(
        journal.entries(),
        vec![("low holding", 200), ("high", 200), ("low released", 10)]
    );
    assert!(!m.is_locked());
}

#[test]
fn chained_boost_reaches_the_bottom_and_unwinds_layer_by_layer() {
    let kernel = low_main_kernel();
    let journal = Journal::new();
    let (m1, m2, m3) = (Mutex::new(&kernel), Mutex::new(&kernel), Mutex::new(&kernel));
    let gate = Semaphore::new(&kernel, 0);

    let a = {
        let (journal, m1, gate) = (journal.clone(), m1.clone(), gate.clone());
        kernel
            .spawn(ThreadConfig::new("a", prio(10)), move |k| {
                m1.lock();
                let _ = gate.wait();
                journal.push(("a holding m1", k.priority().raw()));
                m1.unlock();
                journal.push(("a done", k.priority().raw()));
                MSG_OK
            })
            .unwrap()
    };
    let b = {
        let (journal, m1, m2) = (journal.clone(), m1.clone(), m2.clone());
        kernel
            .spawn(ThreadConfig::new("b", prio(20)), move |k| {
                m2.lock();
                m1.lock();
                journal.push(("b got m1", k.priority().raw()));
                m1.unlock();
                journal.push(("b released m1", k.priority().raw()));
                m2.unlock();
                journal.push(("b done", k.priority().raw()));
                MSG_OK
            })
            .unwrap()
    };
    assert_eq!(a.priority(), prio(20));

    let c = {
        let (journal, m2, m3) = (journal.clone(), m2.clone(), m3.clone());
        kernel
            .spawn(ThreadConfig::new("c", prio(30)), move |k| {
                m3.lock();
                m2.lock();
                journal.push(("c got m2", k.priority().raw()));
                m2.unlock();
                m3.unlock();
                journal.push(("c done", k.priority().raw()));
                MSG_OK
            })
            .unwrap()
    };

    assert_eq!(c.priority(), prio(30));
    assert_eq!(b.priority(), prio(30));
    assert_eq!(a.priority(), prio(30));
    assert_eq!(a.nominal_priority(), prio(10));
    kernel.integrity_check().unwrap();

    gate.signal();
    for t in [c, b, a] {
        t.join();
    }
    assert_eq!(
        journal.entries(),
        vec![
            ("a holding m1", 30),
            ("b got m1", 30),
            ("b released m1", 30),
            ("c got m2", 30),
            ("c done", 30),
            ("b done", 20),
            ("a done", 10),
        ]
    );
    kernel.integrity_check().unwrap();
}

#[test]
fn waiters_acquire_in_priority_order() {
    let kernel = low_main_kernel();
    let journal = Journal::new();
    let m = Mutex::new(&kernel);
    m.lock();

    let waiters: Vec<_> = [40u8, 60, 90]
        .into_iter()
        .map(|p| {
            let (journal, m) = (journal.clone(), m.clone());
            kernel
                .spawn(ThreadConfig::new(format!("w{p}"), prio(p)), move |_| {
                    m.lock();
                    journal.push(p);
                    m.unlock();
                    MSG_OK
                })
                .unwrap()
        })
        .collect();

    assert_eq!(kernel.priority(), prio(90));
    m.unlock();
    assert_eq!(kernel.priority(), Priority::LOW);
    waiters.into_iter().for_each(|t| {
        t.join();
    });
    assert_eq!(journal.entries(), vec![90, 60, 40]);
}

#[test]
fn boost_lasts_until_the_last_boosting_mutex_is_released() {
    let kernel = low_main_kernel();
    let (m1, m2) = (Mutex::new(&kernel), Mutex::new(&kernel));
    m1.lock();
    m2.lock();

    let spawn_locker = |name: &str, p: u8, m: &Mutex| {
        let m = m.clone();
        kernel
            .spawn(ThreadConfig::new(name, prio(p)), move |_| {
                m.lock();
                m.unlock();
                MSG_OK
            })
            .unwrap()
    };
    let h1 = spawn_locker("h1", 100, &m1);
    let h2 = spawn_locker("h2", 200, &m2);
    assert_eq!(kernel.priority(), prio(200));

    // Not the most recently locked mutex.
    m1.unlock();
    assert_eq!(kernel.priority(), prio(200));
    assert_eq!(m1.owner(), Some(h1.id()));

    m2.unlock();
    assert_eq!(kernel.priority(), Priority::LOW);
    h1.join();
    h2.join();
    kernel.integrity_check().unwrap();
}

#[test]
fn unlock_all_releases_everything_and_drops_the_boost() {
    let kernel = low_main_kernel();
    let (m1, m2) = (Mutex::new(&kernel), Mutex::new(&kernel));
    m1.lock();
    m2.lock();

    let waiter = {
        let m2 = m2.clone();
        kernel
            .spawn(ThreadConfig::new("waiter", prio(200)), move |_| {
                m2.lock();
                m2.unlock();
                MSG_OK
            })
            .unwrap()
    };
    assert_eq!(kernel.priority(), prio(200));

    kernel.unlock_all();
    assert_eq!(kernel.priority(), Priority::LOW);
    assert!(!m1.is_locked());
    assert!(!m2.is_locked());
    waiter.join();
}

#[test]
fn lowering_a_blocked_waiter_unwinds_the_chain() {
    let kernel = low_main_kernel();
    let (m1, m2) = (Mutex::new(&kernel), Mutex::new(&kernel));
    let gate = Semaphore::new(&kernel, 0);

    let a = {
        let (m1, gate) = (m1.clone(), gate.clone());
        kernel
            .spawn(ThreadConfig::new("a", prio(10)), move |_| {
                m1.lock();
                let _ = gate.wait();
                m1.unlock();
                MSG_OK
            })
            .unwrap()
    };
    let b = {
        let (m1, m2) = (m1.clone(), m2.clone());
        kernel
            .spawn(ThreadConfig::new("b", prio(20)), move |_| {
                m2.lock();
                m1.lock();
                m1.unlock();
                m2.unlock();
                MSG_OK
            })
            .unwrap()
    };
    let c = {
        let m2 = m2.clone();
        kernel
            .spawn(ThreadConfig::new("c", prio(200)), move |_| {
                m2.lock();
                m2.unlock();
                MSG_OK
            })
            .unwrap()
    };
    assert_eq!(a.priority(), prio(200));
    assert_eq!(b.priority(), prio(200));

    assert_eq!(c.set_priority(prio(50)), prio(200));
    assert_eq!(c.priority(), prio(50));
    assert_eq!(b.priority(), prio(50));
    assert_eq!(a.priority(), prio(50));
    assert_eq!(a.nominal_priority(), prio(10));
    kernel.integrity_check().unwrap();

    gate.signal();
    for t in [c, b, a] {
        assert_eq!(t.join(), MSG_OK);
    }
    kernel.integrity_check().unwrap();
}

#[test]
fn boosted_owner_keeps_inherited_priority_when_lowered() {
    let kernel = low_main_kernel();
    let m = Mutex::new(&kernel);
    let gate = Semaphore::new(&kernel, 0);
    let journal = Journal::new();

    let owner = {
        let (m, gate, journal) = (m.clone(), gate.clone(), journal.clone());
        kernel
            .spawn(ThreadConfig::new("owner", prio(10)), move |k| {
                m.lock();
                let _ = gate.wait();
                m.unlock();
                journal.push(("owner", k.priority().raw()));
                MSG_OK
            })
            .unwrap()
    };
    let waiter = {
        let (m, journal) = (m.clone(), journal.clone());
        kernel
            .spawn(ThreadConfig::new("waiter", prio(200)), move |k| {
                m.lock();
                m.unlock();
                journal.push(("waiter", k.priority().raw()));
                MSG_OK
            })
            .unwrap()
    };
    assert_eq!(owner.priority(), prio(200));

    assert_eq!(owner.set_priority(prio(5)), prio(200));
    assert_eq!(owner.priority(), prio(200));
    assert_eq!(owner.nominal_priority(), prio(5));
    kernel.integrity_check().unwrap();

    owner.set_priority(prio(250));
    assert_eq!(owner.priority(), prio(250));
    kernel.integrity_check().unwrap();

    gate.signal();
    waiter.join();
    owner.join();
    assert_eq!(journal.entries(), vec![("owner", 250), ("waiter", 200)]);
    kernel.integrity_check().unwrap();
}

#[test]
fn handles_format_inside_a_critical_section() {
    let kernel = kernel();
    let m = Mutex::new(&kernel);
    let sem = Semaphore::new(&kernel, 1);
    m.lock();
    let text = kernel.lock(|_| format!("{m:?} {sem:?}"));
    assert!(text.starts_with("Mutex("), "{text}");
    assert!(text.contains(" Semaphore("), "{text}");
    m.unlock();
}

#[test]
fn try_lock_reports_contention() {
    let kernel = kernel();
    let m = Mutex::new(&kernel);
    assert_eq!(m.try_lock(), Status::Ok);
    assert_eq!(m.try_lock(), Status::WouldBlock);
    m.unlock();

    let holder = {
        let m = m.clone();
        kernel
            .spawn_suspended(ThreadConfig::new("holder", Priority::HIGH), move |k| {
                m.lock();
                k.sleep(rtk::Interval::ticks(1));
                m.unlock();
                MSG_OK
            })
            .unwrap()
    };
    holder.start();
    assert_eq!(m.try_lock(), Status::WouldBlock);
    kernel.tick();
    assert_eq!(m.try_lock(), Status::Ok);
    m.unlock();
    holder.join();
}

#[test]
#[should_panic(expected = "recursive lock")]
fn recursive_lock_halts_the_kernel() {
    let kernel = kernel();
    let m = Mutex::new(&kernel);
    m.lock();
    m.lock();
}

#[test]
#[should_panic(expected = "does not own")]
fn unlock_by_non_owner_halts_the_kernel() {
    let kernel = kernel();
    let m = Mutex::new(&kernel);
    m.unlock();
}

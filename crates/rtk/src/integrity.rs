//! Structural self-check of the kernel state.

use std::collections::HashMap;

use crate::list::ThreadQueue;
use crate::state::KernelState;
use crate::thread::{State, ThreadId};

impl KernelState {
    /// Walks every list the kernel maintains and reports the first broken
    /// invariant.
    pub(crate) fn integrity_check(&self) -> Result<(), String> {
        self.ready.check(&self.threads)?;
        self.timers.check()?;
        self.check_membership()?;
        self.check_current()?;
        self.check_semaphores()?;
        self.check_mutexes()?;
        for (id, tcb) in self.threads.iter() {
            if tcb.prio < tcb.real_prio {
                return Err(format!("thread {id} runs below its nominal priority"));
            }
        }
        Ok(())
    }

    /// Every queue the kernel owns, with a label for reports.
    fn all_queues(&self) -> Vec<(String, ThreadQueue)> {
        let mut queues = Vec::new();
        for (k, sem) in self.sems.iter() {
            queues.push((format!("{k:?}"), sem.queue));
        }
        for (k, mutex) in self.mutexes.iter() {
            queues.push((format!("{k:?}"), mutex.queue));
        }
        for (k, cond) in self.condvars.iter() {
            queues.push((format!("{k:?}"), cond.queue));
        }
        for (k, queue) in self.queues.iter() {
            queues.push((format!("{k:?}"), *queue));
        }
        for (t, tcb) in self.threads.iter() {
            queues.push((format!("joiners of {t}"), tcb.joiners));
            queues.push((format!("senders of {t}"), tcb.senders));
        }
        queues
    }

    fn check_membership(&self) -> Result<(), String> {
        let mut seen: HashMap<ThreadId, usize> = HashMap::new();
        for t in self.ready.iter(&self.threads) {
            *seen.entry(t).or_default() += 1;
        }
        for (label, queue) in self.all_queues() {
            if !queue.is_consistent(&self.threads) {
                return Err(format!("{label} has broken links"));
            }
            for t in queue.iter(&self.threads) {
                *seen.entry(t).or_default() += 1;
            }
        }
        for (id, tcb) in self.threads.iter() {
            let count = seen.get(&id).copied().unwrap_or(0);
            if count > 1 {
                return Err(format!("thread {id} is linked into {count} lists"));
            }
            if tcb.link.is_queued() != (count == 1) {
                return Err(format!("thread {id} link flag disagrees with its lists"));
            }
        }
        Ok(())
    }

    fn check_current(&self) -> Result<(), String> {
        let Some(c) = self.current else {
            return Ok(());
        };
        let Some(tcb) = self.threads.get(c) else {
            return Err(format!("current thread {c} does not exist"));
        };
        if tcb.state != State::Current || tcb.link.is_queued() {
            return Err(format!("current thread {c} is {:?}", tcb.state));
        }
        let others = self
            .threads
            .iter()
            .filter(|(id, tcb)| *id != c && tcb.state == State::Current)
            .count();
        if others > 0 {
            return Err(format!("{} threads besides {c} claim to run", others));
        }
        Ok(())
    }

    fn check_semaphores(&self) -> Result<(), String> {
        for (k, sem) in self.sems.iter() {
            let waiting = sem.queue.len() as isize;
            let expected = if sem.count < 0 { -sem.count } else { 0 };
            if waiting != expected {
                return Err(format!(
                    "{k:?} has count {} but {waiting} waiters",
                    sem.count
                ));
            }
            for t in sem.queue.iter(&self.threads) {
                if self.threads[t].state != State::WaitSem(k) {
                    return Err(format!("thread {t} queued on {k:?} is not waiting on it"));
                }
            }
        }
        Ok(())
    }

    fn check_mutexes(&self) -> Result<(), String> {
        for (k, mutex) in self.mutexes.iter() {
            let Some(owner) = mutex.owner else {
                if !mutex.queue.is_empty() {
                    return Err(format!("free {k:?} has waiters"));
                }
                continue;
            };
            let Some(otcb) = self.threads.get(owner) else {
                return Err(format!("{k:?} owned by missing thread {owner}"));
            };
            if !otcb.held.contains(&k) {
                return Err(format!("{k:?} missing from the held list of {owner}"));
            }
            let mut last = None;
            for w in mutex.queue.iter(&self.threads) {
                let wtcb = &self.threads[w];
                if wtcb.state != State::WaitMutex(k) {
                    return Err(format!("thread {w} queued on {k:?} is not waiting on it"));
                }
                if wtcb.prio > otcb.prio {
                    return Err(format!("owner {owner} of {k:?} runs below waiter {w}"));
                }
                if last.is_some_and(|p| wtcb.prio > p) {
                    return Err(format!("{k:?} queue is out of priority order"));
                }
                last = Some(wtcb.prio);
            }
        }
        for (id, tcb) in self.threads.iter() {
            for m in &tcb.held {
                if self.mutexes.get(*m).and_then(|cb| cb.owner) != Some(id) {
                    return Err(format!("thread {id} lists {m:?} it does not own"));
                }
            }
        }
        Ok(())
    }
}

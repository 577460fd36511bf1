//! Dining Philosophers Problem on the host.
//!
//! Five philosophers sit at a round table with five forks between them. Each
//! philosopher alternates between thinking and eating, and needs both
//! adjacent forks to eat. Every fork is a kernel mutex; philosophers always
//! take the lower-numbered fork first, which rules out the circular wait.

use std::error::Error;
use std::sync::Arc;

use log::info;
use rtk::{Interval, Kernel, Msg, Mutex, Priority, ThreadConfig};

/// Number of philosophers
const N_PHILO: usize = 5;
/// Meals each philosopher eats before leaving the table
const MEALS: u32 = 3;

fn philosopher(kernel: &Kernel, id: usize, forks: &[Mutex]) -> Msg {
    let hz = kernel.config().tick_hz;
    let left = id;
    let right = (id + 1) % N_PHILO;
    let (first, second) = (left.min(right), left.max(right));

    for meal in 1..=MEALS {
        info!("philo {id}: thinking");
        kernel.sleep(Interval::from_millis(10 + 7 * id as u32, hz));

        info!("philo {id}: hungry");
        forks[first].lock();
        forks[second].lock();
        info!("philo {id}: eating meal {meal} at {}", kernel.now());
        kernel.sleep(Interval::from_millis(15, hz));
        forks[second].unlock();
        forks[first].unlock();
    }
    info!("philo {id}: done");
    MEALS as Msg
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let kernel = Kernel::builder().build()?;
    let ticker = kernel.start_ticker()?;
    let forks: Arc<Vec<Mutex>> = Arc::new((0..N_PHILO).map(|_| Mutex::new(&kernel)).collect());

    let philos = (0..N_PHILO)
        .map(|id| {
            let forks = Arc::clone(&forks);
            let prio = Priority::new(Priority::NORMAL.raw() + 1 + id as u8);
            kernel.spawn(ThreadConfig::new(format!("philo-{id}"), prio), move |k| {
                philosopher(k, id, &forks)
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let meals: Msg = philos.into_iter().map(|p| p.join()).sum();
    info!("all philosophers left after {meals} meals at {}", kernel.now());
    ticker.stop();
    Ok(())
}

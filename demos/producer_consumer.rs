//! Producer and consumer around a bounded mailbox.
//!
//! The producer outpaces the consumer, fills the mailbox and then blocks on
//! each post until the consumer frees a slot.

use std::error::Error;
use std::sync::Arc;

use log::{info, warn};
use rtk::{Interval, Kernel, Priority, ThreadConfig, MSG_OK};
use rtk_lib::Mailbox;

const ITEMS: u32 = 12;

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let kernel = Kernel::builder().build()?;
    let hz = kernel.config().tick_hz;
    let ticker = kernel.start_ticker()?;
    let mailbox: Arc<Mailbox<u32, 4>> = Arc::new(Mailbox::new(&kernel));

    let producer = {
        let mailbox = Arc::clone(&mailbox);
        kernel.spawn(ThreadConfig::new("producer", Priority::new(150)), move |k| {
            for item in 0..ITEMS {
                if let Err(rejected) = mailbox.post(item) {
                    warn!("producer: {rejected}");
                    break;
                }
                info!("producer: posted {item}, {} free", mailbox.free_count());
                k.sleep(Interval::from_millis(2, hz));
            }
            MSG_OK
        })?
    };

    let consumer = {
        let mailbox = Arc::clone(&mailbox);
        kernel.spawn(ThreadConfig::new("consumer", Priority::new(100)), move |k| {
            let mut total = 0;
            loop {
                match mailbox.fetch_timeout(Interval::from_millis(50, hz)) {
                    Ok(item) => {
                        info!("consumer: got {item}");
                        total += item as isize;
                        k.sleep(Interval::from_millis(6, hz));
                    }
                    Err(status) => {
                        info!("consumer: {status}, stopping");
                        break;
                    }
                }
            }
            total
        })?
    };

    producer.join();
    let total = consumer.join();
    info!("consumer summed {total}");
    ticker.stop();
    Ok(())
}

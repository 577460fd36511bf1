//! Synchronous messages.
//!
//! A sender blocks until the receiver replies. Each thread has a FIFO of
//! queued senders; a received sender stays blocked in `SendPending` until
//! [`Kernel::reply`]. None of these calls has a timeout.

use rtk_core::{Msg, MSG_RESET};

use crate::kernel::{Kernel, SysGuard};
use crate::thread::{State, ThreadId};

impl Kernel {
    /// Sends `msg` to `target` and returns its reply. Returns `MSG_RESET`
    /// if the target terminates before answering.
    pub fn send(&self, target: ThreadId, msg: Msg) -> Msg {
        let mut guard = self.lock_s();
        let me = guard.me;
        let st = &mut *guard.st;
        if target == me {
            st.fatal(format!("thread {me} sent a message to itself"));
        }
        let Some(tcb) = st.threads.get(target) else {
            st.fatal(format!("message sent to unknown thread {target}"));
        };
        if tcb.state == State::Final {
            return MSG_RESET;
        }
        st.threads[me].sent = msg;
        let mut senders = st.threads[target].senders;
        senders.push_back(&mut st.threads, me);
        st.threads[target].senders = senders;
        if st.threads[target].state == State::WaitMessage {
            st.wake_i(target, rtk_core::MSG_OK);
        }
        guard.go_sleep(State::SendQueued(target))
    }

    /// Waits for a message and returns its sender and payload. The sender
    /// stays blocked until [`reply`](Self::reply).
    pub fn receive(&self) -> (ThreadId, Msg) {
        let mut guard = self.lock_s();
        let me = guard.me;
        if guard.st.threads[me].senders.is_empty() {
            guard.go_sleep(State::WaitMessage);
        }
        match guard.take_message() {
            Some(received) => received,
            None => guard.st.fatal(format!("thread {me} woke without a message")),
        }
    }

    /// Takes the next message if one is queued.
    pub fn try_receive(&self) -> Option<(ThreadId, Msg)> {
        self.lock_s().take_message()
    }

    pub fn is_message_pending(&self) -> bool {
        let guard = self.lock_s();
        !guard.st.threads[guard.me].senders.is_empty()
    }

    /// Answers the message received from `sender`.
    pub fn reply(&self, sender: ThreadId, answer: Msg) {
        let mut guard = self.lock_s();
        let me = guard.me;
        let pending = guard
            .st
            .threads
            .get(sender)
            .is_some_and(|tcb| tcb.state == State::SendPending(me));
        if !pending {
            guard
                .st
                .fatal(format!("thread {me} replied to {sender} which is not waiting on it"));
        }
        guard.st.wake_i(sender, answer);
        guard.reschedule();
    }
}

impl SysGuard<'_> {
    fn take_message(&mut self) -> Option<(ThreadId, Msg)> {
        let me = self.me;
        let st = &mut *self.st;
        let mut senders = st.threads[me].senders;
        let sender = senders.pop_front(&mut st.threads)?;
        st.threads[me].senders = senders;
        let tcb = &mut st.threads[sender];
        tcb.state = State::SendPending(me);
        Some((sender, tcb.sent))
    }
}

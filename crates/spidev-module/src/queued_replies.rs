//! `QueuedReplies` — poll-based reply collection.
//!
//! Each request gets a numbered [`Reply`] whose outcome is pushed onto a
//! lock-free queue. A host that cannot take callbacks on arbitrary
//! threads drains the queue from its own loop instead.
//!
//! Workers push, the host polls. Outcomes popped while waiting for a
//! different id are parked, in delivery order, and handed out by later
//! `wait_for` or `poll` calls.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use crossbeam_queue::SegQueue;

use spidev_core::outcome::{Outcome, Reply};

/// Request id assigned by [`QueuedReplies::reply`].
pub type ReplyId = u64;

pub struct QueuedReplies {
    queue: Arc<SegQueue<(ReplyId, Outcome)>>,
    next_id: AtomicU64,
    parked: Mutex<VecDeque<(ReplyId, Outcome)>>,
}

impl Default for QueuedReplies {
    fn default() -> Self {
        Self::new()
    }
}

impl QueuedReplies {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(SegQueue::new()),
            next_id: AtomicU64::new(1),
            parked: Mutex::new(VecDeque::new()),
        }
    }

    /// Allocate an id and a reply that enqueues under it.
    pub fn reply(&self) -> (ReplyId, Reply) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::clone(&self.queue);
        let reply = Reply::new(move |outcome| queue.push((id, outcome)));
        (id, reply)
    }

    /// Pop one outcome, parked ones first (non-blocking).
    pub fn poll(&self) -> Option<(ReplyId, Outcome)> {
        let parked = self
            .parked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        parked.or_else(|| self.queue.pop())
    }

    /// Poll for the outcome of `id`, sleeping `interval` between empty
    /// polls, at most `polls` times.
    pub fn wait_for(&self, id: ReplyId, polls: u32, interval: Duration) -> Option<Outcome> {
        if let Some(outcome) = self.take_parked(id) {
            return Some(outcome);
        }
        for _ in 0..polls {
            while let Some((got, outcome)) = self.queue.pop() {
                if got == id {
                    return Some(outcome);
                }
                self.parked
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push_back((got, outcome));
            }
            thread::sleep(interval);
        }
        None
    }

    fn take_parked(&self, id: ReplyId) -> Option<Outcome> {
        let mut parked = self.parked.lock().unwrap_or_else(PoisonError::into_inner);
        let pos = parked.iter().position(|(got, _)| *got == id)?;
        parked.remove(pos).map(|(_, outcome)| outcome)
    }

    /// Outcomes delivered but not yet taken.
    pub fn pending(&self) -> usize {
        self.queue.len() + self.parked.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::errno::Errno;
    use spidev_core::value::Value;

    #[test]
    fn test_poll_in_order() {
        let replies = QueuedReplies::new();
        let (a, reply_a) = replies.reply();
        let (b, reply_b) = replies.reply();
        assert_ne!(a, b);

        reply_a.send(Outcome::ack());
        reply_b.send(Outcome::Busy);
        assert_eq!(replies.pending(), 2);
        assert_eq!(replies.poll(), Some((a, Outcome::ack())));
        assert_eq!(replies.poll(), Some((b, Outcome::Busy)));
        assert_eq!(replies.poll(), None);
    }

    #[test]
    fn test_wait_for_parks_others() {
        let replies = QueuedReplies::new();
        let (a, reply_a) = replies.reply();
        let (b, reply_b) = replies.reply();

        reply_a.send(Outcome::NativeError(Errno::EIO));
        reply_b.send(Outcome::ack());

        let got = replies.wait_for(b, 1, Duration::from_millis(1));
        assert_eq!(got, Some(Outcome::ack()));
        assert_eq!(replies.pending(), 1);

        let got = replies.wait_for(a, 1, Duration::from_millis(1));
        assert_eq!(got, Some(Outcome::NativeError(Errno::EIO)));
        assert_eq!(replies.pending(), 0);
    }

    #[test]
    fn test_parked_poll_in_delivery_order() {
        let replies = QueuedReplies::new();
        let ids: Vec<ReplyId> = (0..4)
            .map(|n| {
                let (id, reply) = replies.reply();
                reply.send(Outcome::Success(Some(Value::Int(n))));
                id
            })
            .collect();

        // Waiting for the last one parks the first three.
        let got = replies.wait_for(ids[3], 1, Duration::from_millis(1));
        assert_eq!(got, Some(Outcome::Success(Some(Value::Int(3)))));

        for (n, id) in ids[..3].iter().enumerate() {
            let expected = Outcome::Success(Some(Value::Int(n as i64)));
            assert_eq!(replies.poll(), Some((*id, expected)));
        }
        assert_eq!(replies.poll(), None);
    }

    #[test]
    fn test_wait_for_cross_thread() {
        let replies = QueuedReplies::new();
        let (id, reply) = replies.reply();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(5));
            reply.send(Outcome::Success(None));
        });
        let got = replies.wait_for(id, 2000, Duration::from_millis(1));
        t.join().unwrap();
        assert_eq!(got, Some(Outcome::ack()));
    }

    #[test]
    fn test_wait_for_times_out() {
        let replies = QueuedReplies::new();
        let (id, _reply) = replies.reply();
        assert_eq!(replies.wait_for(id, 2, Duration::from_millis(1)), None);
    }
}

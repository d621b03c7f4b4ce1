//! Per-connection outbound send budget
//!
//! A fixed-window token bucket: the window opens with the first frame sent
//! after a refill and closes `window` later, restoring the full budget. The
//! owner arms the refill timer whenever [`Drain::window_opened`] is set.

use std::collections::VecDeque;
use std::time::Duration;

/// Queue position for an outbound frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Back of the queue
    Normal,
    /// Front of the queue, ahead of bulk traffic
    Critical,
}

/// Budget of a send window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendBudget {
    pub total: u32,
    pub window: Duration,
}

impl Default for SendBudget {
    fn default() -> Self {
        Self {
            total: 120,
            window: Duration::from_secs(60),
        }
    }
}

/// Frames released by one [`SendLimiter::drain`] call
#[derive(Debug)]
pub struct Drain<T> {
    pub frames: Vec<T>,
    /// A fresh window started; the refill timer must be armed
    pub window_opened: bool,
}

#[derive(Debug)]
pub struct SendLimiter<T> {
    queue: VecDeque<T>,
    budget: SendBudget,
    remaining: u32,
}

impl<T> SendLimiter<T> {
    pub fn new(budget: SendBudget) -> Self {
        Self {
            queue: VecDeque::new(),
            budget,
            remaining: budget.total,
        }
    }

    pub fn push(&mut self, frame: T, priority: Priority) {
        match priority {
            Priority::Normal => self.queue.push_back(frame),
            Priority::Critical => self.queue.push_front(frame),
        }
    }

    /// Release as many queued frames as the window still allows, in queue order
    pub fn drain(&mut self) -> Drain<T> {
        if self.remaining == 0 || self.queue.is_empty() {
            return Drain {
                frames: Vec::new(),
                window_opened: false,
            };
        }

        let window_opened = self.remaining == self.budget.total;
        let take = (self.remaining as usize).min(self.queue.len());
        let frames: Vec<T> = self.queue.drain(..take).collect();
        self.remaining -= frames.len() as u32;

        Drain {
            frames,
            window_opened,
        }
    }

    /// Window elapsed: full budget again
    pub fn refill(&mut self) {
        self.remaining = self.budget.total;
    }

    /// Connection torn down: drop pending frames and restore the budget
    pub fn reset(&mut self) {
        self.queue.clear();
        self.refill();
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn window(&self) -> Duration {
        self.budget.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(total: u32) -> SendLimiter<u32> {
        SendLimiter::new(SendBudget {
            total,
            window: Duration::from_secs(60),
        })
    }

    #[test]
    fn releases_at_most_total_per_window() {
        let mut limiter = limiter(120);
        for n in 0..130 {
            limiter.push(n, Priority::Normal);
        }

        let first = limiter.drain();
        assert!(first.window_opened);
        assert_eq!(first.frames.len(), 120);
        assert_eq!(first.frames[0], 0);
        assert_eq!(first.frames[119], 119);

        let starved = limiter.drain();
        assert!(starved.frames.is_empty());
        assert!(!starved.window_opened);
        assert_eq!(limiter.queued(), 10);

        limiter.refill();
        let second = limiter.drain();
        assert!(second.window_opened);
        assert_eq!(second.frames, (120..130).collect::<Vec<_>>());
    }

    #[test]
    fn window_opens_only_on_first_send_after_refill() {
        let mut limiter = limiter(5);
        limiter.push(1, Priority::Normal);
        assert!(limiter.drain().window_opened);

        limiter.push(2, Priority::Normal);
        let drain = limiter.drain();
        assert_eq!(drain.frames, vec![2]);
        assert!(!drain.window_opened);
        assert_eq!(limiter.remaining(), 3);
    }

    #[test]
    fn critical_frames_jump_the_queue() {
        let mut limiter = limiter(2);
        limiter.push(1, Priority::Normal);
        limiter.push(2, Priority::Normal);
        limiter.push(99, Priority::Critical);

        assert_eq!(limiter.drain().frames, vec![99, 1]);
    }

    #[test]
    fn reset_discards_pending_frames() {
        let mut limiter = limiter(1);
        limiter.push(1, Priority::Normal);
        limiter.push(2, Priority::Normal);
        limiter.drain();
        limiter.reset();

        assert_eq!(limiter.queued(), 0);
        assert_eq!(limiter.remaining(), 1);
    }

    #[test]
    fn empty_queue_does_not_open_a_window() {
        let mut limiter = limiter(3);
        let drain = limiter.drain();
        assert!(drain.frames.is_empty());
        assert!(!drain.window_opened);
        assert_eq!(limiter.remaining(), 3);
    }
}

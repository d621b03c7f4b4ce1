//! Owner-scoped timer registry
//!
//! Each shard and the manager own one registry. Timers are plain deadlines
//! polled from the owner's own select loop, so clearing the registry (or
//! dropping its owner) is all it takes to guarantee a timer never fires
//! against stale state.

use std::fmt::Debug;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};

#[derive(Debug, Clone, Copy)]
struct Entry {
    deadline: Instant,
    period: Option<Duration>,
}

#[derive(Debug)]
pub struct TimerRegistry<K> {
    entries: Vec<(K, Entry)>,
}

impl<K> Default for TimerRegistry<K> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<K: Copy + Eq + Debug> TimerRegistry<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a one-shot timer, replacing any timer under the same key
    pub fn set_timeout(&mut self, key: K, after: Duration) {
        self.insert(key, Instant::now() + after, None);
    }

    /// Arm a repeating timer; the first tick is one period from now
    pub fn set_interval(&mut self, key: K, period: Duration) {
        self.insert(key, Instant::now() + period, Some(period));
    }

    /// Returns whether a timer was armed under `key`
    pub fn clear(&mut self, key: K) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(k, _)| *k != key);
        before != self.entries.len()
    }

    pub fn clear_all(&mut self) {
        self.entries.clear();
    }

    pub fn is_armed(&self, key: K) -> bool {
        self.entries.iter().any(|(k, _)| *k == key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn deadline(&self, key: K) -> Option<Instant> {
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, e)| e.deadline)
    }

    /// Wait for the earliest timer and return its key.
    ///
    /// One-shot timers are removed when they fire, intervals are pushed one
    /// period forward. Pending forever when nothing is armed. Cancel-safe:
    /// nothing changes until the deadline has passed.
    pub async fn next(&mut self) -> K {
        let Some(index) = self.earliest() else {
            return std::future::pending().await;
        };
        sleep_until(self.entries[index].1.deadline).await;

        let (key, entry) = self.entries[index];
        match entry.period {
            Some(period) => self.entries[index].1.deadline += period,
            None => {
                self.entries.swap_remove(index);
            }
        }
        key
    }

    fn earliest(&self) -> Option<usize> {
        self.entries
            .iter()
            .enumerate()
            .min_by_key(|(_, (_, e))| e.deadline)
            .map(|(i, _)| i)
    }

    fn insert(&mut self, key: K, deadline: Instant, period: Option<Duration>) {
        self.clear(key);
        self.entries.push((key, Entry { deadline, period }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Kind {
        Fast,
        Slow,
        Tick,
    }

    #[tokio::test(start_paused = true)]
    async fn fires_in_deadline_order() {
        let mut timers = TimerRegistry::new();
        timers.set_timeout(Kind::Slow, Duration::from_secs(20));
        timers.set_timeout(Kind::Fast, Duration::from_secs(5));

        let start = Instant::now();
        assert_eq!(timers.next().await, Kind::Fast);
        assert_eq!(start.elapsed(), Duration::from_secs(5));
        assert_eq!(timers.next().await, Kind::Slow);
        assert_eq!(start.elapsed(), Duration::from_secs(20));
        assert!(timers.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn interval_rearms_itself() {
        let mut timers = TimerRegistry::new();
        timers.set_interval(Kind::Tick, Duration::from_millis(100));

        let start = Instant::now();
        for n in 1..=3 {
            assert_eq!(timers.next().await, Kind::Tick);
            assert_eq!(start.elapsed(), Duration::from_millis(100 * n));
        }
        assert!(timers.is_armed(Kind::Tick));
    }

    #[tokio::test(start_paused = true)]
    async fn cleared_timer_never_fires() {
        let mut timers = TimerRegistry::new();
        timers.set_timeout(Kind::Fast, Duration::from_secs(1));
        timers.set_timeout(Kind::Slow, Duration::from_secs(2));
        assert!(timers.clear(Kind::Fast));
        assert!(!timers.clear(Kind::Fast));

        assert_eq!(timers.next().await, Kind::Slow);
    }

    #[test]
    fn empty_registry_stays_pending() {
        let mut timers: TimerRegistry<Kind> = TimerRegistry::new();
        let mut next = tokio_test::task::spawn(timers.next());
        tokio_test::assert_pending!(next.poll());
        tokio_test::assert_pending!(next.poll());
    }

    #[test]
    fn rearming_replaces_deadline() {
        let mut timers = TimerRegistry::new();
        timers.set_timeout(Kind::Fast, Duration::from_secs(1));
        let first = timers.deadline(Kind::Fast).unwrap();
        timers.set_timeout(Kind::Fast, Duration::from_secs(10));
        assert!(timers.deadline(Kind::Fast).unwrap() > first);
        timers.clear_all();
        assert!(timers.is_empty());
    }
}

use crate::channel::ChannelKey;
use crate::event::Event;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Timers are named per channel; channel-less timers share the `None` scope.
pub(crate) type TimerKey = (Option<ChannelKey>, Arc<str>);

pub(crate) struct TimerEntry {
    pub(crate) key: TimerKey,
    pub(crate) expiry_ms: u64,
    pub(crate) period: Option<Duration>,
    pub(crate) event: Event,
    seq: u64,
}

/// Pending timers sorted by `(expiry, insertion)`.
#[derive(Default)]
pub(crate) struct TimerQueue {
    entries: Vec<TimerEntry>,
    seq: u64,
}

impl TimerQueue {
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Inserts a timer, replacing a pending one with the same key.
    pub(crate) fn insert(
        &mut self,
        key: TimerKey,
        expiry_ms: u64,
        period: Option<Duration>,
        event: Event,
    ) {
        self.remove(&key);
        self.seq += 1;
        let entry = TimerEntry {
            key,
            expiry_ms,
            period,
            event,
            seq: self.seq,
        };
        let at = self
            .entries
            .partition_point(|e| (e.expiry_ms, e.seq) <= (entry.expiry_ms, entry.seq));
        self.entries.insert(at, entry);
    }

    fn rearm(&mut self, mut entry: TimerEntry, expiry_ms: u64) {
        self.seq += 1;
        entry.expiry_ms = expiry_ms;
        entry.seq = self.seq;
        let at = self
            .entries
            .partition_point(|e| (e.expiry_ms, e.seq) <= (entry.expiry_ms, entry.seq));
        self.entries.insert(at, entry);
    }

    pub(crate) fn remove(&mut self, key: &TimerKey) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| &e.key != key);
        before != self.entries.len()
    }

    pub(crate) fn remove_scope(&mut self, scope: Option<ChannelKey>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.key.0 != scope);
        before - self.entries.len()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn next_expiry(&self) -> Option<u64> {
        self.entries.first().map(|e| e.expiry_ms)
    }

    /// Pops every entry due at `now_ms` in expiry order. Periodic entries are
    /// put back at `now_ms + period` and a copy of their event is returned.
    pub(crate) fn take_due(&mut self, now_ms: u64) -> Vec<Event> {
        let due = self.entries.partition_point(|e| e.expiry_ms <= now_ms);
        let fired: Vec<TimerEntry> = self.entries.drain(..due).collect();
        let mut events = Vec::with_capacity(fired.len());
        for entry in fired {
            match entry.period {
                Some(period) => {
                    events.push(entry.event.clone());
                    let next = now_ms + (period.as_millis() as u64).max(1);
                    self.rearm(entry, next);
                }
                None => events.push(entry.event),
            }
        }
        events
    }
}

/// Millisecond clock of the timer thread.
///
/// Advanced by the time the thread asked to sleep and resynchronised with
/// the monotonic clock after wake-up notifications and at least once per
/// `resync` period, so oversleeping never accumulates.
pub(crate) struct LocalClock {
    origin: Instant,
    now_ms: u64,
    last_sync: Instant,
    resync: Duration,
}

impl LocalClock {
    pub(crate) fn new(resync: Duration) -> Self {
        let now = Instant::now();
        Self {
            origin: now,
            now_ms: 0,
            last_sync: now,
            resync,
        }
    }

    pub(crate) fn now_ms(&mut self) -> u64 {
        if self.last_sync.elapsed() >= self.resync {
            self.resync();
        }
        self.now_ms
    }

    pub(crate) fn tick(&mut self, slept: Duration) {
        self.now_ms += slept.as_millis() as u64;
    }

    pub(crate) fn resync(&mut self) {
        self.last_sync = Instant::now();
        self.now_ms = self.now_ms.max(self.origin.elapsed().as_millis() as u64);
    }
}

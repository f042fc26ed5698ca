//! Timer subsystem: one background thread per engine firing timer events
//! back into their channels.

mod queue;

use crate::channel::ChannelKey;
use crate::config::EngineConfig;
use crate::error::EventError;
use crate::event::Event;
use crate::utils::pin_if_requested;
use anyhow::Context;
use parking_lot::{Condvar, Mutex, MutexGuard};
use queue::{LocalClock, TimerQueue};
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Receives every fired timer event. The engine's sink re-injects it into
/// its channel.
pub type TimerSink = Box<dyn Fn(Event) -> Result<(), EventError> + Send + Sync>;

struct TimerState {
    queue: TimerQueue,
    clock: LocalClock,
    shutdown: bool,
}

pub struct TimerManager {
    state: Mutex<TimerState>,
    wake: Condvar,
    sink: TimerSink,
    poll: Duration,
    resync: Duration,
}

impl TimerManager {
    /// Starts the timer thread.
    pub fn spawn(cfg: &EngineConfig, sink: TimerSink) -> anyhow::Result<(Arc<Self>, JoinHandle<()>)> {
        let resync = cfg.timer_resync();
        let manager = Arc::new(Self {
            state: Mutex::new(TimerState {
                queue: TimerQueue::default(),
                clock: LocalClock::new(resync),
                shutdown: false,
            }),
            wake: Condvar::new(),
            sink,
            poll: cfg.timer_poll(),
            resync,
        });

        let core_id = cfg.timer_core_id;
        let join = thread::Builder::new()
            .name(format!("{}-timer", cfg.thread_name()))
            .spawn({
                let manager = manager.clone();
                move || {
                    pin_if_requested("Timer", core_id);
                    manager.run();
                }
            })
            .context("failed to spawn timer thread")?;

        Ok((manager, join))
    }

    /// Fires `event` once, `delay` from now. Replaces a pending timer with
    /// the same id in the event's channel.
    pub fn schedule_once(&self, id: impl Into<Arc<str>>, delay: Duration, event: Event) {
        self.schedule(id.into(), delay, None, event);
    }

    /// Fires `event` every `period`, first after one period.
    pub fn schedule_periodic(&self, id: impl Into<Arc<str>>, period: Duration, event: Event) {
        self.schedule(id.into(), period, Some(period), event);
    }

    fn schedule(&self, id: Arc<str>, delay: Duration, period: Option<Duration>, event: Event) {
        let scope = event.channel().map(|c| c.key());
        let mut state = self.state.lock();
        if state.shutdown {
            tracing::debug!("[Timer] ignoring `{}` after shutdown", id);
            return;
        }
        state.clock.resync();
        let expiry = state.clock.now_ms() + delay.as_millis() as u64;
        state.queue.insert((scope, id), expiry, period, event);
        self.wake.notify_one();
    }

    /// Cancels timer `id` of `scope`. Returns whether one was pending.
    pub fn cancel(&self, scope: Option<ChannelKey>, id: &str) -> bool {
        let removed = self.state.lock().queue.remove(&(scope, Arc::from(id)));
        if removed {
            self.wake.notify_one();
        }
        removed
    }

    /// Cancels every timer of `scope`.
    pub fn cancel_scope(&self, scope: Option<ChannelKey>) -> usize {
        let removed = self.state.lock().queue.remove_scope(scope);
        if removed > 0 {
            self.wake.notify_one();
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every pending timer and stops the thread.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        if state.shutdown {
            return;
        }
        state.shutdown = true;
        state.queue.clear();
        self.wake.notify_all();
    }

    fn run(&self) {
        tracing::info!("[Timer] thread started");
        let mut state = self.state.lock();
        while !state.shutdown {
            let now = state.clock.now_ms();
            let fired = state.queue.take_due(now);
            if !fired.is_empty() {
                MutexGuard::unlocked(&mut state, || self.deliver(fired));
                continue;
            }

            let wait = state
                .queue
                .next_expiry()
                .map_or(self.poll, |at| Duration::from_millis(at.saturating_sub(now)))
                .min(self.resync);
            if self.wake.wait_for(&mut state, wait).timed_out() {
                state.clock.tick(wait);
            } else {
                state.clock.resync();
            }
        }
        tracing::info!("[Timer] thread stopped");
    }

    fn deliver(&self, fired: Vec<Event>) {
        for event in fired {
            let notification = event.into_timer_notification();
            if let Err(e) = (self.sink)(notification) {
                crate::warn_throttled!(
                    Duration::from_secs(1),
                    "[Timer] dropping fired timer: {}",
                    e
                );
            }
        }
    }
}

impl fmt::Debug for TimerManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerManager")
            .field("pending", &self.len())
            .field("poll", &self.poll)
            .field("resync", &self.resync)
            .finish()
    }
}

//! Running instances of a pipeline.
//!
//! A channel owns one handler per pipeline position, a lazily filled route
//! cache and a lifecycle (`Idle -> Starting -> Open -> Closing -> Closed`).
//! `ChannelInit` opens it when the event reaches the route boundary;
//! `ChannelClose` closes it there and drops the route cache, so every later
//! lookup fails with [`RouteError::ChannelClosed`].

mod cursor;

pub use cursor::ChannelCursor;

use crate::dispatch::DispatchCtx;
use crate::error::{ChannelError, EventError, RouteError};
use crate::event::{Direction, Event, EventKind, Qualifier, Source, TimerSchedule, kinds};
use crate::memory::MemoryBudget;
use crate::protocol::{HandlerRef, Pipeline, Route};
use crate::runtime::EngineHandle;
use crate::scheduler::SchedulerId;
use ahash::AHashMap;
use parking_lot::{Condvar, Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// How long a producer blocked on a starting channel sleeps before checking
/// that the engine is still alive.
const STARTING_RECHECK: Duration = Duration::from_millis(50);

/// Process-unique channel identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelKey(u64);

impl ChannelKey {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ChannelKey(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    Idle,
    Starting,
    Open,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    /// Events that exhausted their route in this channel.
    pub boundary_deliveries: u64,
    /// Events handed over through [`Channel::insert`].
    pub injected: u64,
}

#[derive(Default)]
struct StatsCounters {
    boundary_deliveries: AtomicU64,
    injected: AtomicU64,
}

/// Channel creation knobs.
#[derive(Debug, Clone, Default)]
pub struct ChannelOptions {
    /// Share this scheduler instead of allocating a new one.
    pub scheduler: Option<SchedulerId>,
    /// Producers injecting messages block while this budget is exhausted.
    pub memory_budget: Option<Arc<MemoryBudget>>,
}

impl ChannelOptions {
    pub fn with_scheduler(mut self, scheduler: SchedulerId) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn with_memory_budget(mut self, budget: Arc<MemoryBudget>) -> Self {
        self.memory_budget = Some(budget);
        self
    }
}

struct ChannelInner {
    key: ChannelKey,
    id: Arc<str>,
    pipeline: Pipeline,
    engine: EngineHandle,
    scheduler: SchedulerId,
    budget: Option<Arc<MemoryBudget>>,
    slots: RwLock<Vec<Option<HandlerRef>>>,
    /// `None` once the channel is closed.
    routes: Mutex<Option<AHashMap<&'static str, Route>>>,
    state: Mutex<ChannelState>,
    state_changed: Condvar,
    stats: StatsCounters,
}

#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl Channel {
    pub(crate) fn new(
        pipeline: Pipeline,
        id: Arc<str>,
        engine: &EngineHandle,
        options: ChannelOptions,
    ) -> Self {
        let scheduler = options
            .scheduler
            .unwrap_or_else(|| engine.next_scheduler());
        let slots = vec![None; pipeline.len()];
        Self {
            inner: Arc::new(ChannelInner {
                key: ChannelKey::next(),
                id,
                pipeline,
                engine: engine.clone(),
                scheduler,
                budget: options.memory_budget,
                slots: RwLock::new(slots),
                routes: Mutex::new(Some(AHashMap::new())),
                state: Mutex::new(ChannelState::Idle),
                state_changed: Condvar::new(),
                stats: StatsCounters::default(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn key(&self) -> ChannelKey {
        self.inner.key
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.inner.pipeline
    }

    pub fn scheduler_id(&self) -> SchedulerId {
        self.inner.scheduler
    }

    pub fn memory_budget(&self) -> Option<&Arc<MemoryBudget>> {
        self.inner.budget.as_ref()
    }

    pub fn state(&self) -> ChannelState {
        *self.inner.state.lock()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    pub fn len(&self) -> usize {
        self.inner.pipeline.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.pipeline.is_empty()
    }

    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            boundary_deliveries: self.inner.stats.boundary_deliveries.load(Ordering::Relaxed),
            injected: self.inner.stats.injected.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn engine(&self) -> &EngineHandle {
        &self.inner.engine
    }

    pub fn handler_at(&self, pos: usize) -> Option<HandlerRef> {
        self.inner.slots.read().get(pos).cloned().flatten()
    }

    /// Unit name of the handler bound at each position, `None` where unbound.
    pub fn handler_units(&self) -> Vec<Option<String>> {
        self.inner
            .slots
            .read()
            .iter()
            .map(|slot| slot.as_ref().map(|h| h.unit().to_string()))
            .collect()
    }

    /// Binds `handler` at `pos` before the channel starts.
    pub fn bind(&self, pos: usize, handler: HandlerRef) -> Result<(), ChannelError> {
        self.with_cursor(|cursor| {
            cursor.jump_to(pos)?;
            cursor.set_handler(handler)
        })?
        .map_err(ChannelError::from)
    }

    /// Runs `f` with an unpositioned cursor over the slots of an idle channel.
    pub fn with_cursor<R>(
        &self,
        f: impl FnOnce(&mut ChannelCursor<'_>) -> R,
    ) -> Result<R, ChannelError> {
        if self.state() != ChannelState::Idle {
            return Err(ChannelError::AlreadyStarted);
        }
        let mut slots = self.inner.slots.write();
        let mut cursor = ChannelCursor::new(&self.inner.pipeline, &mut slots);
        Ok(f(&mut cursor))
    }

    /// Starts the channel from outside the dispatch thread; `ChannelInit`
    /// travels through the injection queue. Handlers use
    /// [`DispatchCtx::start_channel`], which queues it synchronously; here
    /// they get [`EventError::WrongThread`]. No-op unless the channel is idle.
    pub fn start(&self) -> Result<(), ChannelError> {
        if self.inner.engine.is_dispatch_thread() {
            return Err(EventError::WrongThread.into());
        }
        let Some(init) = self.prepare_start()? else {
            return Ok(());
        };
        if let Err(e) = self.inner.engine.submit(init) {
            self.set_state(ChannelState::Idle);
            return Err(e.into());
        }
        Ok(())
    }

    /// Ends the channel from outside the dispatch thread; handlers use
    /// [`DispatchCtx::end_channel`].
    pub fn end(&self) -> Result<(), ChannelError> {
        if self.inner.engine.is_dispatch_thread() {
            return Err(EventError::WrongThread.into());
        }
        if let Some(close) = self.prepare_end()? {
            self.inner.engine.submit(close)?;
        }
        Ok(())
    }

    /// Blocks until the channel is open.
    pub fn wait_open(&self, timeout: Duration) -> Result<(), ChannelError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        loop {
            match *state {
                ChannelState::Open => return Ok(()),
                ChannelState::Starting => {
                    if self
                        .inner
                        .state_changed
                        .wait_until(&mut state, deadline)
                        .timed_out()
                        && *state == ChannelState::Starting
                    {
                        return Err(ChannelError::OpenTimeout);
                    }
                }
                _ => return Err(ChannelError::NotOpen),
            }
        }
    }

    pub(crate) fn prepare_start(&self) -> Result<Option<Event>, ChannelError> {
        {
            let mut state = self.inner.state.lock();
            if *state != ChannelState::Idle {
                return Ok(None);
            }
            *state = ChannelState::Starting;
        }
        match self.bind_and_build_init() {
            Ok(init) => {
                tracing::debug!(channel = self.id(), "[Channel] starting");
                Ok(Some(init))
            }
            Err(e) => {
                self.set_state(ChannelState::Idle);
                tracing::error!(channel = self.id(), "[Channel] start failed: {}", e);
                Err(e)
            }
        }
    }

    fn bind_and_build_init(&self) -> Result<Event, ChannelError> {
        let mut slots = self.inner.slots.read().clone();
        let on_dispatch = self.inner.engine.is_dispatch_thread();

        for pos in (0..slots.len()).rev() {
            let Some(handler) = slots[pos].clone() else {
                continue;
            };
            let mut cursor = ChannelCursor::new(&self.inner.pipeline, &mut slots);
            cursor.jump_to(pos)?;
            // The handler running right now cannot be re-entered.
            let guard = if on_dispatch {
                handler.try_lock()
            } else {
                Some(handler.lock())
            };
            match guard {
                Some(mut h) => h.bound_neighbors(&mut cursor)?,
                None => tracing::debug!(
                    channel = self.id(),
                    position = pos,
                    "[Channel] handler busy, neighbour hook skipped"
                ),
            }
        }

        for (pos, slot) in slots.iter_mut().enumerate() {
            if slot.is_none()
                && let Some(unit) = self.inner.pipeline.unit(pos)
            {
                *slot = Some(unit.create_handler());
            }
        }

        for (first, a) in slots.iter().enumerate() {
            let Some(a) = a else { continue };
            for (offset, b) in slots[first + 1..].iter().enumerate() {
                if b.as_ref().is_some_and(|b| a.ptr_eq(b)) {
                    return Err(ChannelError::DuplicateHandler {
                        unit: a.unit().to_string(),
                        first,
                        second: first + 1 + offset,
                    });
                }
            }
        }

        *self.inner.slots.write() = slots;

        for kind in [&kinds::CHANNEL_INIT, &kinds::CHANNEL_CLOSE] {
            self.route_for(kind).map_err(EventError::from)?;
        }
        let mut init = self.lifecycle_event(&kinds::CHANNEL_INIT);
        init.init()?;
        Ok(init)
    }

    pub(crate) fn prepare_end(&self) -> Result<Option<Event>, ChannelError> {
        let mut state = self.inner.state.lock();
        match *state {
            ChannelState::Idle => {
                *state = ChannelState::Closed;
                drop(state);
                self.inner.routes.lock().take();
                self.inner.state_changed.notify_all();
                Ok(None)
            }
            ChannelState::Starting | ChannelState::Open => {
                *state = ChannelState::Closing;
                drop(state);
                let mut close = self.lifecycle_event(&kinds::CHANNEL_CLOSE);
                close.init()?;
                tracing::debug!(channel = self.id(), "[Channel] closing");
                Ok(Some(close))
            }
            ChannelState::Closing | ChannelState::Closed => Ok(None),
        }
    }

    fn lifecycle_event(&self, kind: EventKind) -> Event {
        Event::new(kind)
            .with_channel(self)
            .with_direction(Direction::Up)
            .with_source(Source::Injected)
    }

    /// Route of `kind` in this channel, memoized per concrete kind.
    pub fn route_for(&self, kind: EventKind) -> Result<Route, RouteError> {
        let mut routes = self.inner.routes.lock();
        let cache = routes.as_mut().ok_or(RouteError::ChannelClosed)?;
        if let Some(route) = cache.get(kind.name()) {
            return Ok(route.clone());
        }
        let route = self.inner.pipeline.route_for(kind)?;
        cache.insert(kind.name(), route.clone());
        Ok(route)
    }

    /// Route index the traversal starts at.
    ///
    /// Injected events start at the route end matching `direction`. Events
    /// from a handler start at the first route position past that handler in
    /// `direction`; `-1` or `route.len()` mean straight to the boundary.
    pub fn first_handler_index(
        &self,
        route: &[usize],
        direction: Direction,
        origin: Source,
    ) -> Result<isize, EventError> {
        let end = match direction {
            Direction::Up => route.len() as isize,
            Direction::Down => -1,
        };
        match origin {
            Source::Unknown => Err(EventError::MissingSource),
            Source::Injected => Ok(match direction {
                Direction::Up => 0,
                Direction::Down => route.len() as isize - 1,
            }),
            Source::Handler(pos) => {
                let len = self.len();
                if pos >= len {
                    return Err(EventError::UnknownOrigin { position: pos, len });
                }
                let mut p = pos as isize + direction.step();
                while (0..len as isize).contains(&p) {
                    if let Ok(idx) = route.binary_search(&(p as usize)) {
                        return Ok(idx as isize);
                    }
                    p += direction.step();
                }
                Ok(end)
            }
        }
    }

    /// Hands an event to the engine from outside the dispatch thread. Blocks
    /// while the channel is starting.
    pub fn insert(&self, event: Event) -> Result<(), EventError> {
        {
            let mut state = self.inner.state.lock();
            loop {
                match *state {
                    ChannelState::Open | ChannelState::Closing => break,
                    ChannelState::Idle | ChannelState::Closed => {
                        return Err(EventError::ChannelClosed);
                    }
                    ChannelState::Starting => {
                        if self.inner.engine.is_dispatch_thread() {
                            return Err(EventError::WouldBlock);
                        }
                        if self.inner.engine.is_stopped() {
                            return Err(EventError::EngineStopped);
                        }
                        self.inner
                            .state_changed
                            .wait_for(&mut state, STARTING_RECHECK);
                    }
                }
            }
        }
        self.inner.stats.injected.fetch_add(1, Ordering::Relaxed);
        self.inner.engine.submit(event)
    }

    /// Called by the dispatcher when `event` has exhausted its route.
    pub(crate) fn deliver_to_channel(&self, event: Event, ctx: &mut DispatchCtx<'_>) {
        self.inner
            .stats
            .boundary_deliveries
            .fetch_add(1, Ordering::Relaxed);
        let kind = event.kind();

        if kind.is_a(&kinds::CHANNEL_INIT) {
            // An `end` issued while starting keeps the channel closing.
            if self.transition(ChannelState::Starting, ChannelState::Open) {
                tracing::info!(channel = self.id(), "[Channel] open");
            } else {
                tracing::debug!(channel = self.id(), "[Channel] ended before it opened");
            }
        } else if kind.is_a(&kinds::CHANNEL_CLOSE) {
            self.inner.routes.lock().take();
            self.set_state(ChannelState::Closed);
            let cancelled = ctx.timers().cancel_scope(Some(self.key()));
            tracing::info!(channel = self.id(), cancelled, "[Channel] closed");
        } else if kind.is_a(&kinds::TIMER) {
            self.deliver_timer(event, ctx);
        } else if kind.is_a(&kinds::ECHO) {
            self.deliver_echo(event, ctx);
        }
    }

    fn deliver_timer(&self, event: Event, ctx: &mut DispatchCtx<'_>) {
        let Some(request) = event.timer_request().cloned() else {
            tracing::warn!(channel = self.id(), "[Channel] timer event without request: {:?}", event);
            return;
        };
        let timers = ctx.timers();
        match (request.qualifier, request.schedule) {
            (Qualifier::On, TimerSchedule::Once(delay)) => {
                timers.schedule_once(request.id, delay, event)
            }
            (Qualifier::On, TimerSchedule::Periodic(period)) => {
                timers.schedule_periodic(request.id, period, event)
            }
            (Qualifier::Off, _) => {
                timers.cancel(Some(self.key()), &request.id);
            }
            (Qualifier::Notify, _) => {}
        }
    }

    fn deliver_echo(&self, event: Event, ctx: &mut DispatchCtx<'_>) {
        let direction = event.direction().unwrap_or(Direction::Up);
        let Some(mut inner) = event.into_echo_inner() else {
            return;
        };
        inner.set_channel(self);
        inner.set_direction(direction.reverse());
        inner.set_source(Source::Injected);
        match inner.init() {
            Ok(()) => ctx.insert(inner),
            Err(e) => crate::warn_throttled!(
                Duration::from_secs(1),
                "[Channel] dropping echoed {} in {}: {}",
                inner.kind(),
                self.id(),
                e
            ),
        }
    }

    fn transition(&self, from: ChannelState, to: ChannelState) -> bool {
        let mut state = self.inner.state.lock();
        if *state != from {
            return false;
        }
        *state = to;
        drop(state);
        self.inner.state_changed.notify_all();
        true
    }

    fn set_state(&self, next: ChannelState) {
        *self.inner.state.lock() = next;
        self.inner.state_changed.notify_all();
    }
}

impl PartialEq for Channel {
    fn eq(&self, other: &Self) -> bool {
        self.inner.key == other.inner.key
    }
}

impl Eq for Channel {}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.inner.id)
            .field("pipeline", &self.inner.pipeline.name())
            .field("state", &self.state())
            .finish()
    }
}

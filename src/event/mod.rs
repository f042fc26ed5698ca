//! Events and their traversal over a channel's route.
//!
//! An event is built off the dispatch thread or inside a handler, pointed at
//! a channel and a direction, initialized (which freezes its route and start
//! index) and then handed to the scheduler with [`Event::go`] or
//! [`Event::async_go`]. Each dispatch advances it one route position.

mod direction;
mod kind;

pub use direction::{Direction, Priority, Qualifier, Source};
pub use kind::{Ancestors, EventKind, EventType, kinds};

use crate::channel::Channel;
use crate::dispatch::DispatchCtx;
use crate::error::EventError;
use crate::message::Message;
use crate::protocol::Route;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// When a timer request fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerSchedule {
    Once(Duration),
    Periodic(Duration),
}

/// Payload of timer kinds: what the channel boundary should do with the timer
/// named `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerRequest {
    pub id: Arc<str>,
    pub qualifier: Qualifier,
    pub schedule: TimerSchedule,
}

#[derive(Debug, Clone, Default)]
pub enum EventBody {
    #[default]
    Empty,
    Message(Message),
    Timer(TimerRequest),
    /// Turned around and re-injected at the channel boundary.
    Echo(Box<Event>),
}

/// Result of one cursor step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// Deliver to the handler at this stack position.
    Handler(usize),
    /// Route exhausted; the channel boundary receives the event. Returned
    /// once.
    Boundary,
    Finished,
}

struct Traversal {
    route: Route,
    /// Route index visited by the next step; may sit one past either end.
    next: isize,
    current: Option<usize>,
    exhausted: bool,
}

pub struct Event {
    kind: EventKind,
    channel: Option<Channel>,
    direction: Option<Direction>,
    source: Source,
    priority: Priority,
    body: EventBody,
    attachment: Option<Arc<dyn Any + Send + Sync>>,
    traversal: Option<Traversal>,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            channel: None,
            direction: None,
            source: Source::Unknown,
            priority: Priority::DEFAULT,
            body: EventBody::Empty,
            attachment: None,
            traversal: None,
        }
    }

    /// An event carrying `message`; `kind` should specialize `Sendable`.
    pub fn sendable(kind: EventKind, message: Message) -> Self {
        debug_assert!(kind.is_a(&kinds::SENDABLE), "{kind} is not sendable");
        Self::new(kind).with_body(EventBody::Message(message))
    }

    /// One-shot timer request, fired `delay` after it reaches the boundary.
    pub fn timer(kind: EventKind, id: impl Into<Arc<str>>, delay: Duration) -> Self {
        Self::new_timer(kind, id.into(), Qualifier::On, TimerSchedule::Once(delay))
    }

    pub fn periodic(kind: EventKind, id: impl Into<Arc<str>>, period: Duration) -> Self {
        Self::new_timer(kind, id.into(), Qualifier::On, TimerSchedule::Periodic(period))
    }

    /// Cancels the pending timer `id` of the channel it reaches.
    pub fn timer_cancel(kind: EventKind, id: impl Into<Arc<str>>) -> Self {
        Self::new_timer(kind, id.into(), Qualifier::Off, TimerSchedule::Once(Duration::ZERO))
    }

    fn new_timer(
        kind: EventKind,
        id: Arc<str>,
        qualifier: Qualifier,
        schedule: TimerSchedule,
    ) -> Self {
        debug_assert!(kind.is_a(&kinds::TIMER), "{kind} is not a timer kind");
        Self::new(kind).with_body(EventBody::Timer(TimerRequest {
            id,
            qualifier,
            schedule,
        }))
    }

    /// Wraps `inner`; at the boundary `inner` comes back the other way.
    pub fn echo(inner: Event) -> Self {
        Self::new(&kinds::ECHO).with_body(EventBody::Echo(Box::new(inner)))
    }

    pub fn with_channel(mut self, channel: &Channel) -> Self {
        self.set_channel(channel);
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.set_direction(direction);
        self
    }

    pub fn with_source(mut self, source: Source) -> Self {
        self.set_source(source);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_body(mut self, body: EventBody) -> Self {
        self.body = body;
        self
    }

    // Changing where an event goes undoes initialization.

    pub fn set_channel(&mut self, channel: &Channel) {
        self.channel = Some(channel.clone());
        self.traversal = None;
    }

    pub fn set_direction(&mut self, direction: Direction) {
        self.direction = Some(direction);
        self.traversal = None;
    }

    pub fn set_source(&mut self, source: Source) {
        self.source = source;
        self.traversal = None;
    }

    pub fn set_priority(&mut self, priority: Priority) {
        self.priority = priority;
    }

    #[inline]
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    #[inline]
    pub fn channel(&self) -> Option<&Channel> {
        self.channel.as_ref()
    }

    #[inline]
    pub fn direction(&self) -> Option<Direction> {
        self.direction
    }

    #[inline]
    pub fn source(&self) -> Source {
        self.source
    }

    #[inline]
    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn body(&self) -> &EventBody {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut EventBody {
        &mut self.body
    }

    pub fn message(&self) -> Option<&Message> {
        match &self.body {
            EventBody::Message(m) => Some(m),
            _ => None,
        }
    }

    pub fn message_mut(&mut self) -> Option<&mut Message> {
        match &mut self.body {
            EventBody::Message(m) => Some(m),
            _ => None,
        }
    }

    pub fn timer_request(&self) -> Option<&TimerRequest> {
        match &self.body {
            EventBody::Timer(t) => Some(t),
            _ => None,
        }
    }

    pub fn qualifier(&self) -> Option<Qualifier> {
        self.timer_request().map(|t| t.qualifier)
    }

    pub fn attach<T: Any + Send + Sync>(&mut self, value: T) {
        self.attachment = Some(Arc::new(value));
    }

    pub fn attachment<T: Any>(&self) -> Option<&T> {
        self.attachment.as_deref()?.downcast_ref()
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.traversal.is_some()
    }

    /// Stack position of the handler currently holding the event.
    #[inline]
    pub fn position(&self) -> Option<usize> {
        self.traversal.as_ref().and_then(|t| t.current)
    }

    pub fn route(&self) -> Option<&Route> {
        self.traversal.as_ref().map(|t| &t.route)
    }

    /// Resolves the route and the first position to visit.
    pub fn init(&mut self) -> Result<(), EventError> {
        let channel = self.channel.as_ref().ok_or(EventError::MissingChannel)?;
        let direction = self.direction.ok_or(EventError::MissingDirection)?;
        if self.source == Source::Unknown {
            return Err(EventError::MissingSource);
        }
        let route = channel.route_for(self.kind)?;
        let next = channel.first_handler_index(&route, direction, self.source)?;
        self.traversal = Some(Traversal {
            route,
            next,
            current: None,
            exhausted: false,
        });
        Ok(())
    }

    /// Moves one route position in the event's direction.
    ///
    /// The step past the last position returns [`Advance::Boundary`] and
    /// returns any budget leases held by the message; every later call
    /// returns [`Advance::Finished`].
    pub fn advance(&mut self) -> Result<Advance, EventError> {
        let direction = self.direction.ok_or(EventError::MissingDirection)?;
        let t = self.traversal.as_mut().ok_or(EventError::NotInitialized)?;
        if t.exhausted {
            return Ok(Advance::Finished);
        }
        if let Some(&pos) = usize::try_from(t.next).ok().and_then(|i| t.route.get(i)) {
            t.current = Some(pos);
            t.next += direction.step();
            return Ok(Advance::Handler(pos));
        }
        t.exhausted = true;
        t.current = None;
        if let EventBody::Message(msg) = &mut self.body {
            msg.release_leases();
        }
        Ok(Advance::Boundary)
    }

    /// Queues the event from inside a handler.
    pub fn go(self, ctx: &mut DispatchCtx<'_>) -> Result<(), EventError> {
        if !self.is_initialized() {
            return Err(EventError::NotInitialized);
        }
        if !ctx.engine().is_dispatch_thread()
            || self.channel.as_ref().is_some_and(|c| !ctx.owns(c))
        {
            return Err(EventError::WrongThread);
        }
        ctx.insert(self);
        Ok(())
    }

    /// Injects the event from outside the dispatch thread. Traversal starts at
    /// the route end matching `direction`. Blocks while the channel's memory
    /// budget is exhausted or the channel is still opening.
    pub fn async_go(mut self, channel: &Channel, direction: Direction) -> Result<(), EventError> {
        self.channel = Some(channel.clone());
        self.direction = Some(direction);
        self.source = Source::Injected;
        self.init()?;
        if channel.engine().is_dispatch_thread() {
            return Err(EventError::WrongThread);
        }
        if let Some(budget) = channel.memory_budget()
            && let EventBody::Message(msg) = &mut self.body
        {
            let lease = budget.acquire(msg.len());
            msg.attach_lease(lease);
        }
        channel.insert(self)
    }

    /// Sends the event back into its own channel, in its own direction.
    pub(crate) fn reinject(self) -> Result<(), EventError> {
        let channel = self.channel.clone().ok_or(EventError::MissingChannel)?;
        let direction = self.direction.ok_or(EventError::MissingDirection)?;
        self.async_go(&channel, direction)
    }

    /// The event a fired timer sends back: `Notify`, reversed, injected.
    pub(crate) fn into_timer_notification(mut self) -> Self {
        if let EventBody::Timer(req) = &mut self.body {
            req.qualifier = Qualifier::Notify;
        }
        self.direction = self.direction.map(Direction::reverse);
        self.source = Source::Injected;
        self.traversal = None;
        self
    }

    pub(crate) fn into_echo_inner(self) -> Option<Event> {
        match self.body {
            EventBody::Echo(inner) => Some(*inner),
            _ => None,
        }
    }
}

impl Clone for Event {
    /// Fresh, uninitialized copy. The message shares its blocks.
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            channel: self.channel.clone(),
            direction: self.direction,
            source: Source::Unknown,
            priority: self.priority,
            body: self.body.clone(),
            attachment: self.attachment.clone(),
            traversal: None,
        }
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("kind", &self.kind)
            .field("channel", &self.channel.as_ref().map(Channel::id))
            .field("direction", &self.direction)
            .field("source", &self.source)
            .field("priority", &self.priority)
            .field("position", &self.position())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelOptions;
    use crate::memory::MemoryBudget;
    use crate::test::support::{self, DATA};

    #[test]
    fn advance_visits_route_once_then_boundary() {
        let engine = support::engine();
        let pipeline = support::pipeline(&["a", "b", "c"]);
        let budget = MemoryBudget::new(1024);
        let channel = pipeline.create_channel_with(
            "advance",
            engine.handle(),
            ChannelOptions::default().with_memory_budget(budget.clone()),
        );

        let mut msg = Message::from(vec![0u8; 10]);
        msg.attach_lease(budget.acquire(10));
        let mut ev = Event::sendable(&DATA, msg)
            .with_channel(&channel)
            .with_direction(Direction::Up)
            .with_source(Source::Injected);
        ev.init().unwrap();

        for expected in 0..3 {
            assert_eq!(ev.advance().unwrap(), Advance::Handler(expected));
            assert_eq!(ev.position(), Some(expected));
            assert_eq!(budget.used(), 10);
        }
        assert_eq!(ev.advance().unwrap(), Advance::Boundary);
        assert_eq!(budget.used(), 0);
        assert_eq!(ev.advance().unwrap(), Advance::Finished);
        assert_eq!(ev.advance().unwrap(), Advance::Finished);
        assert_eq!(budget.used(), 0);
    }

    #[test]
    fn start_index_depends_on_direction_and_origin() {
        let engine = support::engine();
        let channel = support::pipeline(&["a", "b", "c"]).create_channel("origin", engine.handle());

        let mut down = Event::new(&DATA)
            .with_channel(&channel)
            .with_direction(Direction::Down)
            .with_source(Source::Injected);
        down.init().unwrap();
        assert_eq!(down.advance().unwrap(), Advance::Handler(2));

        let mut from_b = Event::new(&DATA)
            .with_channel(&channel)
            .with_direction(Direction::Up)
            .with_source(Source::Handler(1));
        from_b.init().unwrap();
        assert_eq!(from_b.advance().unwrap(), Advance::Handler(2));
        assert_eq!(from_b.advance().unwrap(), Advance::Boundary);

        let mut from_bottom = Event::new(&DATA)
            .with_channel(&channel)
            .with_direction(Direction::Down)
            .with_source(Source::Handler(0));
        from_bottom.init().unwrap();
        assert_eq!(from_bottom.advance().unwrap(), Advance::Boundary);

        let mut stray = Event::new(&DATA)
            .with_channel(&channel)
            .with_direction(Direction::Up)
            .with_source(Source::Handler(7));
        assert!(matches!(
            stray.init(),
            Err(EventError::UnknownOrigin { position: 7, len: 3 })
        ));
    }

    #[test]
    fn init_reports_missing_attributes() {
        let engine = support::engine();
        let channel = support::pipeline(&["a"]).create_channel("missing", engine.handle());

        let mut ev = Event::new(&DATA);
        assert!(matches!(ev.init(), Err(EventError::MissingChannel)));
        ev.set_channel(&channel);
        assert!(matches!(ev.init(), Err(EventError::MissingDirection)));
        ev.set_direction(Direction::Up);
        assert!(matches!(ev.init(), Err(EventError::MissingSource)));
        assert!(matches!(ev.advance(), Err(EventError::NotInitialized)));
        ev.set_source(Source::Injected);
        ev.init().unwrap();
        assert!(ev.is_initialized());

        ev.set_direction(Direction::Down);
        assert!(!ev.is_initialized());
    }

    #[test]
    fn clone_resets_cursor_and_shares_payload() {
        let engine = support::engine();
        let channel = support::pipeline(&["a", "b"]).create_channel("clone", engine.handle());

        let mut ev = Event::sendable(&DATA, Message::from(vec![1, 2, 3]))
            .with_channel(&channel)
            .with_direction(Direction::Up)
            .with_source(Source::Handler(0))
            .with_priority(Priority(3));
        ev.attach(42u32);
        ev.init().unwrap();
        ev.advance().unwrap();

        let copy = ev.clone();
        assert!(!copy.is_initialized());
        assert_eq!(copy.source(), Source::Unknown);
        assert_eq!(copy.priority(), Priority(3));
        assert_eq!(copy.attachment::<u32>(), Some(&42));
        assert_eq!(copy.attachment::<u64>(), None);
        assert_eq!(copy.message(), ev.message());
    }

    #[test]
    fn timer_notification_turns_around() {
        let ev = Event::timer(&kinds::TIMER, "t", Duration::from_millis(5))
            .with_direction(Direction::Down)
            .with_source(Source::Handler(1));
        let fired = ev.into_timer_notification();
        assert_eq!(fired.qualifier(), Some(Qualifier::Notify));
        assert_eq!(fired.direction(), Some(Direction::Up));
        assert_eq!(fired.source(), Source::Injected);
        assert_eq!(fired.timer_request().map(|t| &*t.id), Some("t"));
    }
}

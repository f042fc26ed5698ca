//! The dispatch-thread side of the engine: scheduler set, active dispatch
//! point and the context handed to handlers.

use crate::channel::Channel;
use crate::error::{ChannelError, EventError, HandlerFault};
use crate::event::{Advance, Direction, Event, Source};
use crate::runtime::EngineHandle;
use crate::scheduler::{DispatchPoint, EventScheduler, Lane};
use crate::timer::TimerManager;
use std::time::Duration;

pub(crate) struct Dispatcher {
    engine: EngineHandle,
    schedulers: Vec<EventScheduler>,
    active: Option<DispatchPoint>,
}

impl Dispatcher {
    pub(crate) fn new(engine: EngineHandle) -> Self {
        Self {
            engine,
            schedulers: Vec::new(),
            active: None,
        }
    }

    /// Queues an event that entered through the injection channel; it was
    /// counted as pending when submitted.
    pub(crate) fn enqueue_injected(&mut self, event: Event) {
        let Some(sid) = event.channel().map(|c| c.scheduler_id().index()) else {
            self.engine.consumed();
            tracing::warn!("[Engine] dropping injected event without channel: {:?}", event);
            return;
        };
        self.scheduler_mut(sid).insert(event, None);
    }

    /// Synchronous insertion from the dispatch thread.
    pub(crate) fn insert(&mut self, event: Event) -> Option<Lane> {
        let sid = event.channel()?.scheduler_id().index();
        self.engine.submitted();
        let active = self.active.as_ref();
        if sid >= self.schedulers.len() {
            self.schedulers.resize_with(sid + 1, EventScheduler::new);
        }
        Some(self.schedulers[sid].insert(event, active))
    }

    fn scheduler_mut(&mut self, sid: usize) -> &mut EventScheduler {
        if sid >= self.schedulers.len() {
            self.schedulers.resize_with(sid + 1, EventScheduler::new);
        }
        &mut self.schedulers[sid]
    }

    /// One round over every scheduler. A scheduler keeps the dispatch thread
    /// while it holds continuations of the handler it just ran.
    pub(crate) fn run_round(&mut self) -> Result<bool, HandlerFault> {
        let mut progressed = false;
        for sid in 0..self.schedulers.len() {
            if !self.consume_event(sid)? {
                continue;
            }
            progressed = true;
            while self.schedulers[sid].has_continuation() {
                self.consume_event(sid)?;
            }
        }
        Ok(progressed)
    }

    /// Takes the next event of scheduler `sid`, advances it and delivers it to
    /// the next handler or to the channel boundary.
    pub(crate) fn consume_event(&mut self, sid: usize) -> Result<bool, HandlerFault> {
        let Some(event) = self.schedulers.get_mut(sid).and_then(EventScheduler::next_event)
        else {
            return Ok(false);
        };
        // Counted as consumed only once delivered, so the events it causes are
        // already pending by then.
        let delivered = self.deliver(event);
        self.engine.consumed();
        delivered.map(|()| true)
    }

    fn deliver(&mut self, mut event: Event) -> Result<(), HandlerFault> {
        let Some(channel) = event.channel().cloned() else {
            return Ok(());
        };

        match event.advance() {
            Ok(Advance::Handler(pos)) => self.invoke(channel, pos, event)?,
            Ok(Advance::Boundary) => {
                let mut ctx = DispatchCtx { dispatcher: &mut *self };
                channel.deliver_to_channel(event, &mut ctx);
            }
            Ok(Advance::Finished) => {
                tracing::debug!("[Engine] event already past its route: {:?}", event);
            }
            Err(e) => {
                crate::warn_throttled!(
                    Duration::from_secs(1),
                    "[Engine] dropping event that cannot advance: {}",
                    e
                );
            }
        }
        Ok(())
    }

    fn invoke(&mut self, channel: Channel, pos: usize, event: Event) -> Result<(), HandlerFault> {
        let Some(handler) = channel.handler_at(pos) else {
            tracing::warn!(
                channel = channel.id(),
                position = pos,
                "[Engine] no handler bound, dropping {}",
                event.kind()
            );
            return Ok(());
        };

        let kind = event.kind();
        let origin = event.source();
        let direction = event.direction().unwrap_or(Direction::Up);
        self.active = Some(DispatchPoint {
            channel: channel.clone(),
            position: pos,
            direction,
        });

        let result = {
            let mut guard = handler.lock();
            let mut ctx = DispatchCtx { dispatcher: &mut *self };
            guard.handle(event, &mut ctx)
        };
        self.active = None;

        result.map_err(|cause| {
            tracing::error!(
                unit = handler.unit(),
                kind = kind.name(),
                direction = ?direction,
                origin = %origin,
                channel = channel.id(),
                position = pos,
                "[Engine] handler fault: {:#}",
                cause
            );
            HandlerFault {
                unit: handler.unit().to_string(),
                kind: kind.name(),
                direction,
                origin,
                channel: channel.id().to_string(),
                cause,
            }
        })
    }

    pub(crate) fn queued(&self) -> usize {
        self.schedulers.iter().map(EventScheduler::len).sum()
    }
}

/// What a handler sees of the engine while it runs.
pub struct DispatchCtx<'a> {
    dispatcher: &'a mut Dispatcher,
}

impl DispatchCtx<'_> {
    pub fn engine(&self) -> &EngineHandle {
        &self.dispatcher.engine
    }

    pub fn timers(&self) -> &TimerManager {
        self.dispatcher.engine.timers()
    }

    /// Channel of the handler being run.
    pub fn channel(&self) -> Option<&Channel> {
        self.dispatcher.active.as_ref().map(|p| &p.channel)
    }

    /// Stack position of the handler being run.
    pub fn position(&self) -> Option<usize> {
        self.dispatcher.active.as_ref().map(|p| p.position)
    }

    pub fn direction(&self) -> Option<Direction> {
        self.dispatcher.active.as_ref().map(|p| p.direction)
    }

    /// Source to stamp on events the running handler creates.
    pub fn source(&self) -> Source {
        self.position().map_or(Source::Injected, Source::Handler)
    }

    /// Sends a new event from the running handler into its channel.
    pub fn emit(&mut self, mut event: Event, direction: Direction) -> Result<(), EventError> {
        let channel = self.channel().cloned().ok_or(EventError::MissingChannel)?;
        event.set_channel(&channel);
        event.set_direction(direction);
        event.set_source(self.source());
        event.init()?;
        event.go(self)
    }

    /// Starts `channel`, queueing its `ChannelInit` right away.
    pub fn start_channel(&mut self, channel: &Channel) -> Result<(), ChannelError> {
        if !self.owns(channel) {
            return Err(EventError::WrongThread.into());
        }
        if let Some(init) = channel.prepare_start()? {
            self.insert(init);
        }
        Ok(())
    }

    /// Ends `channel`, queueing its `ChannelClose` right away.
    pub fn end_channel(&mut self, channel: &Channel) -> Result<(), ChannelError> {
        if !self.owns(channel) {
            return Err(EventError::WrongThread.into());
        }
        if let Some(close) = channel.prepare_end()? {
            self.insert(close);
        }
        Ok(())
    }

    /// True if `channel` runs on this engine.
    pub fn owns(&self, channel: &Channel) -> bool {
        channel.engine().ptr_eq(&self.dispatcher.engine)
    }

    /// Asks the engine to stop once the running handler returns.
    pub fn stop_engine(&self) {
        self.dispatcher.engine.request_shutdown();
    }

    pub(crate) fn insert(&mut self, event: Event) {
        if self.dispatcher.insert(event).is_none() {
            tracing::warn!("[Engine] dropping event without channel");
        }
    }
}

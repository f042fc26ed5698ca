use crate::channel::ChannelCursor;
use crate::dispatch::DispatchCtx;
use crate::error::CursorError;
use crate::event::{Event, EventKind};
use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::sync::Arc;

/// Event types a unit provides, requires and accepts.
///
/// `provides` and `requires` are checked once when a pipeline is built;
/// `accepts` decides which routes include the unit's stack position.
#[derive(Debug, Clone)]
pub struct UnitContract {
    name: Arc<str>,
    provides: Vec<EventKind>,
    requires: Vec<EventKind>,
    accepts: Vec<EventKind>,
}

impl UnitContract {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            provides: Vec::new(),
            requires: Vec::new(),
            accepts: Vec::new(),
        }
    }

    pub fn provides(mut self, kind: EventKind) -> Self {
        push_unique(&mut self.provides, kind);
        self
    }

    pub fn requires(mut self, kind: EventKind) -> Self {
        push_unique(&mut self.requires, kind);
        self
    }

    pub fn accepts(mut self, kind: EventKind) -> Self {
        push_unique(&mut self.accepts, kind);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn provided(&self) -> &[EventKind] {
        &self.provides
    }

    pub fn required(&self) -> &[EventKind] {
        &self.requires
    }

    pub fn accepted(&self) -> &[EventKind] {
        &self.accepts
    }

    /// True if this unit accepts `kind` itself or one of its ancestors.
    pub fn accepts_kind(&self, kind: EventKind) -> bool {
        self.accepts.iter().any(|a| kind.is_a(a))
    }

    pub(crate) fn shared_name(&self) -> Arc<str> {
        self.name.clone()
    }
}

fn push_unique(set: &mut Vec<EventKind>, kind: EventKind) {
    if !set.contains(&kind) {
        set.push(kind);
    }
}

/// A composable protocol layer: a contract plus a factory of per-channel
/// handlers.
pub trait ProtocolUnit: Send + Sync + 'static {
    fn contract(&self) -> &UnitContract;

    /// A fresh handler for one channel. Called at channel start for every
    /// position left unbound.
    fn create_handler(&self) -> HandlerRef;
}

/// Per-channel state of a protocol unit.
///
/// All handler code runs on the engine's dispatch thread. A handler that
/// wants an event to keep travelling must hand it back with
/// [`Event::go`]; events that are not forwarded stop here. That includes
/// `ChannelInit`: a channel only opens once that event reaches the top.
pub trait Handler: Send + 'static {
    fn handle(&mut self, event: Event, ctx: &mut DispatchCtx<'_>) -> anyhow::Result<()>;

    /// Runs during channel start, top-down, with the cursor positioned at
    /// this handler. Lets a handler bind neighbours it wants to share state
    /// with before defaults fill the remaining slots.
    fn bound_neighbors(&mut self, _cursor: &mut ChannelCursor<'_>) -> Result<(), CursorError> {
        Ok(())
    }
}

/// Shared, lockable handle to a handler, tagged with its unit's name.
#[derive(Clone)]
pub struct HandlerRef {
    unit: Arc<str>,
    inner: Arc<Mutex<dyn Handler>>,
}

impl HandlerRef {
    pub fn new<H: Handler>(unit: impl Into<Arc<str>>, handler: H) -> Self {
        Self {
            unit: unit.into(),
            inner: Arc::new(Mutex::new(handler)),
        }
    }

    /// Handler of `unit`, the usual body of [`ProtocolUnit::create_handler`].
    pub fn for_unit<H: Handler>(unit: &UnitContract, handler: H) -> Self {
        Self::new(unit.shared_name(), handler)
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Same handler instance.
    pub fn ptr_eq(&self, other: &HandlerRef) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn lock(&self) -> MutexGuard<'_, dyn Handler> {
        self.inner.lock()
    }

    pub(crate) fn try_lock(&self) -> Option<MutexGuard<'_, dyn Handler>> {
        self.inner.try_lock()
    }
}

impl fmt::Debug for HandlerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRef")
            .field("unit", &self.unit)
            .field("ptr", &Arc::as_ptr(&self.inner).cast::<()>())
            .finish()
    }
}

pub use crate::channel::{Channel, ChannelCursor, ChannelOptions, ChannelState};
pub use crate::config::EngineConfig;
pub use crate::dispatch::DispatchCtx;
pub use crate::error::{
    ChannelError, CursorError, EventError, HandlerFault, MessageError, PipelineError, RouteError,
};
pub use crate::event::{Direction, Event, EventBody, EventKind, EventType, Priority, Qualifier, Source, kinds};
pub use crate::memory::MemoryBudget;
pub use crate::message::{Message, ObjectSlot};
pub use crate::protocol::{Handler, HandlerRef, Pipeline, ProtocolUnit, UnitContract};
pub use crate::runtime::{Engine, EngineHandle};

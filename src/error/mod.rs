use crate::event::{Direction, Source};
use thiserror::Error;

/// Pipeline construction failures. Fatal: no pipeline is produced.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("pipeline has no protocol units")]
    Empty,
    #[error("unit `{unit}` requires `{required}` but no unit provides it")]
    UnmetRequirement { unit: String, required: &'static str },
}

/// Route lookup failures.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("no handler in the stack accepts `{0}`")]
    UnwantedEvent(&'static str),
    #[error("channel is closed")]
    ChannelClosed,
}

/// Event lifecycle and injection failures.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("event is not initialized")]
    NotInitialized,
    #[error("event has no channel")]
    MissingChannel,
    #[error("event has no direction")]
    MissingDirection,
    #[error("event source is not set")]
    MissingSource,
    #[error("unknown qualifier value {0}")]
    UnknownQualifier(u8),
    #[error("origin position {position} is outside a stack of {len}")]
    UnknownOrigin { position: usize, len: usize },
    #[error(transparent)]
    Route(#[from] RouteError),
    #[error("channel is closed")]
    ChannelClosed,
    #[error("operation would block the dispatch thread")]
    WouldBlock,
    #[error("called from the wrong thread")]
    WrongThread,
    #[error("engine is stopped")]
    EngineStopped,
}

/// Channel cursor failures, raised while binding handlers to positions.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CursorError {
    #[error("cursor is not positioned")]
    NotPositioned,
    #[error("cursor is at the bottom of the stack")]
    AtBottom,
    #[error("cursor is at the top of the stack")]
    AtTop,
    #[error("position {0} already has a handler")]
    AlreadySet(usize),
    #[error("position {position} belongs to unit `{expected}`, handler is from `{found}`")]
    WrongUnit {
        position: usize,
        expected: String,
        found: String,
    },
    #[error("jump target {0} is outside the stack")]
    InvalidJump(isize),
}

/// Channel lifecycle failures.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("handler of unit `{unit}` is bound at positions {first} and {second}")]
    DuplicateHandler {
        unit: String,
        first: usize,
        second: usize,
    },
    #[error(transparent)]
    Cursor(#[from] CursorError),
    #[error("channel was already started")]
    AlreadyStarted,
    #[error("channel is not open")]
    NotOpen,
    #[error("timed out waiting for the channel to open")]
    OpenTimeout,
    #[error(transparent)]
    Event(#[from] EventError),
}

/// Buffer codec failures; always surfaced to the caller of the push/pop.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("end of data: needed {needed} bytes, {available} available")]
    EndOfData { needed: usize, available: usize },
    #[error("malformed length {0}")]
    MalformedLength(usize),
    #[error("unknown object tag {0}")]
    InvalidTag(u8),
    #[error("invalid encoded string")]
    InvalidString,
    #[error("object encoding failed")]
    Encode(#[source] serde_json::Error),
    #[error("object decoding failed")]
    Decode(#[source] serde_json::Error),
}

/// A handler fault raised during dispatch. Fatal for the engine.
#[derive(Debug, Error)]
#[error(
    "handler `{unit}` failed on `{kind}` ({direction:?}, source {origin:?}) in channel `{channel}`"
)]
pub struct HandlerFault {
    pub unit: String,
    pub kind: &'static str,
    pub direction: Direction,
    pub origin: Source,
    pub channel: String,
    #[source]
    pub cause: anyhow::Error,
}

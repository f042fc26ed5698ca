use crate::error::EventError;
use std::fmt;

/// Traversal direction over the handler stack. Position 0 is the bottom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Ascending: bottom to top.
    Up,
    /// Descending: top to bottom.
    Down,
}

impl Direction {
    #[inline]
    pub const fn reverse(self) -> Self {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        }
    }

    /// Index delta of one step in this direction.
    #[inline]
    pub const fn step(self) -> isize {
        match self {
            Direction::Up => 1,
            Direction::Down => -1,
        }
    }
}

/// Dispatch priority of events waiting in a scheduler. Lower values run
/// first; equal values keep submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(pub u8);

impl Priority {
    pub const HIGHEST: Priority = Priority(0);
    pub const DEFAULT: Priority = Priority(127);
    pub const LOWEST: Priority = Priority(255);
}

impl Default for Priority {
    fn default() -> Self {
        Priority::DEFAULT
    }
}

/// What a channel event asks for at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Qualifier {
    /// Arm (or re-arm) the request.
    On,
    /// Cancel a pending request.
    Off,
    /// The request fired; travelling back to the requester.
    Notify,
}

impl TryFrom<u8> for Qualifier {
    type Error = EventError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Qualifier::On),
            1 => Ok(Qualifier::Off),
            2 => Ok(Qualifier::Notify),
            other => Err(EventError::UnknownQualifier(other)),
        }
    }
}

impl From<Qualifier> for u8 {
    fn from(q: Qualifier) -> Self {
        match q {
            Qualifier::On => 0,
            Qualifier::Off => 1,
            Qualifier::Notify => 2,
        }
    }
}

/// Where an event entered the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Source {
    /// Not set yet; initialization refuses such events.
    #[default]
    Unknown,
    /// From outside the stack: traversal starts at the route boundary.
    Injected,
    /// From the handler at this stack position.
    Handler(usize),
}

impl Source {
    pub fn position(self) -> Option<usize> {
        match self {
            Source::Handler(pos) => Some(pos),
            _ => None,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Unknown => f.write_str("unknown"),
            Source::Injected => f.write_str("injected"),
            Source::Handler(pos) => write!(f, "handler@{pos}"),
        }
    }
}

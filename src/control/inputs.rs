use crate::event::Event;

/// What other threads send to the dispatch thread.
#[derive(Debug)]
pub(crate) enum Input {
    /// An initialized event from `async_go`, a channel start/end or a fired
    /// timer.
    Event(Event),
    /// Leave the dispatch loop.
    Shutdown,
}

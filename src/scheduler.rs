//! Per-scheduler event queues.
//!
//! Events live in an arena; the three queues hold arena indices. Continuations
//! of the handler being dispatched (same path, then reverse path) always run
//! before anything in the priority-ordered waiting queue.

use crate::channel::Channel;
use crate::event::{Direction, Event, Priority, Source};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};

/// Index of a scheduler inside its engine. Channels created with the same id
/// share a queue set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SchedulerId(pub(crate) usize);

impl SchedulerId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// The handler invocation in progress on the dispatch thread.
pub(crate) struct DispatchPoint {
    pub(crate) channel: Channel,
    pub(crate) position: usize,
    pub(crate) direction: Direction,
}

/// Queue an inserted event landed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    SamePath,
    ReversePath,
    Waiting,
}

#[derive(Default)]
pub struct EventScheduler {
    arena: Vec<Option<Event>>,
    free: Vec<usize>,
    same_path: VecDeque<usize>,
    reverse_path: VecDeque<usize>,
    /// Lower priority value first; the sequence number keeps ties FIFO.
    waiting: BinaryHeap<Reverse<(Priority, u64, usize)>>,
    seq: u64,
}

impl EventScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.same_path.len() + self.reverse_path.len() + self.waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True while the last dispatched handler's own continuations are queued.
    pub fn has_continuation(&self) -> bool {
        !self.same_path.is_empty() || !self.reverse_path.is_empty()
    }

    pub(crate) fn insert(&mut self, event: Event, active: Option<&DispatchPoint>) -> Lane {
        let lane = Self::classify(&event, active);
        let priority = event.priority();
        let idx = self.store(event);
        match lane {
            Lane::SamePath => self.same_path.push_back(idx),
            Lane::ReversePath => self.reverse_path.push_back(idx),
            Lane::Waiting => {
                self.seq += 1;
                self.waiting.push(Reverse((priority, self.seq, idx)));
            }
        }
        lane
    }

    fn classify(event: &Event, active: Option<&DispatchPoint>) -> Lane {
        let Some(point) = active else {
            return Lane::Waiting;
        };
        let same_channel = event.channel().is_some_and(|c| *c == point.channel);
        let same_handler = event.position() == Some(point.position)
            || event.source() == Source::Handler(point.position);
        if !same_channel || !same_handler {
            return Lane::Waiting;
        }
        match event.direction() {
            Some(d) if d == point.direction => Lane::SamePath,
            Some(_) => Lane::ReversePath,
            None => Lane::Waiting,
        }
    }

    /// Same path first; a drained same path continues with the reverse path;
    /// then the waiting queue.
    pub(crate) fn next_event(&mut self) -> Option<Event> {
        if self.same_path.is_empty() && !self.reverse_path.is_empty() {
            std::mem::swap(&mut self.same_path, &mut self.reverse_path);
        }
        let idx = match self.same_path.pop_front() {
            Some(idx) => idx,
            None => self.waiting.pop()?.0.2,
        };
        self.take(idx)
    }

    fn store(&mut self, event: Event) -> usize {
        match self.free.pop() {
            Some(idx) => {
                self.arena[idx] = Some(event);
                idx
            }
            None => {
                self.arena.push(Some(event));
                self.arena.len() - 1
            }
        }
    }

    fn take(&mut self, idx: usize) -> Option<Event> {
        let event = self.arena.get_mut(idx)?.take();
        self.free.push(idx);
        event
    }
}

//! Event kinds and their specialization table.
//!
//! Every kind is a `static` naming its parent, so "is this a specialization
//! of that" is a walk up a short chain rather than runtime type inspection.
//! Protocol crates declare their own kinds the same way:
//!
//! ```
//! use stackrt::event::{EventType, kinds};
//!
//! pub static HEARTBEAT: EventType = EventType::derived("Heartbeat", &kinds::SENDABLE);
//! assert!(HEARTBEAT.is_a(&kinds::EVENT));
//! ```
//!
//! Kind names must be unique within a process: identity, hashing and route
//! caching all go by name.

use std::fmt;
use std::hash::{Hash, Hasher};

/// A node of the kind table.
pub struct EventType {
    name: &'static str,
    parent: Option<&'static EventType>,
}

/// The handle everything else passes around.
pub type EventKind = &'static EventType;

impl EventType {
    pub const fn root(name: &'static str) -> Self {
        Self { name, parent: None }
    }

    pub const fn derived(name: &'static str, parent: &'static EventType) -> Self {
        Self {
            name,
            parent: Some(parent),
        }
    }

    #[inline]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub const fn parent(&self) -> Option<EventKind> {
        self.parent
    }

    /// Walks this kind, then its parent, up to the root.
    pub fn ancestors(&'static self) -> Ancestors {
        Ancestors { next: Some(self) }
    }

    /// True if `self` equals `other` or specializes it.
    pub fn is_a(&self, other: &EventType) -> bool {
        let mut cur = Some(self);
        while let Some(t) = cur {
            if t == other {
                return true;
            }
            cur = t.parent;
        }
        false
    }
}

impl PartialEq for EventType {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for EventType {}

impl Hash for EventType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Debug for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

pub struct Ancestors {
    next: Option<EventKind>,
}

impl Iterator for Ancestors {
    type Item = EventKind;

    fn next(&mut self) -> Option<Self::Item> {
        let cur = self.next?;
        self.next = cur.parent;
        Some(cur)
    }
}

/// Kinds the engine itself understands.
pub mod kinds {
    use super::EventType;

    /// Root of the table; a unit accepting it sees everything.
    pub static EVENT: EventType = EventType::root("Event");

    /// Events that end at the channel boundary with a side effect.
    pub static CHANNEL_EVENT: EventType = EventType::derived("ChannelEvent", &EVENT);

    /// Delivered bottom-up when a channel starts; opens the channel at the top.
    pub static CHANNEL_INIT: EventType = EventType::derived("ChannelInit", &CHANNEL_EVENT);

    /// Delivered when a channel ends; closes the channel at the boundary.
    pub static CHANNEL_CLOSE: EventType = EventType::derived("ChannelClose", &CHANNEL_EVENT);

    /// One-shot timer request / notification.
    pub static TIMER: EventType = EventType::derived("Timer", &CHANNEL_EVENT);

    pub static PERIODIC_TIMER: EventType = EventType::derived("PeriodicTimer", &TIMER);

    /// Carries another event and turns it around at the boundary.
    pub static ECHO: EventType = EventType::derived("Echo", &CHANNEL_EVENT);

    /// Events carrying a message payload.
    pub static SENDABLE: EventType = EventType::derived("Sendable", &EVENT);
}

#[cfg(test)]
mod tests {
    use super::kinds::*;
    use super::*;

    static DATA: EventType = EventType::derived("TestData", &SENDABLE);
    static URGENT_DATA: EventType = EventType::derived("TestUrgentData", &DATA);

    #[test]
    fn specialization_walks_parents() {
        assert!(URGENT_DATA.is_a(&DATA));
        assert!(URGENT_DATA.is_a(&SENDABLE));
        assert!(URGENT_DATA.is_a(&EVENT));
        assert!(!DATA.is_a(&URGENT_DATA));
        assert!(!CHANNEL_INIT.is_a(&SENDABLE));
        assert!(PERIODIC_TIMER.is_a(&TIMER));
    }

    #[test]
    fn ancestors_are_nearest_first() {
        let names: Vec<_> = URGENT_DATA.ancestors().map(|k| k.name()).collect();
        assert_eq!(names, ["TestUrgentData", "TestData", "Sendable", "Event"]);
        assert_eq!(EVENT.ancestors().count(), 1);
    }
}

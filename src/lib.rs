//! Protocol composition and single-threaded event dispatch.
//!
//! A [`Pipeline`](protocol::Pipeline) stacks protocol units; each
//! [`Channel`](channel::Channel) created from it binds one handler per unit
//! and routes events through the units that accept them. An
//! [`Engine`](runtime::Engine) runs every handler on its dispatch thread and
//! fires timers from a second thread.

pub mod channel;
pub mod config;
pub(crate) mod control;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod memory;
pub mod message;
pub mod prelude;
pub mod protocol;
pub mod runtime;
pub mod scheduler;
pub mod timer;
pub mod utils;

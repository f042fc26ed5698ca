//! Composition model: unit contracts, handlers and validated pipelines.

mod pipeline;
mod unit;

pub use pipeline::{Pipeline, Route};
pub use unit::{Handler, HandlerRef, ProtocolUnit, UnitContract};

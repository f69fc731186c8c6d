//! # Bus Types Crate
//!
//! Types shared by the bus core and everything that talks to it:
//! layers and the routing policy, message envelopes, the error taxonomy
//! and the configuration struct.
//!
//! ## Design Principles
//!
//! - **Layers are tags**: a `Layer` never carries behavior; the
//!   `LayerGraph` owns the routing decision.
//! - **Typed payloads**: `Event<T>`, `Command<T>`, `Query<T, R>` and
//!   `Response<R>` keep payload types checked at compile time.
//! - **Immutable after submission**: builders consume the envelope, so
//!   metadata is fixed before the bus sees it.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod config;
pub mod envelope;
pub mod errors;
pub mod layer;

pub use config::BusConfig;
pub use envelope::{
    Command, Envelope, Event, Message, Query, Response, BYPASS_ROUTING_KEY, TIMEOUT_OVERRIDE_KEY,
};
pub use errors::{BoxError, BusError, BusResult, ConfigError, HandlerResult, MessageKind};
pub use layer::{Layer, LayerGraph, RoutingViolation, UnknownLayer};

//! # Layered Message Bus Test Suite
//!
//! Unified test crate containing:
//!
//! ## Structure
//!
//! ```text
//! tests/
//! ├── benches/
//! │   └── bus_benchmarks.rs   # criterion: fan-out, cached query, command round-trip
//! └── src/
//!     ├── fixtures.rs         # payload types, recording sink, bus constructors
//!     └── integration/        # cross-crate scenarios
//!         ├── routing.rs
//!         ├── commands.rs
//!         ├── queries.rs
//!         ├── events.rs
//!         ├── weak_handlers.rs
//!         ├── concurrency.rs
//!         └── observability.rs
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p bus-tests
//!
//! # By category
//! cargo test -p bus-tests integration::routing::
//! cargo test -p bus-tests integration::queries::
//!
//! # Benchmarks
//! cargo bench -p bus-tests
//! ```

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

pub mod fixtures;
pub mod integration;

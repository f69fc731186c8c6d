//! Cross-crate scenarios exercising the public `MessageBus` API.

pub mod commands;
pub mod concurrency;
pub mod observability;

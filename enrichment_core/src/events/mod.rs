//! Topic-addressed, at-least-once event transport.
//!
//! Producers `publish` enveloped JSON events; each consumer group that subscribed
//! to a matching topic pattern gets its own delivery, which stays pending until the
//! group `ack`s it. Unacknowledged deliveries come back after a `nack` or when
//! their lease expires, so handlers must be idempotent.

#![forbid(unsafe_code)]

mod error;

pub mod config;
pub mod memory;
pub mod models;
pub mod sqlite;
pub mod traits;

pub use error::{Error, Result};

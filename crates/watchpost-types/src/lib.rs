//! Shared domain types for the Watchpost camera server.

pub mod camera;
pub mod config;
pub mod events;
pub mod frame;
pub mod picture;
pub mod telemetry;

mod errors;

pub use errors::{Result, WatchpostError};

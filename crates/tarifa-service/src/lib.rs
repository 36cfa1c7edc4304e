//! Tarifa service
//!
//! HTTP surface, configuration and background scheduler around
//! [`tarifa_engine::RateEngine`].

pub mod api;
pub mod config;
pub mod error;
pub mod scheduler;

/// Service version
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

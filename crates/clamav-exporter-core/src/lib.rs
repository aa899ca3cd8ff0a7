//! clamav-exporter-core - clamd statistics collection library.
//!
//! Provides:
//! - `collector` - clamd session engine (multiplexed `IDSESSION` protocol,
//!   response demultiplexing, stats parsing, retrying scrapes)
//! - `config` - daemon address and scrape settings
//! - `error` - error types shared by all layers
//! - `model` - statistics snapshot returned by a scrape
//!
//! With `mock` feature (default):
//! - `collector::mock` - scripted in-process clamd for tests

pub mod collector;
pub mod config;
pub mod error;
pub mod model;

/// Crate version, reported by the exporter's build info.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use collector::ClamdCollector;
pub use config::{DaemonAddress, ScrapeConfig};
pub use error::{BuildTimeError, ConfigError, FrameError, ScrapeError};
pub use model::StatisticsSnapshot;

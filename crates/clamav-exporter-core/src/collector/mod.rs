//! clamd statistics collector.
//!
//! This module talks to clamd over its multiplexed `IDSESSION` protocol and
//! turns the replies into a [`StatisticsSnapshot`](crate::model::StatisticsSnapshot).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ClamdCollector                         │
//! │  - one scrape at a time (mutex)                             │
//! │  - retries + 1 attempts, no backoff                         │
//! └──────────────────────────────┬──────────────────────────────┘
//!                                │ per attempt
//!                         ┌──────▼──────┐
//!                         │   session   │  writer: IDSESSION PING VERSION STATS END
//!                         │             │  reader task: read until EOF
//!                         └──────┬──────┘
//!                                │ bytes
//!                         ┌──────▼──────┐
//!                         │    demux    │  "<id>: <payload>\0" → ResponseSlots
//!                         └──────┬──────┘
//!                                │ slots
//!                         ┌──────▼──────┐
//!                         │   parser    │  PONG gate, VERSION, STATS → snapshot
//!                         └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use clamav_exporter_core::{ClamdCollector, ScrapeConfig};
//!
//! let config = ScrapeConfig::new("tcp://127.0.0.1:3310".parse()?, Duration::from_secs(5), 0)?;
//! let collector = ClamdCollector::new(config);
//! match collector.scrape().await {
//!     Some(snapshot) => println!("{} pools", snapshot.pools.len()),
//!     None => println!("clamd is down"),
//! }
//! ```

#[allow(clippy::module_inception)]
mod collector;
#[cfg(feature = "mock")]
pub mod mock;
pub mod parser;
pub mod protocol;
pub mod session;

pub use collector::ClamdCollector;
pub use parser::parse_snapshot;
pub use protocol::{Command, ResponseSlots, demultiplex};

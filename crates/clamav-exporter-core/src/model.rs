//! Statistics snapshot produced by one successful clamd scrape.
//!
//! Every numeric field the daemon may omit is an `Option`: `Some(0)` means
//! clamd reported zero, `None` means it did not report the value at all.

use chrono::{NaiveDateTime, TimeZone, Weekday};

use crate::error::BuildTimeError;

/// Layout of the database build time in `VERSION` replies after the leading
/// weekday, e.g. `Jan  1 00:00:00 2025` of `Wed Jan  1 00:00:00 2025`.
const BUILD_TIME_FORMAT: &str = "%b %d %H:%M:%S %Y";

/// Point-in-time statistics of one clamd instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatisticsSnapshot {
    /// Product version, e.g. `1.0.1`.
    pub daemon_version: Option<String>,
    /// Loaded virus database.
    pub database: Option<DatabaseInfo>,
    /// Thread pools in the order clamd listed them. The index is the only
    /// identifier a pool has.
    pub pools: Vec<PoolStats>,
    pub memory: MemoryStats,
}

/// Virus database version and build time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseInfo {
    pub version: u32,
    /// Build time as sent by clamd, interpreted by [`DatabaseInfo::build_timestamp`].
    pub build_time: String,
}

impl DatabaseInfo {
    /// Interprets the build time as wall-clock time in `tz` and returns Unix seconds.
    ///
    /// clamd pads single-digit days with a space, so runs of whitespace are
    /// collapsed before parsing. The weekday must be a weekday name but is not
    /// checked against the date. Ambiguous local times resolve to the earliest
    /// instant.
    pub fn build_timestamp<Tz: TimeZone>(&self, tz: &Tz) -> Result<i64, BuildTimeError> {
        let mut tokens = self.build_time.split_whitespace();
        tokens
            .next()
            .and_then(|weekday| weekday.parse::<Weekday>().ok())
            .ok_or_else(|| BuildTimeError::InvalidWeekday(self.build_time.clone()))?;
        let normalized = tokens.collect::<Vec<_>>().join(" ");
        let naive = NaiveDateTime::parse_from_str(&normalized, BUILD_TIME_FORMAT).map_err(
            |source| BuildTimeError::Parse {
                text: self.build_time.clone(),
                source,
            },
        )?;

        tz.from_local_datetime(&naive)
            .earliest()
            .map(|t| t.timestamp())
            .ok_or_else(|| BuildTimeError::NonExistent(self.build_time.clone()))
    }
}

/// Thread pool state as reported on the `STATE:` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Invalid,
    Valid,
    Exit,
}

impl PoolState {
    /// Maps a `STATE:` token to a state. Unknown tokens yield `None`.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "INVALID" => Some(PoolState::Invalid),
            "VALID" => Some(PoolState::Valid),
            "EXIT" => Some(PoolState::Exit),
            _ => None,
        }
    }

    /// Numeric encoding used by the `pool_state` gauge.
    pub fn as_gauge(self) -> f64 {
        match self {
            PoolState::Invalid => 0.0,
            PoolState::Valid => 1.0,
            PoolState::Exit => 2.0,
        }
    }
}

/// One clamd thread pool.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoolStats {
    pub state: Option<PoolState>,
    pub primary: bool,
    pub threads: ThreadStats,
    pub queue: QueueStats,
}

/// `THREADS:` line counters; each one independently optional.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThreadStats {
    pub live: Option<i64>,
    pub idle: Option<i64>,
    pub max: Option<i64>,
    pub idle_timeout: Option<i64>,
}

/// `QUEUE:` line. Zeroed when the line does not have the expected shape.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QueueStats {
    pub length: i64,
    /// Seconds.
    pub min_wait: f64,
    /// Seconds.
    pub max_wait: f64,
    /// Seconds.
    pub avg_wait: f64,
}

/// `MEMSTATS:` values in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub heap: Option<u64>,
    pub mmap: Option<u64>,
    pub used: Option<u64>,
    pub free: Option<u64>,
    pub releasable: Option<u64>,
    pub pools_used: Option<u64>,
    pub pools_total: Option<u64>,
}

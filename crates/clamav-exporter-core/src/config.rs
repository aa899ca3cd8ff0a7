//! Scrape configuration: where clamd listens and how hard to try.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use percent_encoding::percent_decode_str;
use url::Url;

use crate::error::ConfigError;

/// Port clamd listens on when the address does not name one.
pub const DEFAULT_CLAMD_PORT: u16 = 3310;

/// Location of the clamd control socket.
///
/// Parsed from `tcp://host[:port]` or `unix:///path/to/clamd.sock`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonAddress {
    Tcp { host: String, port: u16 },
    Unix(PathBuf),
}

impl FromStr for DaemonAddress {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let url = Url::parse(s).map_err(|e| ConfigError::InvalidAddress {
            address: s.to_string(),
            reason: e.to_string(),
        })?;

        match url.scheme() {
            "tcp" => {
                let host = url
                    .host_str()
                    .filter(|h| !h.is_empty())
                    .ok_or_else(|| ConfigError::MissingHost(s.to_string()))?;
                Ok(DaemonAddress::Tcp {
                    host: host.trim_start_matches('[').trim_end_matches(']').to_string(),
                    port: url.port().unwrap_or(DEFAULT_CLAMD_PORT),
                })
            }
            "unix" => {
                let path = percent_decode_str(url.path())
                    .decode_utf8()
                    .map_err(|e| ConfigError::InvalidAddress {
                        address: s.to_string(),
                        reason: e.to_string(),
                    })?;
                if path.is_empty() || path == "/" {
                    return Err(ConfigError::MissingPath(s.to_string()));
                }
                Ok(DaemonAddress::Unix(PathBuf::from(path.into_owned())))
            }
            other => Err(ConfigError::UnsupportedScheme(other.to_string())),
        }
    }
}

impl fmt::Display for DaemonAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DaemonAddress::Tcp { host, port } if host.contains(':') => {
                write!(f, "tcp://[{}]:{}", host, port)
            }
            DaemonAddress::Tcp { host, port } => write!(f, "tcp://{}:{}", host, port),
            DaemonAddress::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

/// Validated settings for a [`ClamdCollector`](crate::ClamdCollector).
#[derive(Debug, Clone)]
pub struct ScrapeConfig {
    address: DaemonAddress,
    timeout: Duration,
    retries: u32,
}

impl ScrapeConfig {
    /// Builds a config, rejecting negative retry counts and a zero timeout.
    ///
    /// # Arguments
    /// * `address` - clamd socket address
    /// * `timeout` - bound for the dial and for every single read and write
    /// * `retries` - extra attempts after the first one fails (0 = no retries)
    pub fn new(address: DaemonAddress, timeout: Duration, retries: i64) -> Result<Self, ConfigError> {
        let retries = u32::try_from(retries).map_err(|_| ConfigError::InvalidRetries(retries))?;
        if timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(Self {
            address,
            timeout,
            retries,
        })
    }

    pub fn address(&self) -> &DaemonAddress {
        &self.address
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }
}

//! Prometheus exposition of clamd snapshots.
//!
//! A fresh registry is built for every request, so pools that disappeared
//! between scrapes never linger and absent fields are simply not emitted.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use chrono::TimeZone;
use prometheus::{Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder};
use thiserror::Error;
use tracing::error;

use clamav_exporter_core::StatisticsSnapshot;
use clamav_exporter_core::model::PoolStats;

pub const NAMESPACE: &str = "clamav";

const POOL_LABELS: &[&str] = &["index", "primary"];

/// Errors that can occur while rendering metrics.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("failed to register metric: {0}")]
    Registration(#[from] prometheus::Error),

    #[error("failed to encode metrics: {0}")]
    Encoding(String),
}

/// Renders the exposition for one scrape.
///
/// `None` means clamd was unreachable: only `clamav_up 0` and the build info
/// are emitted. The database build time is interpreted in `tz`.
pub fn render<Tz: TimeZone>(
    snapshot: Option<&StatisticsSnapshot>,
    tz: &Tz,
) -> Result<String, MetricsError> {
    let mut exposition = Exposition::new();
    exposition.build_info()?;

    let Some(snapshot) = snapshot else {
        exposition.gauge("up", "Was the last scrape successful.", 0.0)?;
        return exposition.encode();
    };

    exposition.gauge("up", "Was the last scrape successful.", 1.0)?;

    if let Some(version) = &snapshot.daemon_version {
        exposition.labeled(
            "version",
            "The version of this ClamAV.",
            &["version"],
            &[version],
            1.0,
        )?;
    }

    if let Some(db) = &snapshot.database {
        exposition.gauge(
            "db_version",
            "Currently installed ClamAV Virus Database version.",
            f64::from(db.version),
        )?;
        match db.build_timestamp(tz) {
            Ok(ts) => exposition.gauge(
                "db_timestamp_seconds",
                "Unix timestamp of the ClamAV Virus Database build time.",
                ts as f64,
            )?,
            Err(e) => error!(time = %db.build_time, error = %e, "failed to parse database time"),
        }
    }

    for (index, pool) in snapshot.pools.iter().enumerate() {
        exposition.pool(index, pool)?;
    }

    let memory = &snapshot.memory;
    let memory_gauges = [
        ("memory_heap_bytes", "Number of bytes allocated on the heap.", memory.heap),
        ("memory_mmap_bytes", "Number of bytes currently allocated using mmap.", memory.mmap),
        ("memory_used_bytes", "Number of bytes used by in-use allocations.", memory.used),
        ("memory_free_bytes", "Number of bytes in free blocks.", memory.free),
        ("memory_releasable_bytes", "Number of bytes releasable at the heap.", memory.releasable),
        ("memory_pools_used_bytes", "Number of bytes currently used by all pools.", memory.pools_used),
        ("memory_pools_total_bytes", "Number of bytes available to all pools.", memory.pools_total),
    ];
    for (name, help, value) in memory_gauges {
        if let Some(bytes) = value {
            exposition.gauge(name, help, bytes as f64)?;
        }
    }

    exposition.encode()
}

/// Registry for a single request.
struct Exposition {
    registry: Registry,
    vectors: HashMap<&'static str, GaugeVec>,
}

impl Exposition {
    fn new() -> Self {
        Self {
            registry: Registry::new(),
            vectors: HashMap::new(),
        }
    }

    fn build_info(&self) -> Result<(), MetricsError> {
        let info = GaugeVec::new(
            Opts::new(
                "clamav_exporter_build_info",
                "A metric with a constant '1' value labeled by the exporter version.",
            ),
            &["version"],
        )?;
        info.with_label_values(&[clamav_exporter_core::VERSION]).set(1.0);
        self.registry.register(Box::new(info))?;
        Ok(())
    }

    fn gauge(&self, name: &str, help: &str, value: f64) -> Result<(), MetricsError> {
        let gauge = Gauge::with_opts(Opts::new(name, help).namespace(NAMESPACE))?;
        gauge.set(value);
        self.registry.register(Box::new(gauge))?;
        Ok(())
    }

    /// Sets one series of a labeled gauge, registering the family on first use.
    fn labeled(
        &mut self,
        name: &'static str,
        help: &str,
        labels: &[&str],
        values: &[&str],
        value: f64,
    ) -> Result<(), MetricsError> {
        let vector = match self.vectors.entry(name) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => {
                let vector = GaugeVec::new(Opts::new(name, help).namespace(NAMESPACE), labels)?;
                self.registry.register(Box::new(vector.clone()))?;
                e.insert(vector)
            }
        };
        vector.get_metric_with_label_values(values)?.set(value);
        Ok(())
    }

    fn pool(&mut self, index: usize, pool: &PoolStats) -> Result<(), MetricsError> {
        let index = index.to_string();
        let primary = if pool.primary { "1" } else { "0" };
        let labels = [index.as_str(), primary];

        if let Some(state) = pool.state {
            self.labeled("pool_state", "State of the thread pool.", POOL_LABELS, &labels, state.as_gauge())?;
        }

        let threads = &pool.threads;
        let thread_gauges = [
            ("pool_live_threads", "Number of live threads in the pool.", threads.live),
            ("pool_idle_threads", "Number of idle threads in the pool.", threads.idle),
            ("pool_max_threads", "Maximum number of threads in the pool.", threads.max),
            (
                "pool_idle_timeout_threads",
                "Number of idle timeout threads in the pool.",
                threads.idle_timeout,
            ),
        ];
        for (name, help, value) in thread_gauges {
            if let Some(n) = value {
                self.labeled(name, help, POOL_LABELS, &labels, n as f64)?;
            }
        }

        let queue = &pool.queue;
        let queue_gauges = [
            ("pool_queue_length", "Number of items in the pool queue.", queue.length as f64),
            ("pool_queue_min_wait_sec", "Minimum wait time in the pool queue.", queue.min_wait),
            ("pool_queue_max_wait_sec", "Maximum wait time in the pool queue.", queue.max_wait),
            ("pool_queue_avg_wait_sec", "Average wait time in the pool queue.", queue.avg_wait),
        ];
        for (name, help, value) in queue_gauges {
            self.labeled(name, help, POOL_LABELS, &labels, value)?;
        }

        Ok(())
    }

    fn encode(self) -> Result<String, MetricsError> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| MetricsError::Encoding(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| MetricsError::Encoding(e.to_string()))
    }
}

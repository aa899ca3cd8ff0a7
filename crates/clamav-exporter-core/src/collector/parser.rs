//! Parsers for clamd `PING`, `VERSION` and `STATS` replies.
//!
//! `STATS` is diagnostic text that changes between clamd releases, so the
//! parsers skip anything they do not recognize and leave the matching fields
//! unset. Only a wrong `PING` reply fails the scrape.
//!
//! Example `STATS` payload:
//!
//! ```text
//! POOLS: 1
//!
//! STATE: VALID PRIMARY
//! THREADS: live 1  idle 0 max 10 idle-timeout 30
//! QUEUE: 0 items min_wait: 0.000000 max_wait: 0.000000 avg_wait: 0.000000
//!
//! MEMSTATS: heap 3.727M mmap 0.129M used 3.226M free 0.504M releasable 0.127M pools 1 pools_used 565.979M pools_total 565.999M
//! END
//! ```

use crate::collector::protocol::{PING_ACK, ResponseSlots};
use crate::error::ScrapeError;
use crate::model::{
    DatabaseInfo, MemoryStats, PoolState, PoolStats, QueueStats, StatisticsSnapshot, ThreadStats,
};

const BYTES_PER_MEGABYTE: f64 = 1024.0 * 1024.0;

/// Builds a snapshot from the three reply slots of a session.
///
/// Fails only if the `PING` reply is not exactly `PONG`; everything else
/// degrades to absent fields.
pub fn parse_snapshot(slots: &ResponseSlots) -> Result<StatisticsSnapshot, ScrapeError> {
    if slots.ping() != PING_ACK {
        return Err(ScrapeError::ProtocolViolation(
            String::from_utf8_lossy(slots.ping()).into_owned(),
        ));
    }

    let mut snapshot = StatisticsSnapshot::default();

    if let Some((version, database)) = parse_version(&String::from_utf8_lossy(slots.version())) {
        snapshot.daemon_version = Some(version);
        snapshot.database = Some(database);
    }

    let stats = String::from_utf8_lossy(slots.stats());
    snapshot.pools = parse_pools(&stats);
    snapshot.memory = parse_memory(&stats);

    Ok(snapshot)
}

/// Parses `ClamAV <version>/<db version>/<db build time>`.
///
/// The match may start anywhere and stops at the end of the line. When the
/// version itself contains slashes the last `/<digits>/` pair is taken as the
/// database version.
pub fn parse_version(content: &str) -> Option<(String, DatabaseInfo)> {
    const PREFIX: &str = "ClamAV ";

    content.match_indices(PREFIX).find_map(|(at, _)| {
        let rest = &content[at + PREFIX.len()..];
        let line = rest.split('\n').next().unwrap_or_default();
        split_version_line(line)
    })
}

fn split_version_line(line: &str) -> Option<(String, DatabaseInfo)> {
    for (slash, _) in line.match_indices('/').rev() {
        let version = &line[..slash];
        let after = &line[slash + 1..];
        let db_version = leading_run(after, |c| c.is_ascii_digit());
        if version.is_empty() || db_version.is_empty() {
            continue;
        }
        let Some(build_time) = after[db_version.len()..].strip_prefix('/') else {
            continue;
        };
        if build_time.is_empty() {
            continue;
        }

        return Some((
            version.to_string(),
            DatabaseInfo {
                version: db_version.parse().unwrap_or(0),
                build_time: build_time.to_string(),
            },
        ));
    }
    None
}

/// Extracts every `STATE:`/`THREADS:`/`QUEUE:` block in order of appearance.
///
/// A block is three consecutive newline-terminated lines; `STATE:` may be
/// preceded by other text on its line, the other two must start their lines.
pub fn parse_pools(content: &str) -> Vec<PoolStats> {
    let lines: Vec<&str> = content.split_inclusive('\n').collect();
    let mut pools = Vec::new();

    let mut i = 0;
    while i + 2 < lines.len() {
        match parse_pool_block(lines[i], lines[i + 1], lines[i + 2]) {
            Some(pool) => {
                pools.push(pool);
                i += 3;
            }
            None => i += 1,
        }
    }

    pools
}

fn parse_pool_block(state: &str, threads: &str, queue: &str) -> Option<PoolStats> {
    let state = state.find("STATE: ").map(|at| &state[at + "STATE: ".len()..])?;
    let state = non_empty(state.strip_suffix('\n')?)?;
    let threads = non_empty(threads.strip_prefix("THREADS: ")?.strip_suffix('\n')?)?;
    let queue = non_empty(queue.strip_prefix("QUEUE: ")?.strip_suffix('\n')?)?;

    let mut pool = PoolStats::default();
    for token in state.split(' ') {
        if let Some(s) = PoolState::from_token(token) {
            pool.state = Some(s);
        } else if token == "PRIMARY" {
            pool.primary = true;
        }
    }
    pool.threads = parse_threads(threads);
    pool.queue = parse_queue(queue).unwrap_or_default();

    Some(pool)
}

/// Parses `<name> <integer>` pairs of a `THREADS:` line.
///
/// Counters missing from the line stay `None`.
pub fn parse_threads(line: &str) -> ThreadStats {
    let mut threads = ThreadStats::default();
    let tokens: Vec<&str> = line.split_whitespace().collect();

    for pair in tokens.windows(2) {
        let name = trailing_run(pair[0], |c| c.is_ascii_lowercase() || c == '-');
        let digits = leading_run(pair[1], |c| c.is_ascii_digit());
        if name.is_empty() || digits.is_empty() {
            continue;
        }
        let value: i64 = digits.parse().unwrap_or(0);

        match name {
            "live" => threads.live = Some(value),
            "idle" => threads.idle = Some(value),
            "max" => threads.max = Some(value),
            "idle-timeout" => threads.idle_timeout = Some(value),
            _ => {}
        }
    }

    threads
}

/// Parses `<n> items min_wait: <f> max_wait: <f> avg_wait: <f>`.
///
/// Returns `None` if the line has any other shape, e.g. the bare
/// `0 items` of newer clamd releases.
pub fn parse_queue(line: &str) -> Option<QueueStats> {
    const ITEMS: &str = " items min_wait: ";

    let at = line.find(ITEMS)?;
    let length = non_empty(trailing_run(&line[..at], |c| c.is_ascii_digit()))?;

    let (min_wait, rest) = split_decimal(&line[at + ITEMS.len()..])?;
    let (max_wait, rest) = split_decimal(rest.strip_prefix(" max_wait: ")?)?;
    let (avg_wait, _) = split_decimal(rest.strip_prefix(" avg_wait: ")?)?;

    Some(QueueStats {
        length: length.parse().unwrap_or(0),
        min_wait,
        max_wait,
        avg_wait,
    })
}

/// Parses the first `MEMSTATS:` line into byte counts.
///
/// clamd reports megabytes (`heap 9.082M`); values such as `N/A` are skipped.
pub fn parse_memory(content: &str) -> MemoryStats {
    let mut memory = MemoryStats::default();

    let Some(at) = content.find("MEMSTATS: ") else {
        return memory;
    };
    let line = content[at + "MEMSTATS: ".len()..]
        .split('\n')
        .next()
        .unwrap_or_default();

    let tokens: Vec<&str> = line.split_whitespace().collect();
    for pair in tokens.windows(2) {
        let name = trailing_run(pair[0], |c| c.is_ascii_lowercase() || c == '_');
        let number = leading_run(pair[1], |c| c.is_ascii_digit() || c == '.');
        if name.is_empty() || number.is_empty() || !pair[1][number.len()..].starts_with('M') {
            continue;
        }
        let bytes = megabytes_to_bytes(number.parse().unwrap_or(0.0));

        match name {
            "heap" => memory.heap = Some(bytes),
            "mmap" => memory.mmap = Some(bytes),
            "used" => memory.used = Some(bytes),
            "free" => memory.free = Some(bytes),
            "releasable" => memory.releasable = Some(bytes),
            "pools_used" => memory.pools_used = Some(bytes),
            "pools_total" => memory.pools_total = Some(bytes),
            _ => {}
        }
    }

    memory
}

/// Converts a megabyte figure to whole bytes, truncating.
fn megabytes_to_bytes(mb: f64) -> u64 {
    (mb * BYTES_PER_MEGABYTE) as u64
}

/// Splits a leading `<digits>.<digits>` off `s`.
fn split_decimal(s: &str) -> Option<(f64, &str)> {
    let int = non_empty(leading_run(s, |c| c.is_ascii_digit()))?;
    let frac = non_empty(leading_run(s[int.len()..].strip_prefix('.')?, |c| {
        c.is_ascii_digit()
    }))?;
    let len = int.len() + 1 + frac.len();
    Some((s[..len].parse().unwrap_or(0.0), &s[len..]))
}

fn leading_run(s: &str, pred: impl Fn(char) -> bool) -> &str {
    let end = s.find(|c: char| !pred(c)).unwrap_or(s.len());
    &s[..end]
}

fn trailing_run(s: &str, pred: impl Fn(char) -> bool) -> &str {
    let start = s
        .char_indices()
        .rev()
        .find(|&(_, c)| !pred(c))
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(0);
    &s[start..]
}

fn non_empty(s: &str) -> Option<&str> {
    if s.is_empty() { None } else { Some(s) }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATS_SCENARIO: &str = "STATE: VALID PRIMARY\nTHREADS: live 2 idle 1 max 10 idle-timeout 30\nQUEUE: 0 items min_wait: 0.0 max_wait: 0.0 avg_wait: 0.0\nMEMSTATS: heap 10.0M pools_used 1.0M\n";

    #[test]
    fn test_parse_snapshot_end_to_end() {
        let slots = ResponseSlots::new("PONG", "ClamAV 1.2.3/456/Wed Jan 1 00:00:00 2025", STATS_SCENARIO);
        let snapshot = parse_snapshot(&slots).unwrap();

        assert_eq!(snapshot.daemon_version.as_deref(), Some("1.2.3"));
        assert_eq!(
            snapshot.database,
            Some(DatabaseInfo {
                version: 456,
                build_time: "Wed Jan 1 00:00:00 2025".to_string()
            })
        );
        assert_eq!(
            snapshot.pools,
            vec![PoolStats {
                state: Some(PoolState::Valid),
                primary: true,
                threads: ThreadStats {
                    live: Some(2),
                    idle: Some(1),
                    max: Some(10),
                    idle_timeout: Some(30),
                },
                queue: QueueStats::default(),
            }]
        );
        assert_eq!(
            snapshot.memory,
            MemoryStats {
                heap: Some(10_485_760),
                pools_used: Some(1_048_576),
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_ping_gate() {
        for ping in ["", "PONG\n", "pong", "PONGPONG"] {
            let slots = ResponseSlots::new(ping, "ClamAV 1.2.3/456/Wed Jan 1 00:00:00 2025", STATS_SCENARIO);
            let err = parse_snapshot(&slots).unwrap_err();
            assert!(matches!(err, ScrapeError::ProtocolViolation(ref got) if got == ping));
        }
    }

    #[test]
    fn test_ping_only_is_valid_snapshot() {
        let snapshot = parse_snapshot(&ResponseSlots::new("PONG", "", "")).unwrap();
        assert_eq!(snapshot, StatisticsSnapshot::default());
    }

    #[test]
    fn test_parse_version_unmatched() {
        assert!(parse_version("UNKNOWN COMMAND").is_none());
        assert!(parse_version("ClamAV 1.2.3").is_none());
        assert!(parse_version("ClamAV 1.2.3/abc/Wed").is_none());
    }

    #[test]
    fn test_parse_version_overflowing_db_version() {
        let (_, db) = parse_version("ClamAV 1.2.3/99999999999/Wed Jan 1 00:00:00 2025").unwrap();
        assert_eq!(db.version, 0);
    }

    #[test]
    fn test_parse_version_stops_at_newline() {
        let (version, db) = parse_version("ClamAV 0.103.8/26800/Sat Jan  2 09:00:00 2021\nnext").unwrap();
        assert_eq!(version, "0.103.8");
        assert_eq!(db.version, 26800);
        assert_eq!(db.build_time, "Sat Jan  2 09:00:00 2021");
    }

    #[test]
    fn test_parse_pools_keeps_order() {
        let content = "POOLS: 3\n\n\
            STATE: VALID PRIMARY\nTHREADS: live 1\nQUEUE: 1 items min_wait: 0.1 max_wait: 0.2 avg_wait: 0.15\n\n\
            STATE: VALID\nTHREADS: live 2\nQUEUE: 2 items min_wait: 0.0 max_wait: 0.0 avg_wait: 0.0\n\n\
            STATE: VALID\nTHREADS: live 3\nQUEUE: 3 items min_wait: 0.0 max_wait: 0.0 avg_wait: 0.0\n";
        let pools = parse_pools(content);

        assert_eq!(pools.len(), 3);
        for (i, pool) in pools.iter().enumerate() {
            assert_eq!(pool.state, Some(PoolState::Valid));
            assert_eq!(pool.threads.live, Some(i as i64 + 1));
            assert_eq!(pool.queue.length, i as i64 + 1);
        }
        assert!(pools[0].primary);
        assert!(!pools[1].primary);
        assert_eq!(pools[0].queue.min_wait, 0.1);
        assert_eq!(pools[0].queue.max_wait, 0.2);
        assert_eq!(pools[0].queue.avg_wait, 0.15);
    }

    #[test]
    fn test_parse_pools_requires_trailing_newline() {
        let content = "STATE: VALID\nTHREADS: live 1\nQUEUE: 0 items";
        assert!(parse_pools(content).is_empty());
    }

    #[test]
    fn test_parse_pools_state_mid_line() {
        let content = "garbage STATE: EXIT\nTHREADS: live 1\nQUEUE: 0 items\n";
        let pools = parse_pools(content);
        assert_eq!(pools.len(), 1);
        assert_eq!(pools[0].state, Some(PoolState::Exit));
    }

    #[test]
    fn test_parse_pools_unknown_state_tokens() {
        let content = "STATE: RESTARTING SOMETHING\nTHREADS: live 1\nQUEUE: 0 items\n";
        let pools = parse_pools(content);
        assert_eq!(pools.len(), 1);
        assert_eq!(pools[0].state, None);
        assert!(!pools[0].primary);
    }

    #[test]
    fn test_parse_threads_partial() {
        let threads = parse_threads("live 5");
        assert_eq!(
            threads,
            ThreadStats {
                live: Some(5),
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_parse_threads_zero_is_not_absent() {
        let threads = parse_threads("live 1  idle 0 max 12 idle-timeout 30 unknown 7");
        assert_eq!(threads.idle, Some(0));
        assert_eq!(threads.max, Some(12));
        assert_eq!(threads.idle_timeout, Some(30));
    }

    #[test]
    fn test_parse_queue_newer_format_defaults() {
        assert!(parse_queue("0 items").is_none());
        let pools = parse_pools("STATE: VALID\nTHREADS: live 1\nQUEUE: 4 items\n");
        assert_eq!(pools[0].queue, QueueStats::default());
    }

    #[test]
    fn test_parse_memory_unit_conversion() {
        let memory = parse_memory("MEMSTATS: heap 2.5M");
        assert_eq!(memory.heap, Some(2_621_440));
    }

    #[test]
    fn test_parse_memory_truncates() {
        let memory = parse_memory("MEMSTATS: used 0.0000005M");
        assert_eq!(memory.used, Some(0));
    }

    #[test]
    fn test_parse_memory_full_line() {
        let memory = parse_memory(
            "POOLS: 1\nMEMSTATS: heap 3.727M mmap 0.129M used 3.226M free 0.504M releasable 0.127M pools 1 pools_used 565.979M pools_total 565.999M\nEND\n",
        );
        assert_eq!(memory.heap, Some(megabytes_to_bytes(3.727)));
        assert_eq!(memory.mmap, Some(megabytes_to_bytes(0.129)));
        assert_eq!(memory.used, Some(megabytes_to_bytes(3.226)));
        assert_eq!(memory.free, Some(megabytes_to_bytes(0.504)));
        assert_eq!(memory.releasable, Some(megabytes_to_bytes(0.127)));
        assert_eq!(memory.pools_used, Some(megabytes_to_bytes(565.979)));
        assert_eq!(memory.pools_total, Some(megabytes_to_bytes(565.999)));
    }

    #[test]
    fn test_parse_memory_not_available() {
        let memory = parse_memory(
            "MEMSTATS: heap N/A mmap N/A used N/A free N/A releasable N/A pools 1 pools_used 1306.696M pools_total 1306.710M\n",
        );
        assert_eq!(memory.heap, None);
        assert_eq!(memory.free, None);
        assert_eq!(memory.pools_used, Some(megabytes_to_bytes(1306.696)));
    }

    #[test]
    fn test_parse_memory_interleaved_with_pools() {
        let content = "STATE: VALID\nMEMSTATS: heap 1.0M\nSTATE: VALID\nTHREADS: live 1\nQUEUE: 0 items\n";
        assert_eq!(parse_memory(content).heap, Some(1_048_576));
        assert_eq!(parse_pools(content).len(), 1);
    }

    #[test]
    fn test_parse_memory_absent() {
        assert_eq!(parse_memory("POOLS: 1\nEND\n"), MemoryStats::default());
    }
}

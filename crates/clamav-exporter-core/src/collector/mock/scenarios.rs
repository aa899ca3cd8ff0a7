//! Canned clamd replies.

/// `VERSION` payload of a typical clamd.
pub const VERSION: &str = "ClamAV 1.0.1/26800/Wed Jan  1 00:00:00 2025";

/// `STATS` payload of a typical clamd with one idle pool.
pub const STATS: &str = "POOLS: 1\n\n\
STATE: VALID PRIMARY\n\
THREADS: live 1  idle 0 max 10 idle-timeout 30\n\
QUEUE: 0 items min_wait: 0.000000 max_wait: 0.000000 avg_wait: 0.000000\n\n\
MEMSTATS: heap 3.727M mmap 0.129M used 3.226M free 0.504M releasable 0.127M pools 1 pools_used 565.979M pools_total 565.999M\n\
END";

/// `STATS` payload of a busy clamd with two pools, one of them shutting down.
pub const STATS_BUSY: &str = "POOLS: 2\n\n\
STATE: VALID PRIMARY\n\
THREADS: live 8  idle 0 max 8 idle-timeout 30\n\
QUEUE: 12 items min_wait: 0.012000 max_wait: 4.250000 avg_wait: 1.031000\n\
\tSTATS 0.000045\n\n\
STATE: EXIT\n\
THREADS: live 1  idle 1 max 8 idle-timeout 30\n\
QUEUE: 0 items min_wait: 0.000000 max_wait: 0.000000 avg_wait: 0.000000\n\n\
MEMSTATS: heap N/A mmap N/A used N/A free N/A releasable N/A pools 1 pools_used 1306.696M pools_total 1306.710M\n\
END";

/// Frames one reply per slot as clamd would inside an `IDSESSION`.
pub fn frame_replies(ping: &str, version: &str, stats: &str) -> Vec<u8> {
    let mut out = Vec::new();
    for (id, payload) in [ping, version, stats].iter().enumerate() {
        out.extend_from_slice(format!("{}: {}", id + 1, payload).as_bytes());
        out.push(0);
    }
    out
}

/// Complete reply stream of a healthy daemon.
pub fn healthy_reply() -> Vec<u8> {
    frame_replies("PONG", VERSION, STATS)
}

/// Complete reply stream of a busy daemon.
pub fn busy_reply() -> Vec<u8> {
    frame_replies("PONG", VERSION, STATS_BUSY)
}

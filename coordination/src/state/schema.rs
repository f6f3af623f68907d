//! Column family definitions and key layout for the hot store.
//!
//! Each column family provides logical separation of data types while
//! sharing the same RocksDB instance.

pub const CF_TASKS: &str = "tasks";
pub const CF_PATTERNS: &str = "patterns";
pub const CF_RATE_LIMITS: &str = "rate_limits";
pub const CF_SECRETS: &str = "secrets";
pub const CF_COST: &str = "cost";
pub const CF_HITL: &str = "hitl";
pub const CF_EVENTS: &str = "events";
pub const CF_LIFECYCLE: &str = "lifecycle";
/// List values (e.g. voice transcripts) stored as a bincode-encoded `VecDeque`
/// alongside an optional TTL recorded in `CF_TTL`.
pub const CF_LISTS: &str = "lists";
pub const CF_TTL: &str = "ttl";

pub const ALL_CFS: &[&str] = &[
    CF_TASKS,
    CF_PATTERNS,
    CF_RATE_LIMITS,
    CF_SECRETS,
    CF_COST,
    CF_HITL,
    CF_EVENTS,
    CF_LIFECYCLE,
    CF_LISTS,
    CF_TTL,
];

/// Key prefixes for compound keys, mirroring the hot-store layout.
pub mod keys {
    pub fn task(task_id: &str) -> String {
        format!("task:{task_id}")
    }

    pub fn pattern(pattern_id: &str) -> String {
        format!("pattern:{pattern_id}")
    }

    pub fn rate_limit(service: &str, model: &str) -> String {
        format!("rl:{service}:{model}")
    }

    pub fn secret(slot: &str) -> String {
        format!("secret:{slot}")
    }

    /// Cost counters are hashes keyed by window (hourly/daily/weekly/monthly).
    pub fn cost(window: &str, agent: &str, model: &str, feature: &str) -> String {
        format!("cost:{window}:{agent}:{model}:{feature}")
    }

    pub fn hitl(task_id: &str) -> String {
        format!("hitl:{task_id}")
    }

    pub fn lifecycle(task_id: &str) -> String {
        format!("lifecycle:{task_id}")
    }

    /// Voice transcript list key: `voice:{session}:transcripts`.
    pub fn voice_transcripts(session_id: &str) -> String {
        format!("voice:{session_id}:transcripts")
    }

    /// Timestamp-ordered event key for range scans.
    pub fn event(timestamp_nanos: i64, event_id: &str) -> String {
        format!("evt:{timestamp_nanos:020}:{event_id}")
    }

    pub fn parse_event_timestamp(key: &str) -> Option<i64> {
        let parts: Vec<&str> = key.split(':').collect();
        if parts.len() >= 2 && parts[0] == "evt" {
            parts[1].parse().ok()
        } else {
            None
        }
    }
}

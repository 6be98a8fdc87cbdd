use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

const PREFIX: &str = "WAYFARER";

fn env_opt(key: &str) -> Option<String> {
    env::var(format!("{}_{}", PREFIX, key))
        .ok()
        .filter(|s| !s.is_empty())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub pool: PoolSection,
    pub graph: GraphSection,
    pub routing: RoutingSection,
    pub queue: QueueSection,
    /// JSON dataset loaded into the in-memory store at startup.
    pub dataset: Option<PathBuf>,
}

impl Config {
    /// Build config from `WAYFARER_*` environment variables (call `load_dotenv()` first).
    pub fn from_env() -> Self {
        Self {
            pool: PoolSection::from_env(),
            graph: GraphSection::from_env(),
            routing: RoutingSection::from_env(),
            queue: QueueSection::from_env(),
            dataset: env_opt("DATASET").map(PathBuf::from),
        }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  pool:     workers={}", self.pool.effective_workers());
        tracing::info!(
            "  graph:    approach_max_dist={}, ota_max_dist={}, nsr_max_dist={}, connect_max_dist={}",
            self.graph.approach_max_dist,
            self.graph.ota_max_dist,
            self.graph.nsr_max_dist,
            self.graph.connect_max_dist
        );
        tracing::info!(
            "  routing:  walk_speed={}, max_transfer_length={}, max_rounds={}",
            self.routing.walk_speed,
            self.routing.max_transfer_length,
            self.routing.max_rounds
        );
        tracing::info!(
            "  queue:    compute_lock={}s, default_lock={}s, stall_check={}ms, max_stalled={}, keep={}/{}",
            self.queue.compute_lock_secs,
            self.queue.default_lock_secs,
            self.queue.stall_check_ms,
            self.queue.max_stalled_count,
            self.queue.keep_completed,
            self.queue.keep_failed
        );
        tracing::info!(
            "  dataset:  {}",
            self.dataset
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(none)".into())
        );
    }
}

// ── Worker pool ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSection {
    /// 0 = one worker per available CPU core.
    pub workers: usize,
}

impl PoolSection {
    fn from_env() -> Self {
        Self { workers: env_parse("WORKERS", 0) }
    }

    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

impl Default for PoolSection {
    fn default() -> Self {
        Self { workers: 0 }
    }
}

// ── Foot graphs ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSection {
    /// Points farther than this from every section are not approachable.
    pub approach_max_dist: f64,
    /// Default bound of one-to-all walking queries.
    pub ota_max_dist: f64,
    /// Bound of stop-to-stop walking paths.
    pub nsr_max_dist: f64,
    /// 0 disables component connection.
    pub connect_max_dist: f64,
}

impl GraphSection {
    fn from_env() -> Self {
        Self {
            approach_max_dist: env_parse("APPROACH_MAX_DIST", 1_000.0),
            ota_max_dist: env_parse("OTA_MAX_DIST", 1_000.0),
            nsr_max_dist: env_parse("NSR_MAX_DIST", 1_000.0),
            connect_max_dist: env_parse("CONNECT_MAX_DIST", 1_000.0),
        }
    }
}

impl Default for GraphSection {
    fn default() -> Self {
        Self {
            approach_max_dist: 1_000.0,
            ota_max_dist: 1_000.0,
            nsr_max_dist: 1_000.0,
            connect_max_dist: 1_000.0,
        }
    }
}

// ── Routing ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingSection {
    /// Metres per second.
    pub walk_speed: f64,
    pub max_transfer_length: f64,
    pub max_rounds: usize,
}

impl RoutingSection {
    fn from_env() -> Self {
        Self {
            walk_speed: env_parse("WALK_SPEED", 1.0),
            max_transfer_length: env_parse("MAX_TRANSFER_LENGTH", 1_000.0),
            max_rounds: env_parse("MAX_ROUNDS", 6),
        }
    }
}

impl Default for RoutingSection {
    fn default() -> Self {
        Self {
            walk_speed: 1.0,
            max_transfer_length: 1_000.0,
            max_rounds: 6,
        }
    }
}

// ── Queues ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSection {
    pub compute_lock_secs: u64,
    pub default_lock_secs: u64,
    pub stall_check_ms: u64,
    pub max_stalled_count: u32,
    /// Completed jobs kept per kind before the oldest are dropped.
    pub keep_completed: usize,
    /// Failed jobs kept per kind before the oldest are dropped.
    pub keep_failed: usize,
}

impl QueueSection {
    fn from_env() -> Self {
        Self {
            compute_lock_secs: env_parse("COMPUTE_LOCK_SECS", 30 * 60),
            default_lock_secs: env_parse("DEFAULT_LOCK_SECS", 60),
            stall_check_ms: env_parse("STALL_CHECK_MS", 5_000),
            max_stalled_count: env_parse("MAX_STALLED_COUNT", 1),
            keep_completed: env_parse("KEEP_COMPLETED", 1_000),
            keep_failed: env_parse("KEEP_FAILED", 5_000),
        }
    }
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            compute_lock_secs: 30 * 60,
            default_lock_secs: 60,
            stall_check_ms: 5_000,
            max_stalled_count: 1,
            keep_completed: 1_000,
            keep_failed: 5_000,
        }
    }
}

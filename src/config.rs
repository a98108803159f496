//! Service configuration.
//!
//! Every option can be given as a command-line flag or through the
//! environment (a `.env` file is loaded by the binary before parsing).
//! Numeric worker options are clamped to the service floors when converted
//! into [`Settings`].

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

use crate::worker::WorkerConfig;

/// Default queue database location.
pub const DEFAULT_QUEUE_PATH: &str = "data/async-queue.sqlite";

/// Default directory for extracted table files.
pub const DEFAULT_OUTPUT_DIR: &str = "data/extracted";

/// Default HTTP bind address.
pub const DEFAULT_BIND: &str = "127.0.0.1:8088";

const MIN_CONCURRENCY: i64 = 1;
const MIN_MAX_BATCH: i64 = 1;
const MIN_POLL_INTERVAL_MS: i64 = 100;
const MIN_LEASE_SECONDS: i64 = 30;

/// Raw service options as read from flags and environment.
#[derive(Args, Debug, Clone)]
pub struct ServiceArgs {
    /// Queue database path
    #[arg(long, env = "ASYNC_QUEUE_PATH", default_value = DEFAULT_QUEUE_PATH, global = true)]
    pub queue_path: PathBuf,

    /// Directory extracted tables are written to
    #[arg(long, env = "OUTPUT_EXTRACTED_DIR", default_value = DEFAULT_OUTPUT_DIR, global = true)]
    pub output_dir: PathBuf,

    /// Shared bearer token for the queue API (unset = open access)
    #[arg(long, env = "TABLE_SERVICE_TOKEN", global = true, hide_env_values = true)]
    pub token: Option<String>,

    /// Run the worker inside the server process (1/true/yes)
    #[arg(long, env = "TABLE_SERVICE_ENABLE_WORKER", default_value = "1", global = true)]
    pub enable_worker: String,

    /// Maximum requests processed at once
    #[arg(long, env = "TABLE_WORKER_CONCURRENCY", default_value_t = 2, global = true, allow_negative_numbers = true)]
    pub concurrency: i64,

    /// Maximum requests leased per poll
    #[arg(long, env = "TABLE_WORKER_MAX_BATCH", default_value_t = 5, global = true, allow_negative_numbers = true)]
    pub max_batch: i64,

    /// Sleep between empty polls, in milliseconds
    #[arg(long, env = "TABLE_WORKER_POLL_INTERVAL_MS", default_value_t = 1000, global = true, allow_negative_numbers = true)]
    pub poll_interval_ms: i64,

    /// Lease duration, in seconds
    #[arg(long, env = "TABLE_WORKER_LEASE_SECONDS", default_value_t = 120, global = true, allow_negative_numbers = true)]
    pub lease_seconds: i64,

    /// Upper bound on one extraction, in seconds (defaults to the lease duration)
    #[arg(
        long,
        env = "TABLE_WORKER_PROCESSING_TIMEOUT_SECONDS",
        global = true,
        allow_negative_numbers = true
    )]
    pub processing_timeout_seconds: Option<i64>,

    /// HTTP bind address (port, host, or host:port)
    #[arg(long, env = "TABLE_SERVICE_BIND", default_value = DEFAULT_BIND, global = true)]
    pub bind: String,
}

/// Normalized service settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub queue_path: PathBuf,
    pub output_dir: PathBuf,
    /// `None` disables the bearer-token check entirely.
    pub token: Option<String>,
    pub worker_enabled: bool,
    pub worker: WorkerConfig,
    pub bind: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            queue_path: PathBuf::from(DEFAULT_QUEUE_PATH),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            token: None,
            worker_enabled: true,
            worker: WorkerConfig::default(),
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

impl From<ServiceArgs> for Settings {
    fn from(args: ServiceArgs) -> Self {
        let lease_seconds = at_least(args.lease_seconds, MIN_LEASE_SECONDS);
        let processing_timeout = args
            .processing_timeout_seconds
            .filter(|secs| *secs > 0)
            .map(|secs| at_least(secs, 1))
            .unwrap_or(lease_seconds);

        Self {
            queue_path: args.queue_path,
            output_dir: args.output_dir,
            token: args
                .token
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
            worker_enabled: parse_bool_flag(&args.enable_worker),
            worker: WorkerConfig {
                concurrency: count_at_least(args.concurrency, MIN_CONCURRENCY),
                max_batch: count_at_least(args.max_batch, MIN_MAX_BATCH),
                poll_interval: Duration::from_millis(at_least(
                    args.poll_interval_ms,
                    MIN_POLL_INTERVAL_MS,
                )),
                lease_seconds,
                processing_timeout: Duration::from_secs(processing_timeout),
            },
            bind: args.bind,
        }
    }
}

/// Clamp a signed option to `floor` (which is positive).
fn at_least(value: i64, floor: i64) -> u64 {
    value.max(floor).unsigned_abs()
}

fn count_at_least(value: i64, floor: i64) -> usize {
    usize::try_from(at_least(value, floor)).unwrap_or(usize::MAX)
}

/// Interpret an on/off environment value. Only `1`, `true` and `yes` enable.
pub fn parse_bool_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes"
    )
}

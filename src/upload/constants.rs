use std::time::Duration;

pub const MIN_FRAGMENT_SIZE: u64 = 32 * 1024;

/// Fragments above this size are aligned to it, as the server requires
pub const DISCRETE_CHUNK_SIZE: u64 = 320 * 1024;

pub const MAX_FRAGMENT_SIZE: u64 = 60 * 1024 * 1024;

/// 32KiB out of 60MiB
pub const MIN_SPEED: f64 = 1.0 / 1920.0;
pub const MAX_SPEED: f64 = 1.0;
pub const INITIAL_SPEED: f64 = 1.0 / 8.0;

pub const SPEED_UPGRADE_FACTOR: f64 = 1.189_207_115_002_721; // 2^(1/4)
pub const FAST_DOWNGRADE_FACTOR: f64 = 8.0;
pub const SLOW_DOWNGRADE_FACTOR: f64 = 2.0;

pub const BACKOFF_INITIAL: Duration = Duration::from_millis(500);
pub const BACKOFF_MULTIPLIER: f64 = 2.0;
pub const BACKOFF_MAX: Duration = Duration::from_secs(30);

pub const RETRY_DELAY: Duration = Duration::from_secs(1);
pub const INVALID_RANGE_DELAY: Duration = Duration::from_secs(1);

pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_FRAGMENT_TIMEOUT: Duration = Duration::from_secs(120);

/// Bandwidth samples needed before the verifier judges a transfer
pub const MIN_BANDWIDTH_SAMPLES: u32 = 4;
pub const MIN_BANDWIDTH_ELAPSED: Duration = Duration::from_secs(4);
pub const EXTRA_CAPACITY_RATIO: f64 = 0.5;

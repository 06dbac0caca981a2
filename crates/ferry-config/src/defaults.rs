//! Reference values used when neither the file nor the environment sets a field.

/// Payload size above which node downloads ask for confirmation (100 MiB).
pub const DEFAULT_LARGE_OPERATION_THRESHOLD_BYTES: u64 = 100 * 1024 * 1024;
/// Interval between folded samples of a supervisor run.
pub const DEFAULT_SAMPLING_INTERVAL_MS: u64 = 1_000;
/// Interval between rating-heuristic samples.
pub const DEFAULT_RATING_SAMPLE_INTERVAL_MS: u64 = 1_000;
/// Replay ring size of the event bus.
pub const DEFAULT_EVENT_REPLAY_CAPACITY: usize = 1_024;
/// Directory holding every other default path.
pub const DEFAULT_DATA_DIR: &str = ".ferry";
/// Default log filter.
pub const DEFAULT_LOG_LEVEL: &str = "info";

//! Plain configuration structs threaded from CLI parsing down into the
//! transfer manager and transport layers.

use std::time::Duration;

/// Output and logging configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputConfig {
    /// Suppress `ERROR:`-prefixed lines.
    pub quiet: bool,
    /// Verbosity level: 0=ERROR, 1=INFO, 2=DEBUG, 3=TRACE.
    pub verbose: u8,
    /// Print a final summary line (bytes moved, elapsed, throughput, failures).
    pub print_summary: bool,
}

/// Per-side (source or sink) flags that apply uniformly to every flow on
/// that side, mirroring the original's side-local flag design.
#[derive(Debug, Clone, Copy, Default)]
pub struct SideConfig {
    /// Use O_DIRECT on this side.
    pub direct_io: bool,
    /// Force strictly serial (in-order) I/O instead of the side's default
    /// ordering mode.
    pub serial_ordering: bool,
    /// Have the mover emit its own verbose execute-string/stderr logging.
    pub verbose: bool,
    /// Have the mover timestamp each operation.
    pub timestamp: bool,
}

/// CLI retry-loop configuration.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Number of additional attempts after the first failure. `0` disables
    /// retries entirely.
    pub retries: u32,
    /// Delay between retry attempts.
    pub backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries: 0,
            backoff: Duration::from_secs(1),
        }
    }
}

/// Tokio runtime sizing, exposed as a CLI knob the same way the rest of the
/// workspace exposes it.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeConfig {
    /// Number of worker threads (0 = number of CPU cores).
    pub max_workers: usize,
}

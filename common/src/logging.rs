//! `tracing` subscriber initialization shared by the `xddmcp`, `xddmcp-agent`
//! and `xddprof` binaries.

use crate::config::OutputConfig;

/// Initialize a `tracing-subscriber` `fmt` layer with a verbosity derived
/// from `output.verbose`/`output.quiet`, writing to stdout so progress
/// (rendered on stderr) isn't interleaved with logs and both can be
/// redirected independently.
///
/// `-q` forces `ERROR` only; otherwise `verbose` of 0/1/2/3+ maps to
/// `ERROR`/`INFO`/`DEBUG`/`TRACE`.
pub fn init(output: &OutputConfig) {
    let level = if output.quiet {
        tracing::Level::ERROR
    } else {
        match output.verbose {
            0 => tracing::Level::ERROR,
            1 => tracing::Level::INFO,
            2 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    };
    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stdout)
        .with_target(false)
        .init();
}

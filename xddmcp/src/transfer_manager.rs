//! Drives a recursive transfer across one [`crate::factory::EndpointFactory`]'s
//! endpoints: walks the source tree, starts and monitors one file transfer
//! at a time, and renders progress.
//!
//! Grounded on `original_source/.../xdd/transfermanager.py`'s
//! `TransferManager`: sinks are always started before sources (with a
//! fixed settle delay in between so the sink's listening sockets are up
//! before the source dials them), multi-source byte counts are corrected
//! through [`common::progress::corrected_completed_bytes`], and a restart
//! run treats a sink whose progress marker already lists the whole target
//! as complete as if the target didn't exist at all.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use common::config::OutputConfig;
use common::flow_builder::FlowBuilder;
use common::model::StartFlowRequest;
use common::progress::{self, ProgressLine};

use crate::factory::EndpointFactory;

/// Delay between starting every sink and dialing the first source,
/// matching the settle time the original gives sinks to start listening.
const SINK_TO_SOURCE_DELAY: Duration = Duration::from_millis(800);

/// A single progress-rendering callback, invoked once per monitor tick
/// with the current file name and a fully-formatted status line.
pub trait ProgressSink: Send + Sync {
    fn update(&self, filename: &str, line: &str);
    fn finish(&self, filename: &str, line: &str);
}

/// Drops progress updates on the floor; used when output is suppressed.
pub struct NullProgressSink;

impl ProgressSink for NullProgressSink {
    fn update(&self, _filename: &str, _line: &str) {}
    fn finish(&self, _filename: &str, _line: &str) {}
}

/// Orchestrates one whole-tree transfer across an already-built
/// [`EndpointFactory`].
pub struct TransferManager {
    factory: EndpointFactory,
    output: OutputConfig,
    monitor_interval: Duration,
    restart: bool,
    rewrite_absolute_links: bool,
    cancelled: Arc<AtomicBool>,
    progress: Arc<dyn ProgressSink>,
}

/// Outcome of a completed recursive transfer run.
#[derive(Debug, Default, Clone, Copy)]
pub struct TransferSummary {
    pub dirs_created: u64,
    pub files_transferred: u64,
    pub files_skipped: u64,
    pub symlinks_created: u64,
    pub bytes_transferred: u64,
    pub failures: u64,
}

impl TransferManager {
    pub fn new(
        factory: EndpointFactory,
        output: OutputConfig,
        monitor_interval: Duration,
        restart: bool,
        rewrite_absolute_links: bool,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            factory,
            output,
            monitor_interval,
            restart,
            rewrite_absolute_links,
            cancelled: Arc::new(AtomicBool::new(false)),
            progress,
        }
    }

    /// A handle the CLI's ctrl-c listener can flip to request cancellation
    /// between files; checked at the top of every loop iteration.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(AtomicOrdering::Relaxed)
    }

    /// Walk `source_target` against `sink_target` and transfer every
    /// directory, file and symlink found, skipping anything a prior
    /// restart run already finished.
    pub async fn run(mut self, source_target: &str, sink_target: &str) -> anyhow::Result<TransferSummary> {
        self.factory
            .create_endpoints()
            .await
            .context("failed to create transfer endpoints")?;

        let result = self.run_inner(source_target, sink_target).await;
        self.factory.shutdown().await;
        result
    }

    async fn run_inner(&self, source_target: &str, sink_target: &str) -> anyhow::Result<TransferSummary> {
        let sinks = self.factory.sink_endpoints();
        let sources = self.factory.source_endpoints();
        let sink = sinks.first().context("no sink endpoint configured")?;
        let source = sources.first().context("no source endpoint configured")?;

        let mut sink_exists = sink.path_exists(sink_target).await?;
        let sink_is_dir = if sink_exists {
            sink.path_is_dir(sink_target).await?
        } else {
            false
        };

        if self.restart && sink_exists && sink.transfer_is_complete(sink_target, sink_target).await? {
            // The whole target was already finished by an earlier run;
            // treat it as absent so the walk recreates the top-level name.
            sink_exists = false;
        }

        let walk = source
            .build_walk(
                source_target.to_string(),
                sink_target.to_string(),
                sink_exists,
                sink_is_dir,
                self.rewrite_absolute_links,
            )
            .await
            .context("failed to walk source tree")?;

        if walk.rc != 0 {
            anyhow::bail!("source tree walk failed with rc={}", walk.rc);
        }

        let mut summary = TransferSummary::default();

        for (_source_dir, target_dir) in &walk.dirs {
            let target_dir = target_dir.to_string_lossy().to_string();
            sink.create_directory(&target_dir)
                .await
                .with_context(|| format!("failed to create directory '{target_dir}'"))?;
            sink.mark_transfer_completed(sink_target, &target_dir).await.ok();
            summary.dirs_created += 1;
        }

        for (source_file, target_file) in &walk.files {
            if self.is_cancelled() {
                anyhow::bail!("transfer cancelled");
            }
            let source_file = source_file.to_string_lossy().to_string();
            let target_file = target_file.to_string_lossy().to_string();

            if self.restart && sink.transfer_is_complete(sink_target, &target_file).await? {
                summary.files_skipped += 1;
                continue;
            }

            let (size, restart_offset) = self.start_transfer(source, sink, &source_file, &target_file).await?;
            let bytes = self
                .monitor_transfer(sinks, sources, size, restart_offset, &target_file)
                .await?;
            summary.bytes_transferred += bytes;
            summary.files_transferred += 1;

            if self.restart {
                let shard_count = sinks.len() as u64;
                for (idx, endpoint) in sinks.iter().enumerate() {
                    endpoint
                        .remove_restart_cookie(&target_file, idx as u64, shard_count)
                        .await
                        .ok();
                }
                sink.mark_transfer_completed(sink_target, &target_file).await.ok();
            }
        }

        for link in &walk.symlinks {
            let target = link.target.to_string_lossy().to_string();
            let link_target = link.link_target.to_string_lossy().to_string();
            sink.create_symlink(&target, &link_target)
                .await
                .with_context(|| format!("failed to create symlink '{target}'"))?;
            sink.mark_transfer_completed(sink_target, &target).await.ok();
            summary.symlinks_created += 1;
        }

        if summary.failures == 0 {
            sink.remove_transfer_progress_file(sink_target).await.ok();
        }

        Ok(summary)
    }

    /// Compute the transfer size and restart offset for one file, then
    /// start every sink, wait out the settle delay, and start every
    /// source. Returns the file's total transfer size and restart offset.
    async fn start_transfer(
        &self,
        source: &Arc<dyn FlowBuilder>,
        sink: &Arc<dyn FlowBuilder>,
        source_file: &str,
        sink_file: &str,
    ) -> anyhow::Result<(u64, u64)> {
        let total_size = source.get_file_size(source_file).await?;
        let shard_count = self.factory.sink_endpoints().len() as u64;
        let restart_offset = if self.restart {
            sink.get_restart_offset(sink_file, 0, shard_count).await?
        } else {
            0
        };

        let single_source = self.factory.source_endpoints().len() == 1;
        let restart_cookie_path = Some(
            common::cookie::restart_cookie_path(Path::new(sink_file), 0, shard_count)
                .to_string_lossy()
                .to_string(),
        );

        for endpoint in self.factory.sink_endpoints() {
            endpoint
                .start_flow(StartFlowRequest {
                    target: sink_file.to_string(),
                    total_size,
                    restart: self.restart,
                    restart_offset,
                    restart_cookie_path: restart_cookie_path.clone(),
                    single_source,
                })
                .await
                .context("failed to start sink flow")?;
        }

        tokio::time::sleep(SINK_TO_SOURCE_DELAY).await;

        for endpoint in self.factory.source_endpoints() {
            endpoint
                .start_flow(StartFlowRequest {
                    target: source_file.to_string(),
                    total_size,
                    restart: self.restart,
                    restart_offset,
                    restart_cookie_path: None,
                    single_source,
                })
                .await
                .context("failed to start source flow")?;
        }

        if self.output.verbose > 0 {
            tracing::info!(source_file, sink_file, total_size, "started transfer");
        }

        Ok((total_size, restart_offset))
    }

    /// Poll every endpoint until all have reported completion (or one has
    /// failed), rendering a progress line each tick.
    async fn monitor_transfer(
        &self,
        sinks: &[Arc<dyn FlowBuilder>],
        sources: &[Arc<dyn FlowBuilder>],
        flow_size: u64,
        restart_offset: u64,
        filename: &str,
    ) -> anyhow::Result<u64> {
        let all: Vec<&Arc<dyn FlowBuilder>> = sinks.iter().chain(sources.iter()).collect();
        let begin = Instant::now();
        let mut completed_count = 0usize;
        let mut failures = 0u64;

        while completed_count < all.len() && failures == 0 {
            completed_count = 0;
            let mut raw_completed = 0u64;
            for endpoint in &all {
                if let Some(status) = endpoint.completion_status().await? {
                    completed_count += 1;
                    if status != 0 {
                        failures += 1;
                    }
                }
                let current = endpoint.current_byte().await.unwrap_or(0);
                if current > 0 {
                    raw_completed += current;
                }
            }

            let corrected = progress::corrected_completed_bytes(raw_completed, restart_offset, sources.len());
            let line = ProgressLine::compute(corrected, flow_size, begin.elapsed());
            if !self.output.quiet {
                let width = progress::terminal_width();
                let rendered = progress::render_status_line(filename, &line, corrected, width);
                self.progress.update(filename, &rendered);
            }

            if failures > 0 || completed_count >= all.len() {
                break;
            }
            tokio::time::sleep(self.monitor_interval).await;
        }

        for endpoint in &all {
            match endpoint.completion_status().await? {
                None => {
                    endpoint.cancel_flow().await.ok();
                }
                Some(rc) if rc != 0 => {
                    let reason = endpoint.error_string().await.unwrap_or_default();
                    tracing::error!(rc, reason, "flow endpoint reported failure");
                }
                _ => {}
            }
        }

        if failures == 0 {
            let final_line = ProgressLine::compute(flow_size, flow_size, begin.elapsed());
            let width = progress::terminal_width();
            let rendered = progress::render_status_line(filename, &final_line, flow_size, width);
            self.progress.finish(filename, &rendered);
            Ok(flow_size)
        } else {
            anyhow::bail!("{failures} endpoint(s) reported a non-zero completion status")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_to_source_delay_is_sub_second() {
        assert!(SINK_TO_SOURCE_DELAY < Duration::from_secs(1));
    }

    #[test]
    fn null_progress_sink_does_not_panic() {
        let sink = NullProgressSink;
        sink.update("f", "line");
        sink.finish("f", "line");
    }
}

//! Mover child-process supervisor: preflight checks, command-line
//! assembly, heartbeat parsing, and lifecycle (`start`/`poll`/`cancel`).
//!
//! A `Flow` owns at most one mover child at a time and is never reused
//! across files (a fresh `Flow` is built per shard per file by
//! `LocalFlowBuilder::build_flow`). None of its public operations let an
//! error cross as an exception: preflight failures and runtime failures
//! alike surface as `String` reasons collected in `errors()`, matching the
//! propagation policy in spec.md §7.
//!
//! Grounded on `original_source/.../xdd/flow.py`
//! (`Flow.createCommandArgs`, `checkSinkPreconditions`,
//! `checkSourcePreconditions`, heartbeat parsing in
//! `XDDFlowStatus.currentByte`).

use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use crate::model::{BuildFlowRequest, Ordering, ShardRole, StartFlowRequest};
use crate::partition::AlignedPartition;

/// Shared state updated by the background stdout/stderr pump tasks.
#[derive(Default)]
struct Watch {
    heartbeat_byte: AtomicU64,
    /// Accumulated standard-output text not yet drained by `output()`.
    stdout_buf: Mutex<String>,
    /// Diagnostic lines from stderr that did not parse as a heartbeat.
    stderr_buf: Mutex<String>,
    exited: AtomicBool,
    exit_code: AtomicU64, // stores (code as u32) + 1, 0 means "not exited"
}

/// A handle to one mover child process for one shard of one file.
pub struct Flow {
    watch: Arc<Watch>,
    child: Option<Child>,
    /// Set for the zero-length-shard bypass path (§4.3): no child is ever
    /// spawned and completion is reported immediately.
    bypassed: bool,
    bypass_exit_code: i32,
    errors: Vec<String>,
}

impl Flow {
    /// Run preflight checks and spawn the mover child (or take the
    /// zero-length-shard bypass path). On preflight failure, no process is
    /// spawned and the reasons are returned as `Err`.
    pub async fn start(
        config: &BuildFlowRequest,
        req: &StartFlowRequest,
    ) -> Result<Flow, Vec<String>> {
        let mut errors = Vec::new();

        if let Err(e) = check_mover_executable(&config.mover_path) {
            errors.push(e);
        }

        let target = Path::new(&req.target);
        match config.identity.role {
            ShardRole::Sink => check_sink_preconditions(target, config, req, &mut errors),
            ShardRole::Source => check_source_preconditions(target, config, &mut errors),
        }

        if req.restart && req.restart_offset > 0 {
            if let Ok(meta) = std::fs::metadata(target) {
                if req.restart_offset > meta.len() {
                    errors.push(format!(
                        "Corrupt restart cookie: offset {} exceeds destination size {}",
                        req.restart_offset,
                        meta.len()
                    ));
                    errors.push("Restart offset larger than destination file".to_string());
                }
            }
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        let partition = AlignedPartition::new(
            config.identity.total,
            config.req_size,
            req.total_size,
        );
        let shard_len = partition.part_size(config.identity.index);
        let shard_offset = partition.part_begin(config.identity.index);

        if shard_len == 0 {
            // Zero-length shard bypass: index 0 on the sink creates an
            // empty destination file; every other shard (and every source
            // shard) is a no-op success.
            if config.identity.role == ShardRole::Sink && config.identity.index == 0 {
                if let Err(e) = std::fs::OpenOptions::new()
                    .create(true)
                    .write(true)
                    .truncate(req.restart_offset == 0)
                    .open(target)
                {
                    return Err(vec![format!(
                        "failed to create empty destination file: {e}"
                    )]);
                }
            }
            return Ok(Flow {
                watch: Arc::new(Watch::default()),
                child: None,
                bypassed: true,
                bypass_exit_code: 0,
                errors: Vec::new(),
            });
        }

        let args = build_command_args(config, req, shard_offset, shard_len);
        let mut cmd = Command::new(&config.mover_path);
        cmd.args(&args)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| vec![format!("failed to spawn mover process: {e}")])?;

        let watch = Arc::new(Watch::default());

        if let Some(stdout) = child.stdout.take() {
            let watch = Arc::clone(&watch);
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let mut buf = watch.stdout_buf.lock().await;
                    buf.push_str(&line);
                    buf.push('\n');
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            let watch = Arc::clone(&watch);
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if let Some(byte) = parse_heartbeat(&line) {
                        watch.heartbeat_byte.store(byte, AtomicOrdering::Relaxed);
                    } else {
                        let mut buf = watch.stderr_buf.lock().await;
                        buf.push_str(&line);
                        buf.push('\n');
                    }
                }
            });
        }

        Ok(Flow {
            watch,
            child: Some(child),
            bypassed: false,
            bypass_exit_code: 0,
            errors: Vec::new(),
        })
    }

    /// `true` while the child is still running.
    pub async fn poll(&mut self) -> bool {
        if self.bypassed {
            return false;
        }
        let Some(child) = self.child.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(Some(status)) => {
                let code = status.code().unwrap_or(-1);
                self.watch
                    .exit_code
                    .store((code as i64 + 1) as u64, AtomicOrdering::Relaxed);
                self.watch.exited.store(true, AtomicOrdering::Relaxed);
                false
            }
            Ok(None) => true,
            Err(_) => false,
        }
    }

    /// Exit code once terminated, `None` while still running.
    pub fn completion(&self) -> Option<i32> {
        if self.bypassed {
            return Some(self.bypass_exit_code);
        }
        if !self.watch.exited.load(AtomicOrdering::Relaxed) {
            return None;
        }
        let stored = self.watch.exit_code.load(AtomicOrdering::Relaxed);
        if stored == 0 {
            None
        } else {
            Some((stored as i64 - 1) as i32)
        }
    }

    /// Latest observed heartbeat byte (completed-byte count for this shard).
    pub fn current_byte(&self) -> u64 {
        self.watch.heartbeat_byte.load(AtomicOrdering::Relaxed)
    }

    /// Drain accumulated standard-output text collected since the last
    /// call. `flush_all` has no effect beyond draining what's buffered —
    /// reads are always non-blocking.
    pub async fn output(&self, _flush_all: bool) -> String {
        let mut buf = self.watch.stdout_buf.lock().await;
        std::mem::take(&mut *buf)
    }

    /// Collected diagnostic stderr lines that did not parse as a heartbeat.
    pub async fn error_string(&self) -> String {
        let buf = self.watch.stderr_buf.lock().await;
        buf.clone()
    }

    /// Send a termination signal to the child, tolerating "already exited".
    pub async fn cancel(&mut self) {
        if let Some(child) = self.child.as_mut() {
            let _ = child.start_kill();
        }
    }
}

fn check_mover_executable(path: &str) -> Result<(), String> {
    let meta = std::fs::metadata(path)
        .map_err(|_| format!("mover executable '{path}' does not exist"))?;
    if meta.permissions().mode() & 0o111 == 0 {
        return Err(format!("mover executable '{path}' is not executable"));
    }
    Ok(())
}

fn check_sink_preconditions(
    target: &Path,
    config: &BuildFlowRequest,
    req: &StartFlowRequest,
    errors: &mut Vec<String>,
) {
    let target_meta = std::fs::symlink_metadata(target).ok();
    let parent_writable = target
        .parent()
        .and_then(|p| std::fs::metadata(p).ok())
        .map(|m| m.permissions().mode() & 0o200 != 0)
        .unwrap_or(false);
    let target_writable = target_meta
        .as_ref()
        .map(|m| m.permissions().mode() & 0o200 != 0)
        .unwrap_or(false);

    if target_meta.is_none() && !parent_writable {
        errors.push(format!(
            "sink target '{}' does not exist and its parent directory is not writable",
            target.display()
        ));
    } else if let Some(meta) = &target_meta {
        if !target_writable && !parent_writable {
            errors.push(format!(
                "sink target '{}' exists but is not writable",
                target.display()
            ));
        }
        if meta.file_type().is_char_device() {
            if config.flags.direct_io {
                errors.push(format!(
                    "direct I/O is not supported on special file '{}'",
                    target.display()
                ));
            }
            if req.restart {
                errors.push(format!(
                    "sink path '{}' is a character device and cannot be used with restart",
                    target.display()
                ));
            }
        }
    }
    if req.restart && !parent_writable {
        errors.push(format!(
            "restart requires a writable parent directory for '{}'",
            target.display()
        ));
    }
}

fn check_source_preconditions(target: &Path, config: &BuildFlowRequest, errors: &mut Vec<String>) {
    match std::fs::symlink_metadata(target) {
        Err(_) => errors.push(format!("source target '{}' does not exist", target.display())),
        Ok(meta) => {
            let ft = meta.file_type();
            if !(ft.is_file() || ft.is_symlink() || ft.is_block_device() || ft.is_char_device()) {
                errors.push(format!(
                    "source target '{}' has an unsupported file type",
                    target.display()
                ));
                return;
            }
            if meta.permissions().mode() & 0o444 == 0 {
                errors.push(format!("source target '{}' is not readable", target.display()));
            }
            if ft.is_char_device() && config.flags.direct_io {
                errors.push(format!(
                    "direct I/O is not supported on special file '{}'",
                    target.display()
                ));
            }
        }
    }
}

/// Assemble the mover command-line arguments per the contract in spec.md
/// §4.3.
fn build_command_args(
    config: &BuildFlowRequest,
    req: &StartFlowRequest,
    shard_offset: u64,
    shard_len: u64,
) -> Vec<String> {
    let mut args = vec!["-target".to_string(), req.target.clone()];

    match config.identity.role {
        ShardRole::Sink => {
            args.push("-op".into());
            args.push("write".into());
            args.push("-e2e".into());
            args.push("isdest".into());
        }
        ShardRole::Source => {
            args.push("-op".into());
            args.push("read".into());
            args.push("-e2e".into());
            args.push("issource".into());
        }
    }

    args.push("-reqsize".into());
    args.push(config.req_size.to_string());
    args.push("-blocksize".into());
    args.push("1".into());
    args.push("-bytes".into());
    args.push(shard_len.to_string());

    for iface in &config.ifaces {
        args.push("-e2e".into());
        args.push("dest".into());
        args.push(iface.to_arg());
    }

    if config.flags.direct_io {
        args.push("-dio".into());
    }

    match config.identity.role {
        ShardRole::Sink => match config.flags.ordering {
            Ordering::Serial => args.push("-serialordering".into()),
            Ordering::None | Ordering::Loose => args.push("-noordering".into()),
        },
        ShardRole::Source => args.push("-looseordering".into()),
    }

    match config.identity.role {
        ShardRole::Sink => {
            if req.restart {
                args.push("-restart".into());
                args.push("offset".into());
                args.push(req.restart_offset.to_string());
                args.push("-restart".into());
                args.push("enable".into());
                if let Some(cookie) = &req.restart_cookie_path {
                    args.push("-restart".into());
                    args.push("file".into());
                    args.push(cookie.clone());
                }
            } else if req.single_source {
                args.push("-restart".into());
                args.push("offset".into());
                args.push(shard_offset.to_string());
            } else {
                args.push("-startoffset".into());
                args.push(shard_offset.to_string());
            }
            if req.restart_offset == 0 {
                args.push("-preallocate".into());
                args.push(shard_len.to_string());
            }
            args.push("-hb".into());
            args.push("1".into());
            args.push("-hb".into());
            args.push("bytes".into());
            args.push("-hb".into());
            args.push("lf".into());
        }
        ShardRole::Source => {
            args.push("-startoffset".into());
            args.push(shard_offset.to_string());
        }
    }

    args.push("-verbose".into());
    args.push("-minall".into());
    args.push("-stoponerror".into());

    args
}

/// Parse one comma-delimited heartbeat line off the mover's stderr.
///
/// The mover emits periodic lines of the form `\nPass,<n>,<n>,<bytes>,B...`.
/// A line qualifies when it has at least 5 comma-separated fields, field 0
/// is the literal `\nPass`, and field 4 begins with `B`; field 3 is then
/// the completed byte count. Non-matching lines return `None` and are kept
/// as diagnostic output instead.
fn parse_heartbeat(line: &str) -> Option<u64> {
    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() < 5 {
        return None;
    }
    if fields[0] != "\nPass" {
        return None;
    }
    if !fields[4].starts_with('B') {
        return None;
    }
    fields[3].trim().parse::<u64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_parses_matching_line() {
        let line = "\nPass,0,1,4096,Bytes/sec,extra";
        assert_eq!(parse_heartbeat(line), Some(4096));
    }

    #[test]
    fn heartbeat_ignores_non_matching_prefix() {
        let line = "Pass,0,1,4096,Bytes";
        assert_eq!(parse_heartbeat(line), None);
    }

    #[test]
    fn heartbeat_ignores_short_lines() {
        assert_eq!(parse_heartbeat("\nPass,0,1"), None);
    }

    #[test]
    fn heartbeat_ignores_field4_not_starting_with_b() {
        let line = "\nPass,0,1,4096,xBytes";
        assert_eq!(parse_heartbeat(line), None);
    }

    #[test]
    fn command_args_sink_contract() {
        let config = BuildFlowRequest {
            identity: crate::model::ShardIdentity {
                role: ShardRole::Sink,
                index: 0,
                total: 1,
            },
            req_size: 8_388_608,
            ifaces: vec![crate::model::Iface {
                host: "127.0.0.1".to_string(),
                port: 40010,
                threads: 1,
                numa: None,
            }],
            flags: crate::model::SideFlags::default(),
            mover_path: "/bin/true".to_string(),
        };
        let req = StartFlowRequest {
            target: "/tmp/b.bin".to_string(),
            total_size: 1_048_576,
            restart: false,
            restart_offset: 0,
            restart_cookie_path: None,
            single_source: true,
        };
        let args = build_command_args(&config, &req, 0, 1_048_576);
        let joined = args.join(" ");
        assert!(joined.contains("-reqsize 8388608"));
        assert!(joined.contains("-bytes 1048576"));
        assert!(joined.contains("-preallocate 1048576"));
        assert!(joined.contains("-op write"));
        assert!(joined.contains("-e2e isdest"));
        assert!(joined.contains("-e2e dest 127.0.0.1:40010,1"));
    }

    #[test]
    fn command_args_restart_enabled_sink() {
        let config = BuildFlowRequest {
            identity: crate::model::ShardIdentity {
                role: ShardRole::Sink,
                index: 0,
                total: 1,
            },
            req_size: 8192,
            ifaces: vec![],
            flags: crate::model::SideFlags::default(),
            mover_path: "/bin/true".to_string(),
        };
        let req = StartFlowRequest {
            target: "/tmp/b.bin".to_string(),
            total_size: 1 << 30,
            restart: true,
            restart_offset: 536_870_912,
            restart_cookie_path: Some("/tmp/.b.bin-0-1.xrf".to_string()),
            single_source: true,
        };
        let args = build_command_args(&config, &req, 0, 1 << 29);
        let joined = args.join(" ");
        assert!(joined.contains("-restart offset 536870912"));
        assert!(joined.contains("-restart enable"));
        assert!(joined.contains("-restart file /tmp/.b.bin-0-1.xrf"));
        assert!(!joined.contains("-preallocate"));
    }
}

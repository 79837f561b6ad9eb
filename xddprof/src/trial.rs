//! Runs one `xdd` mover invocation for a single point in the sweep and
//! parses its `COMBINED` summary line.
//!
//! Grounded on `original_source/.../xdd/profiletrial.py`'s `ProfileTrial`:
//! the command line assembly (`-targets`, `-op`, `-reqsize 1`,
//! `-blocksize`, `-qd`, optional `-dio`, random-pattern seek lists,
//! allocation strategy flags, `-bytes`, optional `-restart offset`,
//! `-timelimit`, `-output`, `-stoponerror`) and the `grep COMBINED` result
//! parsing are reproduced as-is.

use std::path::{Path, PathBuf};

use anyhow::Context;
use rand::seq::SliceRandom;

use crate::personality::{Alloc, Ordering, Pattern};

/// A 16 GiB ceiling on the heuristic byte count the original derives from
/// `reqsize * 1024 * 1024` when the caller doesn't pin an explicit size.
const HEURISTIC_CAP: u64 = 16 * 1024 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct TrialConfig {
    pub volumes: Vec<String>,
    pub target_name: String,
    pub reqsize: u64,
    pub queue_depth: u32,
    pub dio: bool,
    pub offset: u64,
    pub order: Ordering,
    pub pattern: Pattern,
    pub alloc: Alloc,
    pub time_limit_secs: u64,
    pub mover_path: String,
    pub nbytes: Option<u64>,
}

impl TrialConfig {
    fn nbytes_for_write(&self) -> u64 {
        self.nbytes
            .unwrap_or_else(|| HEURISTIC_CAP.min(self.reqsize.saturating_mul(1024 * 1024)))
    }

    pub(crate) fn target_paths(&self) -> Vec<PathBuf> {
        self.volumes
            .iter()
            .map(|v| {
                if v.is_empty() {
                    PathBuf::from(&self.target_name)
                } else {
                    Path::new(v).join(&self.target_name)
                }
            })
            .collect()
    }
}

/// Result of grepping a trial's output log for its `COMBINED` summary line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrialResult {
    pub total_bytes: u64,
    pub total_ops: u64,
    pub total_secs: f64,
}

/// Build the mover command-line arguments for one write or read trial.
/// `read_sizes`, when running a read trial, are the actual on-disk sizes of
/// the write-phase targets (reads are capped to the smallest of them).
pub fn build_args(cfg: &TrialConfig, is_write: bool, read_sizes: &[u64], log_path: &str) -> Vec<String> {
    let targets = cfg.target_paths();
    let mut args = vec!["-targets".to_string(), targets.len().to_string()];
    args.extend(targets.iter().map(|p| p.to_string_lossy().to_string()));

    let op = if is_write { "write" } else { "read" };
    args.push("-op".to_string());
    args.push(op.to_string());
    args.push("-reqsize".to_string());
    args.push("1".to_string());
    args.push("-blocksize".to_string());
    args.push(cfg.reqsize.to_string());
    args.push("-qd".to_string());
    args.push(cfg.queue_depth.to_string());
    if cfg.dio {
        args.push("-dio".to_string());
    }

    let nbytes = if is_write {
        cfg.nbytes_for_write()
    } else {
        read_sizes.iter().copied().min().unwrap_or(0)
    };

    if cfg.pattern == Pattern::Random {
        let srange = nbytes / cfg.reqsize.max(1);
        args.push("-seek".to_string());
        args.push("random".to_string());
        args.push("-seek".to_string());
        args.push("range".to_string());
        args.push(srange.to_string());
    }

    match cfg.alloc {
        Alloc::Preallocate => {
            args.push("-preallocate".to_string());
            args.push(nbytes.to_string());
        }
        Alloc::Pretruncate => {
            args.push("-pretruncate".to_string());
            args.push(nbytes.to_string());
        }
        Alloc::Demand => {}
    }

    args.push("-bytes".to_string());
    args.push(nbytes.to_string());

    if cfg.offset > 0 {
        args.push("-restart".to_string());
        args.push("offset".to_string());
        args.push(cfg.offset.to_string());
    }

    args.push(cfg.order.mover_flag().to_string());
    args.push("-timelimit".to_string());
    args.push(cfg.time_limit_secs.to_string());
    args.push("-output".to_string());
    args.push(log_path.to_string());
    args.push("-stoponerror".to_string());

    args
}

/// Execute one trial (write or read) and return the mover's exit status
/// plus whatever it wrote to stdout/stderr.
pub async fn run(cfg: &TrialConfig, args: &[String]) -> anyhow::Result<std::process::Output> {
    tokio::process::Command::new(&cfg.mover_path)
        .args(args)
        .output()
        .await
        .with_context(|| format!("failed to spawn mover '{}'", cfg.mover_path))
}

/// Parse a trial's output log for its `COMBINED` summary line, mirroring
/// `grep COMBINED logfile` followed by splitting on whitespace and reading
/// fields 4 (bytes), 5 (ops) and 6 (seconds).
pub fn parse_result(log_contents: &str) -> anyhow::Result<TrialResult> {
    let line = log_contents
        .lines()
        .find(|l| l.contains("COMBINED"))
        .context("no COMBINED line found in mover output log")?;
    let fields: Vec<&str> = line.split_whitespace().collect();
    let get = |idx: usize| -> anyhow::Result<&str> {
        fields
            .get(idx)
            .copied()
            .with_context(|| format!("COMBINED line missing field {idx}: '{line}'"))
    };
    Ok(TrialResult {
        total_bytes: get(4)?.parse().context("COMBINED bytes field is not an integer")?,
        total_ops: get(5)?.parse().context("COMBINED ops field is not an integer")?,
        total_secs: get(6)?.parse().context("COMBINED seconds field is not a float")?,
    })
}

/// Build an `xdd` seek-list file for a random-access write trial: one
/// shuffled request number per line, matching
/// `_createRandomWriteSeekListFile`'s `ID ReqNum ReqSize Op Start Stop`
/// layout (reqsize/start/stop are always `0 0` — the mover derives them
/// from `-blocksize`).
pub fn write_random_seek_list(path: &Path, request_count: u64) -> anyhow::Result<()> {
    let mut order: Vec<u64> = (0..request_count).collect();
    order.shuffle(&mut rand::thread_rng());
    let mut contents = String::new();
    for (id, req) in order.into_iter().enumerate() {
        contents.push_str(&format!("{id} {req} w 0 0\n"));
    }
    std::fs::write(path, contents).with_context(|| format!("failed to write seek list '{}'", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> TrialConfig {
        TrialConfig {
            volumes: vec!["/data".to_string()],
            target_name: "ptarget.dat".to_string(),
            reqsize: 65536,
            queue_depth: 4,
            dio: false,
            offset: 0,
            order: Ordering::Loose,
            pattern: Pattern::Sequential,
            alloc: Alloc::Demand,
            time_limit_secs: 30,
            mover_path: "xdd".to_string(),
            nbytes: Some(1024 * 1024),
        }
    }

    #[test]
    fn build_args_includes_core_flags() {
        let args = build_args(&cfg(), true, &[], "/tmp/write.log");
        assert!(args.contains(&"-blocksize".to_string()));
        assert!(args.contains(&"65536".to_string()));
        assert!(args.contains(&"-looseordering".to_string()));
        assert!(!args.iter().any(|a| a == "-dio"));
    }

    #[test]
    fn dio_flag_only_present_when_enabled() {
        let mut c = cfg();
        c.dio = true;
        let args = build_args(&c, true, &[], "/tmp/write.log");
        assert!(args.iter().any(|a| a == "-dio"));
    }

    #[test]
    fn read_trial_uses_smallest_observed_size() {
        let args = build_args(&cfg(), false, &[4096, 2048, 8192], "/tmp/read.log");
        let bytes_idx = args.iter().position(|a| a == "-bytes").unwrap();
        assert_eq!(args[bytes_idx + 1], "2048");
    }

    #[test]
    fn preallocate_adds_size_argument() {
        let mut c = cfg();
        c.alloc = Alloc::Preallocate;
        let args = build_args(&c, true, &[], "/tmp/write.log");
        let idx = args.iter().position(|a| a == "-preallocate").unwrap();
        assert_eq!(args[idx + 1], "1048576");
    }

    #[test]
    fn parse_result_extracts_combined_fields() {
        let log = "some preamble\nCOMBINED 0 1 2 123456 42 1.5\nmore text\n";
        let result = parse_result(log).unwrap();
        assert_eq!(result.total_bytes, 123456);
        assert_eq!(result.total_ops, 42);
        assert_eq!(result.total_secs, 1.5);
    }

    #[test]
    fn parse_result_errors_without_combined_line() {
        assert!(parse_result("nothing here").is_err());
    }

    #[test]
    fn random_seek_list_has_one_line_per_request() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        write_random_seek_list(tmp.path(), 10).unwrap();
        let contents = std::fs::read_to_string(tmp.path()).unwrap();
        assert_eq!(contents.lines().count(), 10);
    }
}

//! TSV result logging for a benchmarking sweep.
//!
//! Grounded on `original_source/.../xdd/profiler.py`'s `writeHeader` and
//! `addResult`: one tab-separated line per trial, appended immediately
//! (not buffered for the whole sweep) so a killed run still leaves partial
//! results on disk, split into separate write/read log files.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use anyhow::Context;

use crate::personality::{Alloc, Ordering, Pattern};
use crate::trial::TrialResult;

const HEADER: &str = "\
# xddprof profiling results
#
# \t\t\t\tWorkload\t\t\t\t\t| Performance
#
# ID\tVolume\tOper\tTrial\tTarget\tTLimit\tReqsz\tThrds\tDirect\tOrder\tAccess\tBytes\t\tTOPs\tTime\tIOPs\tMB/s\tGB/s\tMiB/s\tGiB/s
#
";

pub fn write_header(path: &Path) -> anyhow::Result<()> {
    std::fs::write(path, HEADER).with_context(|| format!("failed to write header to '{}'", path.display()))
}

#[derive(Debug, Clone, Copy)]
pub enum Oper {
    Write,
    Read,
}

impl Oper {
    fn as_str(self) -> &'static str {
        match self {
            Oper::Write => "write",
            Oper::Read => "read",
        }
    }
}

#[allow(clippy::too_many_arguments)]
pub struct ResultRow<'a> {
    pub id: u64,
    pub volume: &'a str,
    pub oper: Oper,
    pub trial: u32,
    pub target: &'a str,
    pub time_limit_secs: u64,
    pub reqsize: u64,
    pub threads: u32,
    pub dio: bool,
    pub order: Ordering,
    pub pattern: Pattern,
    pub alloc: Alloc,
    pub result: TrialResult,
}

fn round_significant(value: f64, digits: i32) -> f64 {
    if value == 0.0 || !value.is_finite() {
        return 0.0;
    }
    let magnitude = value.abs().log10().floor() as i32;
    let factor = 10f64.powi(digits - magnitude - 1);
    (value * factor).round() / factor
}

/// Append one trial's result line to `log_path`, rounding the derived
/// throughput fields to 4 significant digits exactly as `addResult` does.
pub fn append_result(log_path: &Path, row: &ResultRow) -> anyhow::Result<()> {
    let order_str = match row.order {
        Ordering::Serial => "serial",
        Ordering::Loose => "loose",
        Ordering::None => "none",
    };
    let pattern_str = match row.pattern {
        Pattern::Sequential => "seq",
        Pattern::Random => "random",
    };
    let alloc_str = match row.alloc {
        Alloc::Demand => "demand",
        Alloc::Preallocate => "pre",
        Alloc::Pretruncate => "trunc",
    };

    let tbytes = row.result.total_bytes as f64;
    let tops = row.result.total_ops as f64;
    let secs = row.result.total_secs;

    let iops = tops / secs;
    let mbs = (tbytes / 1_000.0 / 1_000.0) / secs;
    let gbs = (tbytes / 1_000.0 / 1_000.0 / 1_000.0) / secs;
    let mibs = (tbytes / 1024.0 / 1024.0) / secs;
    let gibs = (tbytes / 1024.0 / 1024.0 / 1024.0) / secs;

    let line = format!(
        "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\n",
        row.id,
        row.volume,
        row.oper.as_str(),
        row.trial,
        row.target,
        row.time_limit_secs,
        row.reqsize,
        row.threads,
        row.dio,
        order_str,
        pattern_str,
        tbytes as u64,
        row.result.total_ops,
        secs,
        round_significant(iops, 4),
        round_significant(mbs, 4),
        round_significant(gbs, 4),
        round_significant(mibs, 4),
        round_significant(gibs, 4),
    );

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("failed to open result log '{}'", log_path.display()))?;
    file.write_all(line.as_bytes())
        .with_context(|| format!("failed to append result to '{}'", log_path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_significant_keeps_four_digits() {
        assert_eq!(round_significant(123456.789, 4), 123500.0);
        assert_eq!(round_significant(0.0123456, 4), 0.01235);
    }

    #[test]
    fn round_significant_handles_zero() {
        assert_eq!(round_significant(0.0, 4), 0.0);
    }

    #[test]
    fn append_result_writes_one_tsv_line() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let row = ResultRow {
            id: 0,
            volume: "/data",
            oper: Oper::Write,
            trial: 0,
            target: "ptarget",
            time_limit_secs: 30,
            reqsize: 65536,
            threads: 4,
            dio: false,
            order: Ordering::Loose,
            pattern: Pattern::Sequential,
            alloc: Alloc::Demand,
            result: TrialResult {
                total_bytes: 1_048_576,
                total_ops: 16,
                total_secs: 1.0,
            },
        };
        append_result(tmp.path(), &row).unwrap();
        let contents = std::fs::read_to_string(tmp.path()).unwrap();
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.contains("write"));
        assert!(contents.contains("loose"));
    }
}

//! Progress-line rendering and the restart-offset byte-count correction.
//!
//! The mover's own byte counters double-count the restart offset on
//! multi-source transfers (each source reports its own view of the
//! restarted range), so the raw sum of `current_byte()` across endpoints
//! needs correcting before it can be displayed as "bytes of this file
//! completed so far". [`corrected_completed_bytes`] implements that
//! correction exactly as observed empirically in the monitor loop; the
//! rest of this module formats the resulting number into a status line.

use std::time::Duration;

/// Correct the raw summed byte count across endpoints for the restart
/// offset double-counting described above.
///
/// `source_count` is the number of source endpoints participating in this
/// transfer (as opposed to sink endpoints).
pub fn corrected_completed_bytes(raw_completed_bytes: u64, restart_offset: u64, source_count: usize) -> u64 {
    let corrected = raw_completed_bytes.saturating_sub(restart_offset);
    if source_count > 1 {
        let initial = restart_offset.saturating_mul(source_count as u64);
        if corrected == initial {
            restart_offset
        } else {
            corrected.saturating_add(restart_offset)
        }
    } else {
        corrected
    }
}

/// A fully-rendered progress snapshot for a single file transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressLine {
    pub percent: f64,
    pub bandwidth_bytes_per_sec: f64,
    pub eta: Option<Duration>,
}

impl ProgressLine {
    /// Compute a progress snapshot the way `TransferManager.showProgress`
    /// does: `completed_bytes` is already the corrected byte count, the
    /// flow begins at `elapsed_since_start` before now, and `flow_size` is
    /// the total size of the file/shard being transferred.
    pub fn compute(completed_bytes: u64, flow_size: u64, elapsed_since_start: Duration) -> Self {
        if flow_size == 0 || elapsed_since_start.as_secs_f64() <= 0.0 {
            return Self {
                percent: 100.0,
                bandwidth_bytes_per_sec: 0.0,
                eta: Some(Duration::ZERO),
            };
        }
        let percent = (completed_bytes as f64 / flow_size as f64) * 100.0;
        let bandwidth = completed_bytes as f64 / elapsed_since_start.as_secs_f64();
        let eta = if bandwidth > 0.0 {
            let remaining = flow_size.saturating_sub(completed_bytes) as f64 / bandwidth;
            Some(Duration::from_secs_f64(remaining.max(0.0).round()))
        } else {
            None
        };
        Self {
            percent,
            bandwidth_bytes_per_sec: bandwidth,
            eta,
        }
    }

    /// Percentage rendered the way the original truncates its formatted
    /// float: rounded once it reaches 100%, otherwise truncated to either
    /// 4 or 3 characters depending on whether it's at least 10%.
    pub fn percent_str(&self) -> String {
        if self.percent >= 100.0 {
            format!("{}%", self.percent.round() as i64)
        } else {
            let formatted = format!("{:.10}", self.percent);
            let take = if self.percent >= 10.0 { 4 } else { 3 };
            format!("{}%", &formatted[..take.min(formatted.len())])
        }
    }

    /// Byte count + unit string, where the *unit* is chosen from the
    /// bandwidth's magnitude (not the byte count's), matching the
    /// original's slightly surprising behavior.
    pub fn bytes_str(&self, completed_bytes: u64) -> String {
        const GIB: f64 = 1024.0 * 1024.0 * 1024.0;
        const MIB: f64 = 1024.0 * 1024.0;
        const KIB: f64 = 1024.0;
        if self.bandwidth_bytes_per_sec > GIB {
            format!("{}GiB", completed_bytes / (1024 * 1024 * 1024))
        } else if self.bandwidth_bytes_per_sec > MIB {
            format!("{}MiB", completed_bytes / (1024 * 1024))
        } else if self.bandwidth_bytes_per_sec > KIB {
            format!("{}KiB", completed_bytes / 1024)
        } else {
            format!("{completed_bytes}B")
        }
    }

    pub fn bandwidth_str(&self) -> String {
        format!("{}MiB/s", (self.bandwidth_bytes_per_sec / 1024.0 / 1024.0).round() as i64)
    }

    pub fn eta_str(&self) -> String {
        match self.eta {
            Some(d) if d.is_zero() && self.percent >= 100.0 => "00:00:00".to_string(),
            Some(d) => format_hms(d),
            None => "--:--:--".to_string(),
        }
    }
}

fn format_hms(d: Duration) -> String {
    let total = d.as_secs();
    let h = total / 3600;
    let m = (total % 3600) / 60;
    let s = total % 60;
    format!("{h}:{m:02}:{s:02}")
}

/// Terminal width to wrap progress lines to: `stty size` when stderr (where
/// progress is rendered) is a TTY, `80` otherwise.
pub fn terminal_width() -> usize {
    if console::Term::stderr().features().is_attended() {
        if let Some((_, cols)) = console::Term::stderr().size_checked() {
            return cols as usize;
        }
    }
    80
}

/// Render a full status line: `<filename><padding><status>`, padded so the
/// whole line fills the terminal width when possible.
pub fn render_status_line(filename: &str, progress: &ProgressLine, completed_bytes: u64, width: usize) -> String {
    let status = format!(
        "{} {} {} {} ETA",
        progress.percent_str(),
        progress.bytes_str(completed_bytes),
        progress.bandwidth_str(),
        progress.eta_str(),
    );
    let pad_len = width.saturating_sub(status.len() + filename.len());
    format!("{filename}{}{status}", " ".repeat(pad_len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_source_correction_is_identity() {
        assert_eq!(corrected_completed_bytes(5_000, 1_000, 1), 4_000);
    }

    #[test]
    fn multi_source_still_at_initial_plateau() {
        // 2 sources, restart offset 100: raw sum still == 2*100 == 200
        assert_eq!(corrected_completed_bytes(200, 100, 2), 100);
    }

    #[test]
    fn multi_source_past_plateau_adds_back_offset() {
        // raw sum has grown past the plateau
        assert_eq!(corrected_completed_bytes(250, 100, 2), 250 - 100 + 100);
    }

    #[test]
    fn zero_size_flow_is_100_percent_with_zero_eta() {
        let p = ProgressLine::compute(0, 0, Duration::from_secs(5));
        assert_eq!(p.percent, 100.0);
        assert_eq!(p.eta_str(), "00:00:00");
    }

    #[test]
    fn percent_str_thresholds() {
        let p = ProgressLine {
            percent: 5.4321,
            bandwidth_bytes_per_sec: 0.0,
            eta: None,
        };
        assert_eq!(p.percent_str(), "5.4%");
        let p = ProgressLine {
            percent: 54.321,
            bandwidth_bytes_per_sec: 0.0,
            eta: None,
        };
        assert_eq!(p.percent_str(), "54.3%");
        let p = ProgressLine {
            percent: 100.4,
            bandwidth_bytes_per_sec: 0.0,
            eta: None,
        };
        assert_eq!(p.percent_str(), "100%");
    }

    #[test]
    fn bytes_unit_driven_by_bandwidth_not_byte_count() {
        // bandwidth implies MiB/s even though completed_bytes is tiny
        let p = ProgressLine {
            percent: 1.0,
            bandwidth_bytes_per_sec: 5.0 * 1024.0 * 1024.0,
            eta: None,
        };
        assert_eq!(p.bytes_str(10), "0MiB");
    }
}

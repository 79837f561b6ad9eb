//! `xddprof` - sweeps a storage volume across request sizes, queue depths,
//! direct-I/O settings, orderings, access patterns and allocation
//! strategies, driving the `xdd` mover directly (no orchestration across
//! hosts) and logging throughput to TSV files.
//!
//! Grounded on `original_source/.../xdd/profiler.py`'s `Profiler`: write
//! trials run before read trials for the same point in the sweep, and a
//! fixed settle delay separates every mover invocation.

mod personality;
mod report;
mod trial;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use personality::{registry, ProfileParameters};
use report::{append_result, write_header, Oper, ResultRow};
use trial::{build_args, parse_result, run, write_random_seek_list, TrialConfig};

/// Settle delay between trials, matching the original's `time.sleep(5)`
/// between every write and read invocation.
const TRIAL_SETTLE_DELAY: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(
    name = "xddprof",
    version,
    about = "Benchmark a storage volume across a sweep of xdd mover parameters",
    long_about = "`xddprof` runs the `xdd` mover across a cross-product of request sizes, queue depths, direct-I/O settings, orderings, access patterns and allocation strategies, logging throughput results to TSV files.

EXAMPLES:
    # Run the default sweep against one volume
    xddprof --volume /mnt/data --logdir /tmp/xddprof-results

    # Run a narrower, faster sweep
    xddprof --personality testing --trials 1 --time-limit 10 --volume /mnt/data --logdir /tmp/results"
)]
struct Args {
    /// Named sweep to run
    #[arg(long, default_value = "default", value_name = "NAME")]
    personality: String,

    /// Volume path(s) to stripe the target file across (repeat for multiple volumes)
    #[arg(long = "volume", value_name = "PATH", required = true)]
    volumes: Vec<String>,

    /// Directory to write result TSV files and per-trial mover logs into
    #[arg(long, value_name = "DIR")]
    logdir: PathBuf,

    /// Number of trials to repeat at each sweep point
    #[arg(long, default_value = "1", value_name = "N")]
    trials: u32,

    /// Per-trial time limit in seconds passed to the mover's -timelimit
    #[arg(long = "time-limit", default_value = "30", value_name = "SECONDS")]
    time_limit_secs: u64,

    /// Path to the xdd mover executable
    #[arg(long = "mover-path", default_value = "xdd", value_name = "PATH")]
    mover_path: String,

    /// Keep the target data files on disk after the sweep completes
    #[arg(long)]
    keep_files: bool,

    /// Verbose level: -v INFO / -vv DEBUG / -vvv TRACE (default: ERROR)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::ERROR,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

#[allow(clippy::too_many_arguments)]
async fn run_one_trial(
    cfg: &TrialConfig,
    logdir: &std::path::Path,
    target_base: &str,
    is_write: bool,
    read_sizes: &[u64],
) -> anyhow::Result<trial::TrialResult> {
    let suffix = if is_write { "write" } else { "read" };
    let log_path = logdir.join(format!("{target_base}-{suffix}.log"));

    if cfg.pattern == personality::Pattern::Random {
        let srange = if is_write {
            cfg.nbytes.unwrap_or(0) / cfg.reqsize.max(1)
        } else {
            read_sizes.iter().copied().min().unwrap_or(0) / cfg.reqsize.max(1)
        };
        let seek_path = logdir.join(if is_write { "wseek" } else { "rseek" });
        write_random_seek_list(&seek_path, srange)?;
    }

    let args = build_args(cfg, is_write, read_sizes, log_path.to_str().unwrap_or_default());
    let output = run(cfg, &args).await?;
    if !output.status.success() {
        tracing::warn!(
            rc = output.status.code(),
            stdout = %String::from_utf8_lossy(&output.stdout),
            stderr = %String::from_utf8_lossy(&output.stderr),
            "mover exited non-zero during trial"
        );
    }

    let log_contents = tokio::fs::read_to_string(&log_path)
        .await
        .with_context(|| format!("failed to read trial log '{}'", log_path.display()))?;
    parse_result(&log_contents)
}

async fn run_sweep(args: &Args, params: &ProfileParameters) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(&args.logdir)
        .await
        .with_context(|| format!("failed to create log directory '{}'", args.logdir.display()))?;

    let write_log = args.logdir.join("writeperf.dat");
    let read_log = args.logdir.join("readperf.dat");
    write_header(&write_log)?;
    write_header(&read_log)?;

    let mut write_id = 0u64;
    let mut read_id = 0u64;
    let volume = args.volumes.first().cloned().unwrap_or_default();

    for &reqsize in &params.reqsizes {
        for &qdepth in &params.queue_depths {
            for &dio in &params.dios {
                for &order in &params.orders {
                    for &pattern in &params.patterns {
                        for &alloc in &params.allocs {
                            for trial in 0..args.trials {
                                let target_base =
                                    format!("ptarget-{reqsize}-{qdepth}-{dio}-{order:?}-{pattern:?}-{trial}");
                                let cfg = TrialConfig {
                                    volumes: args.volumes.clone(),
                                    target_name: format!("{target_base}.dat"),
                                    reqsize,
                                    queue_depth: qdepth,
                                    dio,
                                    offset: 0,
                                    order,
                                    pattern,
                                    alloc,
                                    time_limit_secs: args.time_limit_secs,
                                    mover_path: args.mover_path.clone(),
                                    nbytes: None,
                                };

                                tokio::time::sleep(TRIAL_SETTLE_DELAY).await;
                                let write_result =
                                    run_one_trial(&cfg, &args.logdir, &target_base, true, &[]).await?;
                                append_result(
                                    &write_log,
                                    &ResultRow {
                                        id: write_id,
                                        volume: &volume,
                                        oper: Oper::Write,
                                        trial,
                                        target: "ptarget",
                                        time_limit_secs: args.time_limit_secs,
                                        reqsize,
                                        threads: qdepth,
                                        dio,
                                        order,
                                        pattern,
                                        alloc,
                                        result: write_result,
                                    },
                                )?;
                                write_id += 1;

                                let target_sizes: Vec<u64> = cfg
                                    .target_paths()
                                    .iter()
                                    .filter_map(|p| std::fs::metadata(p).ok().map(|m| m.len()))
                                    .collect();

                                tokio::time::sleep(TRIAL_SETTLE_DELAY).await;
                                let read_result =
                                    run_one_trial(&cfg, &args.logdir, &target_base, false, &target_sizes).await?;
                                append_result(
                                    &read_log,
                                    &ResultRow {
                                        id: read_id,
                                        volume: &volume,
                                        oper: Oper::Read,
                                        trial,
                                        target: "ptarget",
                                        time_limit_secs: args.time_limit_secs,
                                        reqsize,
                                        threads: qdepth,
                                        dio,
                                        order,
                                        pattern,
                                        alloc,
                                        result: read_result,
                                    },
                                )?;
                                read_id += 1;

                                if !params.keep_files && !args.keep_files {
                                    for target in cfg.target_paths() {
                                        let _ = std::fs::remove_file(target);
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    println!("write results logged to {}", write_log.display());
    println!("read results logged to {}", read_log.display());
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let personalities = registry();
    let params = personalities
        .get(&args.personality)
        .with_context(|| format!("unknown personality '{}'; available: {:?}", args.personality, personalities.keys().collect::<Vec<_>>()))?;

    tracing::info!(sweep_points = params.sweep_size(), trials = args.trials, "starting sweep");

    if let Err(e) = run_sweep(&args, params).await {
        tracing::error!("{:#}", e);
        std::process::exit(1);
    }
    Ok(())
}

//! `xddmcp` - command-line entry point for the multi-host parallel
//! file-copy orchestrator.

use std::sync::atomic::Ordering as AtomicOrdering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::Parser;
use common::config::{OutputConfig, RetryConfig, SideConfig};
use common::spec::{parse_spec, partition_threads, HostSpec};
use xddmcp::factory::{AgentOptions, EndpointFactory, HostDescriptor};
use xddmcp::transfer_manager::{NullProgressSink, ProgressSink, TransferManager, TransferSummary};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "xddmcp",
    version,
    about = "Move a file or directory tree between hosts at aggregate bandwidth no single stream could reach",
    long_about = "`xddmcp` drives one or more copies of the `xdd` mover across source and sink hosts to move data in parallel over multiple network interfaces.

Spec strings take the form [[user@]host[,host]:]path - a bare path is local, a `host:path` or `host1,host2:path` prefix selects one or more remote hosts reached over SSH. The destination spec accepts exactly one host: xddmcp moves data to a single sink host per invocation.

EXAMPLES:
    # Local to remote, 8 parallel streams
    xddmcp -t 8 /data/set host1:/data/set

    # Remote to remote, striped across two source hosts
    xddmcp -t 16 hostA,hostB:/data/set sink:/data/set

    # Resume an interrupted transfer
    xddmcp -a /data/set host1:/data/set"
)]
struct Args {
    // Copy options
    /// Resume a previously interrupted transfer
    #[arg(short = 'a', long = "resume", help_heading = "Copy options")]
    resume: bool,

    /// Request size in KiB passed to the mover as the I/O granule
    #[arg(
        short = 'b',
        long = "request-size",
        default_value = "8192",
        value_name = "KIB",
        help_heading = "Copy options"
    )]
    request_size_kib: u64,

    /// Apply O_DIRECT on the source (s), the sink (d), or both (b)
    #[arg(
        short = 'd',
        long = "direct-io",
        value_name = "s|d|b",
        help_heading = "Copy options"
    )]
    direct_io: Option<Side>,

    /// Force strictly serial ordering on the source (s), the sink (d), or both (b)
    #[arg(
        short = 'o',
        long = "ordering",
        value_name = "s|d|b",
        help_heading = "Copy options"
    )]
    ordering: Option<Side>,

    /// Recursive copy (directories are always copied recursively; flag kept for familiarity with cp)
    #[arg(short = 'r', long = "recursive", help_heading = "Copy options")]
    recursive: bool,

    /// Rewrite absolute symlink targets that point inside the source tree to point inside the destination tree
    #[arg(long = "rewrite-absolute-links", help_heading = "Copy options")]
    rewrite_absolute_links: bool,

    /// Override the computed transfer size for every file, in bytes
    #[arg(short = 's', long = "transfer-size", value_name = "BYTES", help_heading = "Copy options")]
    transfer_size: Option<u64>,

    // Progress & output
    /// Force progress rendering even when stderr is not a terminal
    #[arg(long = "progress", help_heading = "Progress & output")]
    progress: bool,

    /// Print a final summary (bytes moved, elapsed, throughput, failures)
    #[arg(long = "summary", help_heading = "Progress & output")]
    summary: bool,

    /// Verbose level: -v INFO / -vv DEBUG / -vvv TRACE (default: ERROR)
    ///
    /// -v and above also turn on the mover's own verbose execute-string logging on both
    /// sides; -vv and above additionally timestamp every logged mover operation.
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, help_heading = "Progress & output")]
    verbose: u8,

    /// Quiet mode, don't report errors
    #[arg(short = 'q', long = "quiet", help_heading = "Progress & output")]
    quiet: bool,

    // Performance & throttling
    /// Total number of parallel streams, divided evenly across hosts on each side
    #[arg(short = 't', long = "threads", default_value = "8", value_name = "N", help_heading = "Performance & throttling")]
    threads: u32,

    // Advanced settings
    /// Number of retry attempts after a transfer failure
    #[arg(short = 'n', long = "retries", default_value = "0", value_name = "N", help_heading = "Advanced settings")]
    retries: u32,

    /// First TCP port the mover listens on; subsequent interfaces on the same host use consecutive ports
    #[arg(short = 'p', long = "port", default_value = "40010", value_name = "PORT", help_heading = "Advanced settings")]
    port: u16,

    /// Path to the `xdd` mover executable, searched via PATH if not absolute
    #[arg(long = "mover-path", default_value = "xdd", value_name = "PATH", help_heading = "Advanced settings")]
    mover_path: String,

    // Remote copy options
    /// Automatically deploy the xddmcp-agent binary to remote hosts if missing or version mismatched
    #[arg(long = "auto-deploy-agent", help_heading = "Remote copy options")]
    auto_deploy_agent: bool,

    /// Path to the xddmcp-agent binary on remote hosts
    #[arg(long = "agent-path", value_name = "PATH", help_heading = "Remote copy options")]
    agent_path: Option<String>,

    /// Print protocol version information as JSON and exit
    #[arg(long = "protocol-version", help_heading = "Remote copy options")]
    protocol_version: bool,

    // ARGUMENTS
    /// Source spec: [[user@]host[,host]:]path
    #[arg()]
    source: String,

    /// Destination spec: [[user@]host[,host]:]path
    #[arg()]
    dest: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum Side {
    #[value(name = "s")]
    Source,
    #[value(name = "d")]
    Sink,
    #[value(name = "b")]
    Both,
}

impl Side {
    fn applies_to_source(self) -> bool {
        matches!(self, Side::Source | Side::Both)
    }

    fn applies_to_sink(self) -> bool {
        matches!(self, Side::Sink | Side::Both)
    }
}

fn host_descriptors(
    parsed_hosts: &[HostSpec],
    first_port: u16,
    total_threads: u32,
) -> Vec<HostDescriptor> {
    if parsed_hosts.is_empty() {
        return vec![HostDescriptor {
            user: None,
            host: "localhost".to_string(),
            threads: total_threads.max(1),
            ifaces: Vec::new(),
            port: first_port,
        }];
    }
    let per_host_threads = partition_threads(total_threads, parsed_hosts.len() as u32);
    parsed_hosts
        .iter()
        .zip(per_host_threads)
        .map(|(h, threads)| HostDescriptor {
            user: h.user.clone(),
            host: h.host.clone(),
            threads: threads.max(1),
            ifaces: Vec::new(),
            port: first_port,
        })
        .collect()
}

struct CliProgressSink {
    bar: Option<indicatif::ProgressBar>,
}

impl CliProgressSink {
    fn new(enabled: bool) -> Self {
        if !enabled {
            return Self { bar: None };
        }
        let bar = indicatif::ProgressBar::new(100);
        bar.set_style(
            indicatif::ProgressStyle::with_template("{msg}")
                .unwrap_or_else(|_| indicatif::ProgressStyle::default_bar()),
        );
        Self { bar: Some(bar) }
    }
}

impl ProgressSink for CliProgressSink {
    fn update(&self, _filename: &str, line: &str) {
        match &self.bar {
            Some(bar) => bar.set_message(line.to_string()),
            None => eprint!("\r{line}"),
        }
    }

    fn finish(&self, _filename: &str, line: &str) {
        match &self.bar {
            Some(bar) => bar.finish_with_message(line.to_string()),
            None => eprintln!("\r{line}"),
        }
    }
}

fn build_factory(args: &Args, source_hosts: &[HostSpec], sink_hosts: &[HostSpec]) -> EndpointFactory {
    let request_size = args.request_size_kib * 1024;
    let source_side_dio = args.direct_io.is_some_and(Side::applies_to_source);
    let sink_side_dio = args.direct_io.is_some_and(Side::applies_to_sink);
    let source_serial = args.ordering.is_some_and(Side::applies_to_source);
    let sink_serial = args.ordering.is_some_and(Side::applies_to_sink);

    let source_side = SideConfig {
        direct_io: source_side_dio,
        serial_ordering: source_serial,
        verbose: args.verbose >= 1,
        timestamp: args.verbose >= 2,
    };
    let sink_side = SideConfig {
        direct_io: sink_side_dio,
        serial_ordering: sink_serial,
        verbose: args.verbose >= 1,
        timestamp: args.verbose >= 2,
    };

    let sources = host_descriptors(source_hosts, args.port, args.threads);
    let sinks = host_descriptors(sink_hosts, args.port, args.threads);

    EndpointFactory::new(
        request_size,
        source_side,
        args.mover_path.clone(),
        sources,
        sink_side,
        args.mover_path.clone(),
        sinks,
        AgentOptions {
            explicit_path: args.agent_path.clone(),
            auto_deploy: args.auto_deploy_agent,
        },
    )
}

async fn run_once(
    args: &Args,
    source_hosts: &[HostSpec],
    sink_hosts: &[HostSpec],
    source_path: &str,
    sink_path: &str,
) -> anyhow::Result<TransferSummary> {
    let factory = build_factory(args, source_hosts, sink_hosts);
    let output = OutputConfig {
        quiet: args.quiet,
        verbose: args.verbose,
        print_summary: args.summary,
    };
    let progress_enabled = !args.quiet && (args.progress || console::Term::stderr().features().is_attended());
    let progress: Arc<dyn ProgressSink> = if args.quiet {
        Arc::new(NullProgressSink)
    } else {
        Arc::new(CliProgressSink::new(progress_enabled))
    };
    let manager = TransferManager::new(
        factory,
        output,
        Duration::from_secs(1),
        args.resume,
        args.rewrite_absolute_links,
        progress,
    );
    let cancelled = manager.cancel_handle();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancelled.store(true, AtomicOrdering::Relaxed);
        }
    });
    let result = manager.run(source_path, sink_path).await;
    ctrl_c.abort();
    result
}

async fn async_main(args: Args) -> anyhow::Result<()> {
    let source_spec = parse_spec(&args.source).with_context(|| format!("invalid source spec '{}'", args.source))?;
    let sink_spec = parse_spec(&args.dest).with_context(|| format!("invalid destination spec '{}'", args.dest))?;
    if sink_spec.hosts.len() > 1 {
        return Err(common::error::SpecError::MultipleDestinationHosts(sink_spec.hosts.len()).into());
    }

    let retry = RetryConfig {
        retries: args.retries,
        backoff: Duration::from_secs(5),
    };

    let mut attempt = 0;
    loop {
        match run_once(
            &args,
            &source_spec.hosts,
            &sink_spec.hosts,
            &source_spec.path,
            &sink_spec.path,
        )
        .await
        {
            Ok(summary) => {
                if args.summary {
                    println!(
                        "dirs={} files={} skipped={} symlinks={} bytes={} failures={}",
                        summary.dirs_created,
                        summary.files_transferred,
                        summary.files_skipped,
                        summary.symlinks_created,
                        summary.bytes_transferred,
                        summary.failures,
                    );
                }
                return Ok(());
            }
            Err(e) if attempt < retry.retries => {
                attempt += 1;
                tracing::warn!(attempt, retries = retry.retries, "transfer failed, retrying: {:#}", e);
                tokio::time::sleep(retry.backoff).await;
            }
            Err(e) => return Err(e.context("transfer failed after exhausting retries")),
        }
    }
}

fn main() -> anyhow::Result<()> {
    // handle --protocol-version before full argument parsing so it works
    // without the required SOURCE/DEST positionals.
    let raw_args: Vec<String> = std::env::args().collect();
    let separator_pos = raw_args.iter().position(|a| a == "--");
    let args_to_check = match separator_pos {
        Some(pos) => &raw_args[..pos],
        None => &raw_args[..],
    };
    if args_to_check.iter().any(|a| a == "--protocol-version") {
        let version = common::version::ProtocolVersion::current();
        println!("{}", version.to_json()?);
        return Ok(());
    }

    let args = Args::parse();
    let output = OutputConfig {
        quiet: args.quiet,
        verbose: args.verbose,
        print_summary: args.summary,
    };
    common::logging::init(&output);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| anyhow!("failed to start tokio runtime: {e}"))?;

    match runtime.block_on(async_main(args)) {
        Ok(()) => Ok(()),
        Err(e) => {
            tracing::error!("{:#}", e);
            let exit_code = if e.downcast_ref::<common::error::SpecError>().is_some() {
                1
            } else {
                2
            };
            std::process::exit(exit_code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_descriptors_defaults_to_localhost_with_all_threads() {
        let hosts = host_descriptors(&[], 40010, 8);
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].host, "localhost");
        assert_eq!(hosts[0].threads, 8);
    }

    #[test]
    fn host_descriptors_splits_threads_across_hosts() {
        let parsed = vec![
            HostSpec { user: None, host: "a".to_string() },
            HostSpec { user: None, host: "b".to_string() },
        ];
        let hosts = host_descriptors(&parsed, 40010, 9);
        assert_eq!(hosts[0].threads, 5);
        assert_eq!(hosts[1].threads, 4);
    }

    #[test]
    fn side_both_applies_to_source_and_sink() {
        assert!(Side::Both.applies_to_source());
        assert!(Side::Both.applies_to_sink());
        assert!(Side::Source.applies_to_source());
        assert!(!Side::Source.applies_to_sink());
    }
}

//! `xddmcp-agent` - the binary `xddmcp` launches over SSH on every remote
//! source or sink host.
//!
//! Hosts a single [`common::flow_builder::LocalFlowBuilder`] behind the
//! newline-delimited RPC server (`common::rpc::serve`), announces its
//! listening port on stdout bracketed by [`common::rpc::AGENT_URI_DELIMITER`],
//! and exits on its own once orphaned (its parent `xddmcp` process died
//! without sending `shutdown`) — grounded on
//! `original_source/.../xdd/server.py`'s `rpc_server`/`ppidCheck`.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use common::flow_builder::LocalFlowBuilder;

/// How often the watchdog checks whether it has been orphaned, matching
/// the polling interval `ppidCheck` uses.
const PPID_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "xddmcp-agent", version, about = "Remote FlowBuilder endpoint launched by xddmcp over SSH")]
struct Args {
    /// Print protocol version information as JSON and exit
    #[arg(long = "protocol-version")]
    protocol_version: bool,

    /// Verbose level: -v INFO / -vv DEBUG / -vvv TRACE (default: ERROR)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Spawns a background task that exits the process once the parent that
/// launched this agent has died (ppid becomes 1, i.e. reparented to init).
fn spawn_ppid_watchdog() {
    tokio::spawn(async {
        loop {
            tokio::time::sleep(PPID_POLL_INTERVAL).await;
            // SAFETY: getppid() takes no arguments and cannot fail.
            if unsafe { libc::getppid() } == 1 {
                tracing::warn!("parent process is gone, shutting down orphaned agent");
                std::process::exit(0);
            }
        }
    });
}

async fn run_server(listener: tokio::net::TcpListener) -> anyhow::Result<()> {
    let builder = LocalFlowBuilder::shared();
    loop {
        let (stream, peer) = listener.accept().await.context("failed to accept RPC connection")?;
        let builder = builder.clone();
        tokio::spawn(async move {
            let (read_half, write_half) = stream.into_split();
            if let Err(e) = common::rpc::serve(builder.as_ref(), read_half, write_half).await {
                tracing::debug!(?peer, "RPC session ended: {:#}", e);
            }
        });
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.protocol_version {
        let version = common::version::ProtocolVersion::current();
        println!("{}", version.to_json()?);
        return Ok(());
    }

    let output = common::config::OutputConfig {
        quiet: false,
        verbose: args.verbose,
        print_summary: false,
    };
    common::logging::init(&output);

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0))
        .await
        .context("failed to bind agent listener")?;
    let port = listener.local_addr()?.port();
    let hostname = tokio::process::Command::new("hostname")
        .output()
        .await
        .ok()
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "localhost".to_string());
    let uri = format!("xddmcp:agent@{hostname}:{port}");

    let mut stdout = std::io::stdout();
    writeln!(stdout, "{}", common::rpc::AGENT_URI_DELIMITER)?;
    stdout.flush()?;
    writeln!(stdout, "{uri}")?;
    stdout.flush()?;
    writeln!(stdout, "{}", common::rpc::AGENT_URI_DELIMITER)?;
    stdout.flush()?;

    spawn_ppid_watchdog();

    run_server(listener).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn announced_uri_round_trips_through_port_parsing() {
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let uri = format!("xddmcp:agent@somehost:{port}");
        let parsed_port: u16 = uri.rsplit(':').next().unwrap().parse().unwrap();
        assert_eq!(parsed_port, port);
    }

    #[test]
    fn ppid_poll_interval_matches_watchdog_cadence() {
        assert_eq!(PPID_POLL_INTERVAL, Duration::from_secs(5));
    }

    #[test]
    fn getppid_is_nonzero_in_test_process() {
        assert!(unsafe { libc::getppid() } > 0);
    }
}

//! Shared data types threaded between the orchestrator, the remote-agent
//! RPC wire format and the mover command-line assembly: shard identity,
//! per-interface tuples, and the per-side flow configuration.

use serde::{Deserialize, Serialize};

/// Which side of a transfer a shard belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShardRole {
    Source,
    Sink,
}

impl ShardRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShardRole::Source => "source",
            ShardRole::Sink => "sink",
        }
    }
}

/// Stable identity of a shard, matched by `index` between the source-side
/// and sink-side `Flow` for the same file transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardIdentity {
    pub role: ShardRole,
    pub index: u64,
    pub total: u64,
}

/// One `-e2e dest host:port,threads[,numa]` interface tuple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Iface {
    pub host: String,
    pub port: u16,
    pub threads: u32,
    pub numa: Option<u32>,
}

impl Iface {
    /// Render as the mover expects it: `host:port,threads[,numa]`.
    pub fn to_arg(&self) -> String {
        match self.numa {
            Some(n) => format!("{}:{},{},{}", self.host, self.port, self.threads, n),
            None => format!("{}:{},{}", self.host, self.port, self.threads),
        }
    }
}

/// Ordering mode applied to one side of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Ordering {
    /// `-serialordering` (sink only).
    Serial,
    /// `-noordering` (sink only).
    #[default]
    None,
    /// `-looseordering` (source default).
    Loose,
}

/// Flags uniform across every shard on one side (source or sink) of a
/// transfer, per the §9 "side-local flags" design note: these are set once
/// on the side's `SideConfig` rather than threaded per-shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SideFlags {
    pub direct_io: bool,
    pub ordering: Ordering,
    pub verbose: bool,
    pub timestamp: bool,
}

/// Everything `Flow::start` needs to assemble the mover command line and
/// spawn the child, as sent over the RPC boundary by `build_flow`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildFlowRequest {
    pub identity: ShardIdentity,
    /// Request size in bytes (the `-b`/granule value, same as the
    /// partitioner's `granule` input).
    pub req_size: u64,
    pub ifaces: Vec<Iface>,
    pub flags: SideFlags,
    /// Path to the mover executable on this host.
    pub mover_path: String,
}

/// Per-file parameters passed to `Flow::start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartFlowRequest {
    pub target: String,
    pub total_size: u64,
    pub restart: bool,
    pub restart_offset: u64,
    /// For sinks only: path to the restart cookie to pass to the mover.
    pub restart_cookie_path: Option<String>,
    /// True when there is exactly one source endpoint (controls whether
    /// the sink uses `-restart offset` vs `-startoffset`, per §4.3).
    pub single_source: bool,
}

//! Error taxonomy shared across the orchestrator, transport and agent
//! crates. Each variant here maps to an error kind whose surface is
//! converted to a plain `String` reason before it crosses the RPC boundary
//! (see `flow::FlowResult`) — these types exist to structure *local*
//! error handling and exit-code selection in the CLI.

use thiserror::Error;

/// Errors parsing a `[user@]host[,host...]:path` transfer spec string.
#[derive(Debug, Error)]
pub enum SpecError {
    #[error("spec '{0}' must contain exactly one ':' separating host list from path")]
    MalformedSpec(String),
    #[error("spec '{0}' has an empty host list")]
    EmptyHostList(String),
    #[error("spec '{0}' has an empty path")]
    EmptyPath(String),
    #[error("host entry '{0}' is empty")]
    EmptyHostEntry(String),
    #[error("only one destination host is allowed, got {0}")]
    MultipleDestinationHosts(usize),
}

/// Errors resolving a hostname/host-spec to a usable address.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("failed to resolve host '{host}': {source}")]
    Dns {
        host: String,
        #[source]
        source: std::io::Error,
    },
    #[error("host '{0}' resolved to no addresses")]
    NoAddresses(String),
}

/// Errors bringing up the SSH session and RPC tunnel to a remote host.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to establish SSH session to '{host}': {source}")]
    SshConnect {
        host: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("remote agent exited before reporting an RPC endpoint (host '{host}')\nstdout:\n{stdout}\nstderr:\n{stderr}")]
    AgentExitedEarly {
        host: String,
        stdout: String,
        stderr: String,
    },
    #[error("remote agent on '{host}' reported a malformed RPC endpoint URI: '{uri}'")]
    MalformedEndpointUri { host: String, uri: String },
    #[error("failed to establish local port forward to '{host}': {source}")]
    PortForward {
        host: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Errors constructing an endpoint (local or remote `FlowBuilder` proxy).
#[derive(Debug, Error)]
pub enum EndpointCreationError {
    #[error("failed to start transport to host '{0}'")]
    TransportFailed(String, #[source] TransportError),
    #[error("endpoint for host '{0}' failed readiness check")]
    NotReady(String),
}

/// Errors from a protocol version mismatch between orchestrator and agent
/// (or between mover processes on either end of a flow).
#[derive(Debug, Error)]
#[error("protocol version mismatch: local={local} remote={remote}")]
pub struct ProtocolMismatchError {
    pub local: String,
    pub remote: String,
}

/// Errors from a flow's preflight precondition checks (file type checks,
/// dio/restart compatibility, restart offset vs. file size).
#[derive(Debug, Error)]
pub enum PreconditionError {
    #[error("sink path '{0}' is a character device and cannot be used with restart")]
    RestartOnCharDevice(String),
    #[error("direct I/O is not supported on special file '{0}'")]
    DirectIoOnSpecialFile(String),
    #[error("restart offset {offset} is larger than destination file size {size}")]
    RestartOffsetTooLarge { offset: u64, size: u64 },
}

/// Errors surfaced by a running (or failed-to-start) flow.
#[derive(Debug, Error)]
pub enum RuntimeFlowError {
    #[error("failed to spawn mover process: {0}")]
    SpawnFailed(#[source] std::io::Error),
    #[error("mover process for '{path}' exited with status {status}")]
    NonZeroExit { path: String, status: i32 },
    #[error("mover process for '{0}' produced no heartbeat before timing out")]
    HeartbeatTimeout(String),
}

/// Errors reading or validating a restart cookie file.
#[derive(Debug, Error)]
pub enum CorruptRestartError {
    #[error("corrupt restart cookie '{path}': {reason}")]
    Corrupt { path: String, reason: String },
    #[error("restart offset larger than destination file")]
    OffsetLargerThanDestination,
}

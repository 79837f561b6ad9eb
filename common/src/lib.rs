//! Shared data model and algorithms for the `xddmcp` multi-host copy orchestrator.
//!
//! This crate holds everything that is pure host-local logic and therefore
//! shared between the orchestrator (`xddmcp`), the remote agent
//! (`xddmcp-agent`) and the benchmarking tool (`xddprof`):
//!
//! - [`partition`] — aligned byte-range partitioning of a file across shards
//! - [`namer`] — POSIX-`cp`-equivalent recursive directory walk/naming
//! - [`cookie`] — restart cookie and progress marker file formats
//! - [`progress`] — progress line rendering and byte/ETA arithmetic
//! - [`spec`] — `[user@]host[,host...]:path` transfer spec string grammar
//! - [`version`] — protocol version negotiation between orchestrator and agent
//! - [`config`] — plain configuration structs threaded through the CLI
//! - [`error`] — the error taxonomy shared across crates
//! - [`logging`] — `tracing` subscriber initialization
//! - [`model`] — wire types shared by the `FlowBuilder` RPC boundary
//! - [`flow`] — mover child-process supervisor
//! - [`flow_builder`] — the `FlowBuilder` trait and its local implementation
//! - [`rpc`] — newline-delimited JSON-RPC framing used to reach a remote agent

pub mod config;
pub mod cookie;
pub mod error;
pub mod flow;
pub mod flow_builder;
pub mod logging;
pub mod model;
pub mod namer;
pub mod partition;
pub mod progress;
pub mod rpc;
pub mod spec;
pub mod version;

//! `xddmcp` - multi-host parallel file-copy orchestrator
//!
//! Coordinates one or more source hosts and one or more sink hosts, each
//! running a copy of the `xdd` mover, to move a file or directory tree
//! between them at aggregate bandwidth no single TCP stream could reach.
//!
//! ## Architecture
//!
//! - [`factory`] builds one [`common::flow_builder::FlowBuilder`] endpoint
//!   per host (local in-process, or tunneled over SSH via
//!   `xddmcp-remote::Transport`) and configures each with its shard of the
//!   transfer.
//! - [`transfer_manager`] walks the source tree, starts and monitors one
//!   file transfer at a time across every endpoint, and renders progress.
//! - `common::flow` and `common::flow_builder` (shared with `xddmcp-agent`
//!   so a remote endpoint can host the same local implementation behind
//!   an RPC server) assemble and supervise the actual `xdd` mover
//!   subprocess.
//!
//! ## Restart
//!
//! A transfer interrupted partway through can be resumed with `-a`: each
//! destination file tracks its own restart cookie (the byte offset the
//! mover had reached) and the sink directory keeps a progress marker file
//! listing every path already finished, so a resumed run skips completed
//! files and restarts partial ones from their last confirmed offset.
pub mod factory;
pub mod transfer_manager;

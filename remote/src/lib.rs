//! SSH session management, remote agent deployment, and RPC tunneling.
//!
//! [`Transport`] is the only entry point most callers need: given a host
//! to reach, it opens an SSH session, launches (and if necessary deploys)
//! `xddmcp-agent` on the far side, discovers the agent's RPC endpoint URI
//! from its standard output, and tunnels a local TCP connection to it so
//! that the returned [`common::flow_builder::FlowBuilder`] behaves exactly
//! like a local one to its caller.

use std::sync::Arc;

use anyhow::Context;
use common::flow_builder::FlowBuilder;
use common::model::{BuildFlowRequest, StartFlowRequest};
use common::namer::Walk;
use common::rpc::{self, IdGen, RpcRequest};
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::instrument;

pub mod deploy;

/// Destination and authentication parameters for one remote host.
#[derive(Debug, Clone)]
pub struct SshSession {
    pub user: Option<String>,
    pub host: String,
    pub port: Option<u16>,
}

impl SshSession {
    pub fn local() -> Self {
        Self {
            user: None,
            host: "localhost".to_string(),
            port: None,
        }
    }
}

async fn setup_ssh_session(session: &SshSession) -> anyhow::Result<Arc<openssh::Session>> {
    let host = session.host.as_str();
    let destination = match (session.user.as_deref(), session.port) {
        (Some(user), Some(port)) => format!("ssh://{user}@{host}:{port}"),
        (None, Some(port)) => format!("ssh://{}:{}", session.host, port),
        (Some(user), None) => format!("ssh://{user}@{host}"),
        (None, None) => format!("ssh://{host}"),
    };
    tracing::debug!("Connecting to SSH destination: {}", destination);
    // `openssh` shells out to the system `ssh` client, which already
    // implements host-based-key-then-password authentication itself when
    // attached to an interactive terminal (falling back to a password
    // prompt when host-based/key auth fails) and honors `ServerAliveInterval`
    // from the user's ssh config, so there is no separate auth fallback or
    // keepalive knob to drive here.
    let session = Arc::new(
        openssh::Session::connect(destination, openssh::KnownHosts::Accept)
            .await
            .context("failed to establish SSH connection")?,
    );
    Ok(session)
}

/// Escape a string for safe use in POSIX shell single quotes.
pub(crate) fn shell_escape(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Validate and retrieve `$HOME` on the remote host.
pub(crate) async fn get_remote_home(session: &Arc<openssh::Session>) -> anyhow::Result<String> {
    let output = session
        .command("sh")
        .arg("-c")
        .arg("echo \"${HOME:?HOME not set}\"")
        .output()
        .await
        .context("failed to check HOME environment variable on remote host")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!(
            "HOME environment variable is not set on remote host\n\
            \n\
            stderr: {}\n\
            \n\
            The HOME environment variable is required for xddmcp-agent deployment and discovery.\n\
            Please ensure your SSH configuration preserves environment variables.",
            stderr
        );
    }

    let home = String::from_utf8_lossy(&output.stdout).trim().to_string();

    if home.is_empty() {
        anyhow::bail!(
            "HOME environment variable is empty on remote host\n\
            \n\
            The HOME environment variable is required for xddmcp-agent deployment and discovery.\n\
            Please ensure your SSH configuration sets HOME correctly."
        );
    }

    Ok(home)
}

/// Discover `xddmcp-agent` on the remote host.
///
/// Searches in the following order: explicit path, the deployed cache
/// directory, the same directory as the local `xddmcp` binary, then
/// `PATH`.
async fn discover_agent_path(
    session: &Arc<openssh::Session>,
    explicit_path: Option<&str>,
) -> anyhow::Result<String> {
    let local_version = common::version::ProtocolVersion::current();

    if let Some(path) = explicit_path {
        tracing::debug!("Trying explicit agent path: {}", path);
        let output = session
            .command("sh")
            .arg("-c")
            .arg(format!("test -x {}", shell_escape(path)))
            .output()
            .await?;
        if output.status.success() {
            tracing::info!("Found xddmcp-agent at explicit path: {}", path);
            return Ok(path.to_string());
        }
        return Err(anyhow::anyhow!(
            "xddmcp-agent binary not found or not executable at explicit path: {}",
            path
        ));
    }

    let cache_path = if let Ok(home) = get_remote_home(session).await {
        let path = format!(
            "{}/.cache/xddmcp/bin/xddmcp-agent-{}",
            home, local_version.semantic
        );
        tracing::debug!("Trying deployed cache path: {}", path);
        let output = session
            .command("sh")
            .arg("-c")
            .arg(format!("test -x {}", shell_escape(&path)))
            .output()
            .await?;
        if output.status.success() {
            tracing::info!("Found xddmcp-agent in deployed cache: {}", path);
            return Ok(path);
        }
        Some(path)
    } else {
        tracing::debug!("HOME not set on remote host, skipping cache directory check");
        None
    };

    if let Ok(current_exe) = std::env::current_exe() {
        if let Some(bin_dir) = current_exe.parent() {
            let path = bin_dir.join("xddmcp-agent").display().to_string();
            tracing::debug!("Trying same directory as xddmcp: {}", path);
            let output = session
                .command("sh")
                .arg("-c")
                .arg(format!("test -x {}", shell_escape(&path)))
                .output()
                .await?;
            if output.status.success() {
                tracing::info!("Found xddmcp-agent in same directory as xddmcp: {}", path);
                return Ok(path);
            }
        }
    }

    tracing::debug!("Trying to find xddmcp-agent in PATH");
    let output = session.command("which").arg("xddmcp-agent").output().await?;
    if output.status.success() {
        let path = String::from_utf8_lossy(&output.stdout);
        let path = path.trim();
        if !path.is_empty() {
            tracing::info!("Found xddmcp-agent in PATH: {}", path);
            return Ok(path.to_string());
        }
    }

    let mut searched = vec![];
    if let Some(path) = cache_path.as_ref() {
        searched.push(format!("- Deployed cache: {}", path));
    } else {
        searched.push("- Deployed cache: (skipped, HOME not set)".to_string());
    }
    searched.push("- Same directory as local xddmcp binary".to_string());
    searched.push("- PATH (via 'which xddmcp-agent')".to_string());
    if let Some(path) = explicit_path {
        searched.insert(
            0,
            format!("- Explicit path: {} (not found or not executable)", path),
        );
    }

    Err(anyhow::anyhow!(
        "xddmcp-agent binary not found on remote host\n\
        \n\
        Searched in:\n\
        {}\n\
        \n\
        Options:\n\
        - Use automatic deployment: xddmcp --auto-deploy-agent ...\n\
        - Install xddmcp-agent manually\n\
        - Specify explicit path: xddmcp --agent-path=/path/to/xddmcp-agent ...",
        searched.join("\n")
    ))
}

/// Check protocol-version compatibility between the local `xddmcp` and a
/// remote `xddmcp-agent`.
async fn check_agent_version(
    session: &Arc<openssh::Session>,
    agent_path: &str,
    remote_host: &str,
) -> anyhow::Result<()> {
    let local_version = common::version::ProtocolVersion::current();

    tracing::debug!("Checking xddmcp-agent version on remote host: {}", remote_host);

    let output = session
        .command(agent_path)
        .arg("--protocol-version")
        .output()
        .await
        .context("failed to execute xddmcp-agent --protocol-version on remote host")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow::anyhow!(
            "xddmcp-agent --protocol-version failed on remote host '{}'\n\
            \n\
            stderr: {}\n\
            \n\
            This may indicate an old or incompatible xddmcp-agent build.",
            remote_host,
            stderr
        ));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let remote_version = common::version::ProtocolVersion::from_json(stdout.trim())
        .context("failed to parse xddmcp-agent version JSON from remote host")?;

    tracing::info!(
        "Local version: {}, remote version: {}",
        local_version,
        remote_version
    );

    if !local_version.is_compatible_with(&remote_version) {
        return Err(anyhow::anyhow!(
            "xddmcp-agent version mismatch\n\
            \n\
            Local:  xddmcp {}\n\
            Remote: xddmcp-agent {} on host '{}'\n\
            \n\
            The xddmcp-agent version on the remote host must exactly match xddmcp.",
            local_version,
            remote_version,
            remote_host
        ));
    }

    Ok(())
}

async fn try_discover_and_check_version(
    session: &Arc<openssh::Session>,
    explicit_path: Option<&str>,
    remote_host: &str,
) -> anyhow::Result<String> {
    let agent_path = discover_agent_path(session, explicit_path).await?;
    check_agent_version(session, &agent_path, remote_host).await?;
    Ok(agent_path)
}

/// One endpoint behind a tunneled RPC connection: issues a JSON-RPC
/// request per call, serialized by a single-connection mutex.
pub struct RemoteFlowBuilderProxy {
    reader: Mutex<BufReader<tokio::net::tcp::OwnedReadHalf>>,
    writer: Mutex<tokio::net::tcp::OwnedWriteHalf>,
    ids: IdGen,
}

impl RemoteFlowBuilderProxy {
    /// Wrap an already-connected stream (normally the loopback end of a
    /// `Transport`'s port forward, but any connected duplex TCP stream
    /// works — this is also how tests exercise the proxy without SSH).
    pub fn new(stream: TcpStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            reader: Mutex::new(BufReader::new(read_half)),
            writer: Mutex::new(write_half),
            ids: IdGen::default(),
        }
    }

    async fn call(&self, method: &str, params: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        let req = RpcRequest {
            id: self.ids.next(),
            method: method.to_string(),
            params,
        };
        // Held across both the write and the matching read so concurrent
        // calls on the same connection can't interleave: a single
        // endpoint's calls are always issued sequentially by the
        // TransferManager, so this never contends across different files.
        let mut writer = self.writer.lock().await;
        rpc::write_request(&mut *writer, &req).await?;
        drop(writer);
        let mut reader = self.reader.lock().await;
        let resp = rpc::read_response(&mut *reader)
            .await?
            .ok_or_else(|| anyhow::anyhow!("agent closed the connection unexpectedly"))?;
        resp.into_result()
    }
}

#[async_trait::async_trait]
impl FlowBuilder for RemoteFlowBuilderProxy {
    async fn build_flow(&self, config: BuildFlowRequest) -> anyhow::Result<()> {
        self.call("build_flow", serde_json::to_value(config)?).await?;
        Ok(())
    }

    async fn path_exists(&self, path: &str) -> anyhow::Result<bool> {
        Ok(serde_json::from_value(self.call("path_exists", serde_json::to_value(path)?).await?)?)
    }

    async fn path_is_dir(&self, path: &str) -> anyhow::Result<bool> {
        Ok(serde_json::from_value(self.call("path_is_dir", serde_json::to_value(path)?).await?)?)
    }

    async fn get_file_size(&self, path: &str) -> anyhow::Result<u64> {
        Ok(serde_json::from_value(
            self.call("get_file_size", serde_json::to_value(path)?).await?,
        )?)
    }

    async fn build_walk(
        &self,
        source: String,
        target: String,
        target_exists: bool,
        target_is_dir: bool,
        rewrite_absolute_links: bool,
    ) -> anyhow::Result<Walk> {
        let params = serde_json::json!({
            "source": source,
            "target": target,
            "target_exists": target_exists,
            "target_is_dir": target_is_dir,
            "rewrite_absolute_links": rewrite_absolute_links,
        });
        Ok(serde_json::from_value(self.call("build_walk", params).await?)?)
    }

    async fn create_directory(&self, path: &str) -> anyhow::Result<()> {
        self.call("create_directory", serde_json::to_value(path)?).await?;
        Ok(())
    }

    async fn create_symlink(&self, path: &str, link_target: &str) -> anyhow::Result<()> {
        let params = serde_json::json!({ "path": path, "link_target": link_target });
        self.call("create_symlink", params).await?;
        Ok(())
    }

    async fn create_empty_file(&self, path: &str) -> anyhow::Result<()> {
        self.call("create_empty_file", serde_json::to_value(path)?).await?;
        Ok(())
    }

    async fn remove_restart_cookie(
        &self,
        dest_path: &str,
        shard_idx: u64,
        shard_count: u64,
    ) -> anyhow::Result<()> {
        let params = serde_json::json!({
            "dest_path": dest_path,
            "shard_idx": shard_idx,
            "shard_count": shard_count,
        });
        self.call("remove_restart_cookie", params).await?;
        Ok(())
    }

    async fn get_restart_offset(
        &self,
        dest_path: &str,
        shard_idx: u64,
        shard_count: u64,
    ) -> anyhow::Result<u64> {
        let params = serde_json::json!({
            "dest_path": dest_path,
            "shard_idx": shard_idx,
            "shard_count": shard_count,
        });
        Ok(serde_json::from_value(self.call("get_restart_offset", params).await?)?)
    }

    async fn mark_transfer_completed(&self, dest_root: &str, dest_path: &str) -> anyhow::Result<()> {
        let params = serde_json::json!({ "dest_root": dest_root, "dest_path": dest_path });
        self.call("mark_transfer_completed", params).await?;
        Ok(())
    }

    async fn transfer_is_complete(&self, dest_root: &str, dest_path: &str) -> anyhow::Result<bool> {
        let params = serde_json::json!({ "dest_root": dest_root, "dest_path": dest_path });
        Ok(serde_json::from_value(self.call("transfer_is_complete", params).await?)?)
    }

    async fn remove_transfer_progress_file(&self, dest_root: &str) -> anyhow::Result<()> {
        self.call("remove_transfer_progress_file", serde_json::to_value(dest_root)?)
            .await?;
        Ok(())
    }

    async fn hostname(&self) -> anyhow::Result<String> {
        Ok(serde_json::from_value(
            self.call("hostname", serde_json::Value::Null).await?,
        )?)
    }

    async fn protocol_version(&self) -> anyhow::Result<String> {
        Ok(serde_json::from_value(
            self.call("protocol_version", serde_json::Value::Null).await?,
        )?)
    }

    async fn has_preallocate_available(&self) -> anyhow::Result<bool> {
        Ok(serde_json::from_value(
            self.call("has_preallocate_available", serde_json::Value::Null).await?,
        )?)
    }

    async fn start_flow(&self, req: StartFlowRequest) -> anyhow::Result<()> {
        self.call("start_flow", serde_json::to_value(req)?).await?;
        Ok(())
    }

    async fn poll_flow(&self) -> anyhow::Result<bool> {
        Ok(serde_json::from_value(
            self.call("poll_flow", serde_json::Value::Null).await?,
        )?)
    }

    async fn completion_status(&self) -> anyhow::Result<Option<i32>> {
        Ok(serde_json::from_value(
            self.call("completion_status", serde_json::Value::Null).await?,
        )?)
    }

    async fn current_byte(&self) -> anyhow::Result<u64> {
        Ok(serde_json::from_value(
            self.call("current_byte", serde_json::Value::Null).await?,
        )?)
    }

    async fn output(&self, flush_all: bool) -> anyhow::Result<String> {
        Ok(serde_json::from_value(
            self.call("output", serde_json::to_value(flush_all)?).await?,
        )?)
    }

    async fn cancel_flow(&self) -> anyhow::Result<()> {
        self.call("cancel_flow", serde_json::Value::Null).await?;
        Ok(())
    }

    async fn error_string(&self) -> anyhow::Result<String> {
        Ok(serde_json::from_value(
            self.call("error_string", serde_json::Value::Null).await?,
        )?)
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        // The agent is expected to close the connection as part of
        // handling this call; treat any I/O error from the read side as
        // the expected shutdown signal rather than a failure.
        let _ = self.call("shutdown", serde_json::Value::Null).await;
        Ok(())
    }
}

/// An authenticated SSH session with a running `xddmcp-agent` tunneled
/// over a local ephemeral port.
///
/// Owns the SSH session, the port forward and the RPC connection as a
/// single acquisition/release bracket: [`Transport::shutdown`] must be
/// called to release all three, even on the error path of a transfer.
pub struct Transport {
    session: Arc<openssh::Session>,
    flow_builder: Arc<RemoteFlowBuilderProxy>,
    _agent_process: openssh::Child<Arc<openssh::Session>>,
}

impl Transport {
    /// Open a transport to `ssh_session`, launching (or auto-deploying)
    /// `xddmcp-agent` on the far side.
    #[instrument(skip(ssh_session))]
    pub async fn connect(
        ssh_session: &SshSession,
        explicit_agent_path: Option<&str>,
        auto_deploy_agent: bool,
    ) -> anyhow::Result<Transport> {
        let remote_host = &ssh_session.host;
        let session = setup_ssh_session(ssh_session).await?;

        let agent_path =
            match try_discover_and_check_version(&session, explicit_agent_path, remote_host).await {
                Ok(path) => path,
                Err(e) => {
                    if auto_deploy_agent {
                        tracing::info!("xddmcp-agent not found or version mismatch, attempting auto-deployment");
                        let local_agent = deploy::find_local_agent_binary()
                            .context("failed to find local xddmcp-agent binary for deployment")?;
                        let local_version = common::version::ProtocolVersion::current();
                        let deployed_path =
                            deploy::deploy_agent(&session, &local_agent, &local_version.semantic, remote_host)
                                .await
                                .context("failed to deploy xddmcp-agent to remote host")?;
                        if let Err(e) = deploy::cleanup_old_versions(&session, 3).await {
                            tracing::warn!("failed to cleanup old versions (non-fatal): {:#}", e);
                        }
                        deployed_path
                    } else {
                        return Err(e);
                    }
                }
            };

        tracing::info!("Launching xddmcp-agent on {}: {}", remote_host, agent_path);
        let mut child = session
            .arc_command(&agent_path)
            .stdout(openssh::Stdio::piped())
            .stderr(openssh::Stdio::piped())
            .spawn()
            .await
            .context("failed to spawn xddmcp-agent on remote host")?;

        let stdout = child
            .stdout()
            .take()
            .context("xddmcp-agent child has no stdout")?;
        let uri = read_agent_uri(stdout, &mut child).await?;

        let remote_port = parse_uri_port(&uri)?;
        let local_port = bind_ephemeral_port().await?;

        session
            .request_port_forward(
                openssh::ForwardType::Local,
                ("127.0.0.1", local_port),
                ("localhost", remote_port),
            )
            .await
            .context("failed to establish local port forward to xddmcp-agent")?;

        let stream = TcpStream::connect(("127.0.0.1", local_port))
            .await
            .context("failed to connect to forwarded xddmcp-agent port")?;
        let flow_builder = Arc::new(RemoteFlowBuilderProxy::new(stream));

        Ok(Transport {
            session,
            flow_builder,
            _agent_process: child,
        })
    }

    /// The tunneled `FlowBuilder` handle for this endpoint.
    pub fn flow_builder(&self) -> Arc<RemoteFlowBuilderProxy> {
        Arc::clone(&self.flow_builder)
    }

    /// Tear down this transport: invoke the agent's remote `shutdown`,
    /// then close the SSH session (which also releases the port
    /// forward). All steps run even if an earlier one failed.
    pub async fn shutdown(self) {
        if let Err(e) = self.flow_builder.shutdown().await {
            tracing::debug!("remote shutdown call returned an error (expected): {:#}", e);
        }
        if let Err(e) = self.session.close().await {
            tracing::warn!("failed to close SSH session cleanly: {:#}", e);
        }
    }
}

/// Read stdout line by line until the URI delimiter is seen, then return
/// the next line as the endpoint URI. On premature exit, captures stderr
/// into the returned error.
async fn read_agent_uri<R: tokio::io::AsyncRead + Unpin>(
    stdout: R,
    child: &mut openssh::Child<Arc<openssh::Session>>,
) -> anyhow::Result<String> {
    use tokio::io::AsyncBufReadExt;
    let mut lines = tokio::io::BufReader::new(stdout).lines();
    let mut found_delimiter = false;
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if found_delimiter {
                    return Ok(line);
                }
                if line == common::rpc::AGENT_URI_DELIMITER {
                    found_delimiter = true;
                }
            }
            Ok(None) => break,
            Err(e) => return Err(anyhow::anyhow!("failed reading xddmcp-agent stdout: {e}")),
        }
    }

    let mut stderr_text = String::new();
    if let Some(mut stderr) = child.stderr().take() {
        use tokio::io::AsyncReadExt;
        let _ = stderr.read_to_string(&mut stderr_text).await;
    }
    Err(anyhow::anyhow!(
        "xddmcp-agent terminated before reporting its endpoint URI\n\nstderr:\n{}",
        stderr_text
    ))
}

fn parse_uri_port(uri: &str) -> anyhow::Result<u16> {
    let port_str = uri
        .rsplit(':')
        .next()
        .ok_or_else(|| anyhow::anyhow!("malformed agent endpoint URI: {uri}"))?;
    port_str
        .parse()
        .with_context(|| format!("malformed agent endpoint URI: {uri}"))
}

/// Bind a throwaway local listener to discover a free ephemeral port,
/// then drop it immediately: the actual listening socket is opened by
/// the SSH client itself via `request_port_forward`.
async fn bind_ephemeral_port() -> anyhow::Result<u16> {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await?;
    Ok(listener.local_addr()?.port())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_escape_simple() {
        assert_eq!(shell_escape("simple"), "'simple'");
    }

    #[test]
    fn test_shell_escape_with_single_quote() {
        assert_eq!(shell_escape("path'with'quotes"), r"'path'\''with'\''quotes'");
    }

    #[test]
    fn test_shell_escape_injection_attempt() {
        assert_eq!(shell_escape("foo; rm -rf /"), "'foo; rm -rf /'");
    }

    #[test]
    fn parse_uri_port_extracts_trailing_port() {
        assert_eq!(parse_uri_port("xddmcp:agent@localhost:40123").unwrap(), 40123);
    }

    #[test]
    fn parse_uri_port_rejects_malformed_uri() {
        assert!(parse_uri_port("not-a-uri").is_err());
    }

    #[tokio::test]
    async fn bind_ephemeral_port_returns_nonzero_port() {
        let port = bind_ephemeral_port().await.unwrap();
        assert!(port > 0);
    }
}

//! The `FlowBuilder` façade (spec.md §4.4): a transport-agnostic interface
//! with one local implementation (this module's `LocalFlowBuilder`) and
//! one tunneled-proxy implementation (`xddmcp-remote`'s
//! `RemoteFlowBuilderProxy`), per the §9 design note. Both sides of the
//! RPC boundary share the same trait so the `TransferManager` never has to
//! know whether an endpoint is local or remote.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use crate::cookie;
use crate::model::{BuildFlowRequest, StartFlowRequest};
use crate::namer::{self, LinkRewrite, Walk};

/// Flat, proxy-friendly surface exposed by every endpoint (local or
/// remote). All methods are request/response and idempotent where the
/// underlying filesystem action is idempotent.
#[async_trait]
pub trait FlowBuilder: Send + Sync {
    /// Configure (but do not start) this endpoint's single `Flow` for one
    /// file transfer.
    async fn build_flow(&self, config: BuildFlowRequest) -> anyhow::Result<()>;

    async fn path_exists(&self, path: &str) -> anyhow::Result<bool>;
    async fn path_is_dir(&self, path: &str) -> anyhow::Result<bool>;
    async fn get_file_size(&self, path: &str) -> anyhow::Result<u64>;
    async fn build_walk(
        &self,
        source: String,
        target: String,
        target_exists: bool,
        target_is_dir: bool,
        rewrite_absolute_links: bool,
    ) -> anyhow::Result<Walk>;
    async fn create_directory(&self, path: &str) -> anyhow::Result<()>;
    async fn create_symlink(&self, path: &str, link_target: &str) -> anyhow::Result<()>;
    async fn create_empty_file(&self, path: &str) -> anyhow::Result<()>;
    async fn remove_restart_cookie(
        &self,
        dest_path: &str,
        shard_idx: u64,
        shard_count: u64,
    ) -> anyhow::Result<()>;
    async fn get_restart_offset(
        &self,
        dest_path: &str,
        shard_idx: u64,
        shard_count: u64,
    ) -> anyhow::Result<u64>;
    async fn mark_transfer_completed(&self, dest_root: &str, dest_path: &str) -> anyhow::Result<()>;
    async fn transfer_is_complete(&self, dest_root: &str, dest_path: &str) -> anyhow::Result<bool>;
    async fn remove_transfer_progress_file(&self, dest_root: &str) -> anyhow::Result<()>;
    async fn hostname(&self) -> anyhow::Result<String>;
    /// Invokes the mover with `-version` and returns its raw output.
    async fn protocol_version(&self) -> anyhow::Result<String>;
    /// Inspects the mover binary for a well-known preallocate symbol token.
    async fn has_preallocate_available(&self) -> anyhow::Result<bool>;

    async fn start_flow(&self, req: StartFlowRequest) -> anyhow::Result<()>;
    async fn poll_flow(&self) -> anyhow::Result<bool>;
    async fn completion_status(&self) -> anyhow::Result<Option<i32>>;
    async fn current_byte(&self) -> anyhow::Result<u64>;
    async fn output(&self, flush_all: bool) -> anyhow::Result<String>;
    async fn cancel_flow(&self) -> anyhow::Result<()>;
    async fn error_string(&self) -> anyhow::Result<String>;

    /// Tear down this endpoint. For `LocalFlowBuilder` this is a no-op;
    /// for the remote proxy it breaks the RPC call so the agent can exit.
    async fn shutdown(&self) -> anyhow::Result<()>;
}

/// The in-process `FlowBuilder` implementation, hosted either directly by
/// `xddmcp` (for `localhost` endpoints) or by `xddmcp-agent` behind the
/// RPC server loop.
pub struct LocalFlowBuilder {
    config: tokio::sync::Mutex<Option<BuildFlowRequest>>,
    flow: tokio::sync::Mutex<Option<crate::flow::Flow>>,
}

impl Default for LocalFlowBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalFlowBuilder {
    pub fn new() -> Self {
        Self {
            config: tokio::sync::Mutex::new(None),
            flow: tokio::sync::Mutex::new(None),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl FlowBuilder for LocalFlowBuilder {
    async fn build_flow(&self, config: BuildFlowRequest) -> anyhow::Result<()> {
        *self.config.lock().await = Some(config);
        Ok(())
    }

    async fn path_exists(&self, path: &str) -> anyhow::Result<bool> {
        Ok(tokio::fs::symlink_metadata(path).await.is_ok())
    }

    async fn path_is_dir(&self, path: &str) -> anyhow::Result<bool> {
        Ok(tokio::fs::metadata(path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false))
    }

    async fn get_file_size(&self, path: &str) -> anyhow::Result<u64> {
        Ok(tokio::fs::metadata(path).await?.len())
    }

    async fn build_walk(
        &self,
        source: String,
        target: String,
        target_exists: bool,
        target_is_dir: bool,
        rewrite_absolute_links: bool,
    ) -> anyhow::Result<Walk> {
        let rewrite = if rewrite_absolute_links {
            LinkRewrite::RewriteAbsolute
        } else {
            LinkRewrite::Preserve
        };
        Ok(namer::build_dirs_files_links(
            &source,
            Path::new(&target),
            target_exists,
            target_is_dir,
            rewrite,
        ))
    }

    async fn create_directory(&self, path: &str) -> anyhow::Result<()> {
        match tokio::fs::create_dir_all(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_symlink(&self, path: &str, link_target: &str) -> anyhow::Result<()> {
        if let Ok(existing) = tokio::fs::read_link(path).await {
            if existing == Path::new(link_target) {
                return Ok(());
            }
        }
        if let Some(parent) = Path::new(path).parent() {
            tokio::fs::create_dir_all(parent).await.ok();
        }
        match tokio::fs::symlink(link_target, path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                tokio::fs::remove_file(path).await?;
                tokio::fs::symlink(link_target, path).await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn create_empty_file(&self, path: &str) -> anyhow::Result<()> {
        if let Some(parent) = Path::new(path).parent() {
            tokio::fs::create_dir_all(parent).await.ok();
        }
        tokio::fs::File::create(path).await?;
        Ok(())
    }

    async fn remove_restart_cookie(
        &self,
        dest_path: &str,
        shard_idx: u64,
        shard_count: u64,
    ) -> anyhow::Result<()> {
        let cookie_path = cookie::restart_cookie_path(Path::new(dest_path), shard_idx, shard_count);
        cookie::remove_restart_cookie(&cookie_path)?;
        Ok(())
    }

    async fn get_restart_offset(
        &self,
        dest_path: &str,
        shard_idx: u64,
        shard_count: u64,
    ) -> anyhow::Result<u64> {
        let cookie_path = cookie::restart_cookie_path(Path::new(dest_path), shard_idx, shard_count);
        if !cookie_path.exists() {
            return Ok(0);
        }
        let offset = cookie::read_restart_offset(&cookie_path)?;
        let dest_size = tokio::fs::metadata(dest_path).await.map(|m| m.len()).unwrap_or(0);
        cookie::validate_restart_offset(offset, dest_size)?;
        Ok(offset)
    }

    async fn mark_transfer_completed(&self, dest_root: &str, dest_path: &str) -> anyhow::Result<()> {
        cookie::mark_transfer_completed(Path::new(dest_root), dest_path)?;
        Ok(())
    }

    async fn transfer_is_complete(&self, dest_root: &str, dest_path: &str) -> anyhow::Result<bool> {
        Ok(cookie::transfer_is_complete(Path::new(dest_root), dest_path))
    }

    async fn remove_transfer_progress_file(&self, dest_root: &str) -> anyhow::Result<()> {
        cookie::remove_progress_marker(Path::new(dest_root))?;
        Ok(())
    }

    async fn hostname(&self) -> anyhow::Result<String> {
        Ok(hostname_string())
    }

    async fn protocol_version(&self) -> anyhow::Result<String> {
        let mover_path = self
            .config
            .lock()
            .await
            .as_ref()
            .map(|c| c.mover_path.clone())
            .ok_or_else(|| anyhow::anyhow!("build_flow not yet called"))?;
        let output = tokio::process::Command::new(&mover_path)
            .arg("-version")
            .output()
            .await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn has_preallocate_available(&self) -> anyhow::Result<bool> {
        let mover_path = self
            .config
            .lock()
            .await
            .as_ref()
            .map(|c| c.mover_path.clone())
            .ok_or_else(|| anyhow::anyhow!("build_flow not yet called"))?;
        let bytes = tokio::fs::read(&mover_path).await?;
        const TOKEN: &[u8] = b"preallocate";
        Ok(bytes.windows(TOKEN.len()).any(|w| w == TOKEN))
    }

    async fn start_flow(&self, req: StartFlowRequest) -> anyhow::Result<()> {
        let config = self
            .config
            .lock()
            .await
            .clone()
            .ok_or_else(|| anyhow::anyhow!("build_flow not yet called"))?;
        match crate::flow::Flow::start(&config, &req).await {
            Ok(flow) => {
                *self.flow.lock().await = Some(flow);
                Ok(())
            }
            Err(reasons) => Err(anyhow::anyhow!(reasons.join("; "))),
        }
    }

    async fn poll_flow(&self) -> anyhow::Result<bool> {
        let mut guard = self.flow.lock().await;
        match guard.as_mut() {
            Some(flow) => Ok(flow.poll().await),
            None => Ok(false),
        }
    }

    async fn completion_status(&self) -> anyhow::Result<Option<i32>> {
        let guard = self.flow.lock().await;
        Ok(guard.as_ref().and_then(|f| f.completion()))
    }

    async fn current_byte(&self) -> anyhow::Result<u64> {
        let guard = self.flow.lock().await;
        Ok(guard.as_ref().map(|f| f.current_byte()).unwrap_or(0))
    }

    async fn output(&self, flush_all: bool) -> anyhow::Result<String> {
        let guard = self.flow.lock().await;
        match guard.as_ref() {
            Some(flow) => Ok(flow.output(flush_all).await),
            None => Ok(String::new()),
        }
    }

    async fn cancel_flow(&self) -> anyhow::Result<()> {
        let mut guard = self.flow.lock().await;
        if let Some(flow) = guard.as_mut() {
            flow.cancel().await;
        }
        Ok(())
    }

    async fn error_string(&self) -> anyhow::Result<String> {
        let guard = self.flow.lock().await;
        match guard.as_ref() {
            Some(flow) => Ok(flow.error_string().await),
            None => Ok(String::new()),
        }
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

fn hostname_string() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| {
            std::process::Command::new("hostname")
                .output()
                .ok()
                .and_then(|o| String::from_utf8(o.stdout).ok())
                .map(|s| s.trim().to_string())
        })
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_directory_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let builder = LocalFlowBuilder::new();
        let p = tmp.path().join("a/b/c");
        builder.create_directory(p.to_str().unwrap()).await.unwrap();
        builder.create_directory(p.to_str().unwrap()).await.unwrap();
        assert!(p.is_dir());
    }

    #[tokio::test]
    async fn create_symlink_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let builder = LocalFlowBuilder::new();
        let link = tmp.path().join("link");
        builder
            .create_symlink(link.to_str().unwrap(), "../target")
            .await
            .unwrap();
        builder
            .create_symlink(link.to_str().unwrap(), "../target")
            .await
            .unwrap();
        assert_eq!(
            tokio::fs::read_link(&link).await.unwrap(),
            std::path::PathBuf::from("../target")
        );
    }

    #[tokio::test]
    async fn progress_marker_roundtrip_through_builder() {
        let tmp = tempfile::tempdir().unwrap();
        let builder = LocalFlowBuilder::new();
        let root = tmp.path().to_str().unwrap();
        assert!(!builder.transfer_is_complete(root, "a/b").await.unwrap());
        builder.mark_transfer_completed(root, "a/b").await.unwrap();
        assert!(builder.transfer_is_complete(root, "a/b").await.unwrap());
        builder.remove_transfer_progress_file(root).await.unwrap();
        assert!(!builder.transfer_is_complete(root, "a/b").await.unwrap());
    }
}

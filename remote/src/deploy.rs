//! Binary deployment for the `xddmcp-agent` executable.
//!
//! Transfers a static agent binary to a remote host via SSH using base64
//! encoding, verifies integrity with a SHA-256 checksum, and manages
//! cached versions so repeated runs against the same host don't redeploy.

use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;

/// Find a local static `xddmcp-agent` binary suitable for deployment.
///
/// Searches in the following order:
/// 1. Same directory as the current `xddmcp` executable
/// 2. `PATH` via `which xddmcp-agent`
pub fn find_local_agent_binary() -> anyhow::Result<PathBuf> {
    let mut searched_paths = Vec::new();

    if let Ok(current_exe) = std::env::current_exe() {
        if let Some(bin_dir) = current_exe.parent() {
            let path = bin_dir.join("xddmcp-agent");
            searched_paths.push(format!("Same directory: {}", path.display()));
            if path.exists() && path.is_file() {
                tracing::info!("Found local xddmcp-agent binary at {}", path.display());
                return Ok(path);
            }
        }
    }

    tracing::debug!("Trying to find xddmcp-agent in PATH");
    let which_output = std::process::Command::new("which")
        .arg("xddmcp-agent")
        .output()
        .ok();

    if let Some(output) = which_output {
        if output.status.success() {
            let path_str = String::from_utf8_lossy(&output.stdout);
            let path_str = path_str.trim();
            if !path_str.is_empty() {
                let path = PathBuf::from(path_str);
                searched_paths.push(format!("PATH: {}", path.display()));
                if path.exists() && path.is_file() {
                    tracing::info!("Found local xddmcp-agent binary in PATH: {}", path.display());
                    return Ok(path);
                }
            }
        }
    }

    anyhow::bail!(
        "no local xddmcp-agent binary found for deployment\n\
        \n\
        Searched in:\n\
        {}\n\
        \n\
        To use auto-deployment, ensure xddmcp-agent is available:\n\
        - cargo install xddmcp (installs to ~/.cargo/bin)\n\
        - or add xddmcp-agent to PATH\n\
        - or build with: cargo build --release --bin xddmcp-agent",
        searched_paths
            .iter()
            .map(|p| format!("- {}", p))
            .collect::<Vec<_>>()
            .join("\n")
    )
}

/// Deploy the `xddmcp-agent` binary to a remote host.
///
/// Transfers the local static binary to
/// `~/.cache/xddmcp/bin/xddmcp-agent-{version}`, verifies the checksum,
/// and returns the path to the deployed binary.
pub async fn deploy_agent(
    session: &Arc<openssh::Session>,
    local_agent_path: &std::path::Path,
    version: &str,
    remote_host: &str,
) -> anyhow::Result<String> {
    tracing::info!(
        "Deploying xddmcp-agent {} to remote host '{}'",
        version,
        remote_host
    );

    let binary = tokio::fs::read(local_agent_path).await.with_context(|| {
        format!(
            "failed to read local xddmcp-agent binary from {}",
            local_agent_path.display()
        )
    })?;

    tracing::info!(
        "Read local xddmcp-agent binary ({} bytes) from {}",
        binary.len(),
        local_agent_path.display()
    );

    let expected_checksum = compute_sha256(&binary);
    tracing::debug!("Expected SHA-256: {}", hex::encode(&expected_checksum));

    let home = crate::get_remote_home(session).await?;
    let remote_path = format!("{}/.cache/xddmcp/bin/xddmcp-agent-{}", home, version);

    transfer_binary_base64(session, &binary, &remote_path).await?;

    tracing::info!("Binary transferred to {}", remote_path);

    verify_remote_checksum(session, &remote_path, &expected_checksum).await?;

    tracing::info!("Checksum verified successfully");

    Ok(remote_path)
}

/// Transfer a binary to a remote host using base64 encoding.
///
/// Creates the target directory if needed, transfers the binary via
/// base64 encoding through SSH stdin, and sets appropriate permissions
/// (700).
async fn transfer_binary_base64(
    session: &Arc<openssh::Session>,
    binary: &[u8],
    remote_path: &str,
) -> anyhow::Result<()> {
    use base64::Engine;

    let encoded = base64::engine::general_purpose::STANDARD.encode(binary);

    let path = std::path::Path::new(remote_path);
    let dir = path
        .parent()
        .context("remote path must have a parent directory")?
        .to_str()
        .context("remote path parent must be valid UTF-8")?;
    let filename = path
        .file_name()
        .context("remote path must have a filename")?
        .to_str()
        .context("remote filename must be valid UTF-8")?;

    let temp_filename = if let Some(version) = filename.strip_prefix("xddmcp-agent-") {
        format!(".xddmcp-agent-{}.tmp.$$", version)
    } else {
        format!(".{}.tmp.$$", filename)
    };

    let dir_escaped = crate::shell_escape(dir);
    let temp_path = format!("{}/{}", dir, temp_filename);
    let temp_path_escaped = crate::shell_escape(&temp_path);
    let final_path = format!("{}/{}", dir, filename);
    let final_path_escaped = crate::shell_escape(&final_path);

    let cmd = format!(
        "mkdir -p {} && \
         base64 -d > {} && \
         chmod 700 {} && \
         mv -f {} {}",
        dir_escaped, temp_path_escaped, temp_path_escaped, temp_path_escaped, final_path_escaped
    );

    tracing::debug!("Running remote command: mkdir && base64 && chmod");

    let mut child = session
        .command("sh")
        .arg("-c")
        .arg(&cmd)
        .stdin(openssh::Stdio::piped())
        .stdout(openssh::Stdio::piped())
        .stderr(openssh::Stdio::piped())
        .spawn()
        .await
        .context("failed to spawn remote command for binary transfer")?;

    let mut stdin = child
        .stdin()
        .take()
        .context("failed to get stdin for remote command")?;
    let mut stdout = child
        .stdout()
        .take()
        .context("failed to get stdout for remote command")?;
    let mut stderr = child
        .stderr()
        .take()
        .context("failed to get stderr for remote command")?;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    stdin
        .write_all(encoded.as_bytes())
        .await
        .context("failed to write base64 data to remote stdin")?;
    stdin.shutdown().await.context("failed to shutdown stdin")?;
    drop(stdin);

    let stdout_fut = async {
        let mut buf = Vec::new();
        let _ = stdout.read_to_end(&mut buf).await;
        buf
    };
    let stderr_fut = async {
        let mut buf = Vec::new();
        let _ = stderr.read_to_end(&mut buf).await;
        buf
    };
    let (_stdout_data, stderr_data) = tokio::join!(stdout_fut, stderr_fut);

    let status = child
        .wait()
        .await
        .context("failed to wait for remote command completion")?;

    if !status.success() {
        let stderr = String::from_utf8_lossy(&stderr_data);
        anyhow::bail!(
            "failed to transfer binary to remote host\n\
            \n\
            stderr: {}\n\
            \n\
            This may indicate:\n\
            - Insufficient disk space on remote host\n\
            - Permission denied creating $HOME/.cache/xddmcp/bin\n\
            - base64 command not available on remote host",
            stderr
        );
    }

    Ok(())
}

/// Verify the checksum of the transferred binary on the remote host.
async fn verify_remote_checksum(
    session: &Arc<openssh::Session>,
    remote_path: &str,
    expected_checksum: &[u8],
) -> anyhow::Result<()> {
    let cmd = format!("sha256sum {}", crate::shell_escape(remote_path));

    tracing::debug!("Verifying checksum on remote host");

    let output = session
        .command("sh")
        .arg("-c")
        .arg(&cmd)
        .output()
        .await
        .context("failed to run sha256sum on remote host")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!(
            "failed to compute checksum on remote host\n\
            stderr: {}",
            stderr
        );
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let remote_checksum = stdout
        .split_whitespace()
        .next()
        .context("unexpected sha256sum output format")?;

    let expected_hex = hex::encode(expected_checksum);

    if remote_checksum != expected_hex {
        anyhow::bail!(
            "checksum mismatch after transfer\n\
            \n\
            Expected: {}\n\
            Got:      {}\n\
            \n\
            The binary transfer may have been corrupted.\n\
            Please try again or check network connectivity.",
            expected_hex,
            remote_checksum
        );
    }

    Ok(())
}

fn compute_sha256(data: &[u8]) -> Vec<u8> {
    use ring::digest;
    digest::digest(&digest::SHA256, data).as_ref().to_vec()
}

/// Clean up old `xddmcp-agent` versions on the remote host, keeping the
/// most recent `keep_count`.
pub async fn cleanup_old_versions(session: &Arc<openssh::Session>, keep_count: usize) -> anyhow::Result<()> {
    tracing::debug!("Cleaning up old xddmcp-agent versions (keeping {})", keep_count);

    let home = match crate::get_remote_home(session).await {
        Ok(h) => h,
        Err(e) => {
            tracing::warn!(
                "cleanup of old versions skipped (HOME not available): {:#}",
                e
            );
            return Ok(());
        }
    };

    let cache_dir = format!("{}/.cache/xddmcp/bin", home);
    let cmd = format!(
        "cd {} 2>/dev/null && ls -t xddmcp-agent-* 2>/dev/null | tail -n +{} | xargs -r rm -f",
        crate::shell_escape(&cache_dir),
        keep_count + 1
    );

    let output = session
        .command("sh")
        .arg("-c")
        .arg(&cmd)
        .output()
        .await
        .context("failed to run cleanup command on remote host")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        tracing::warn!("cleanup of old versions failed (non-fatal): {}", stderr);
    } else {
        tracing::debug!("Old versions cleaned up successfully");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_sha256() {
        let data = b"hello world";
        let hash = compute_sha256(data);
        let expected =
            hex::decode("b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9")
                .unwrap();
        assert_eq!(hash, expected);
    }

    #[test]
    fn test_compute_sha256_empty() {
        let data = b"";
        let hash = compute_sha256(data);
        let expected =
            hex::decode("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855")
                .unwrap();
        assert_eq!(hash, expected);
    }

    #[test]
    fn test_compute_sha256_binary() {
        let data: Vec<u8> = (0..256).map(|i| i as u8).collect();
        let hash = compute_sha256(&data);
        assert_eq!(hash.len(), 32);
        let hash2 = compute_sha256(&data);
        assert_eq!(hash, hash2);
    }
}

//! Newline-delimited JSON-RPC used to tunnel [`crate::flow_builder::FlowBuilder`]
//! calls to a remote `xddmcp-agent`. One request is in flight per
//! connection at a time (the `TransferManager` drives each endpoint's
//! calls sequentially), so the framing stays deliberately simple: no
//! batching, no pipelining, one JSON object per line in each direction.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::flow_builder::FlowBuilder;
use crate::model::{BuildFlowRequest, StartFlowRequest};

/// Line the agent writes to standard output twice, bracketing its
/// endpoint URI on the line in between (spec §4.6). Shared between
/// `xddmcp-agent` (writer) and `xddmcp-remote`'s Transport (reader).
pub const AGENT_URI_DELIMITER: &str = "--8<-- XDDMCP-AGENT-URI --8<--";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RpcResponse {
    fn ok(id: u64, result: serde_json::Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    fn err(id: u64, error: impl std::fmt::Display) -> Self {
        Self {
            id,
            result: None,
            error: Some(error.to_string()),
        }
    }

    pub fn into_result(self) -> anyhow::Result<serde_json::Value> {
        match self.error {
            Some(e) => Err(anyhow::anyhow!(e)),
            None => Ok(self.result.unwrap_or(serde_json::Value::Null)),
        }
    }
}

/// Writes one request as a line of JSON terminated by `\n` and flushes.
pub async fn write_request<W: tokio::io::AsyncWrite + Unpin>(
    writer: &mut W,
    req: &RpcRequest,
) -> anyhow::Result<()> {
    let mut line = serde_json::to_vec(req)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one response line. Returns `Ok(None)` on clean EOF (peer closed
/// the connection, e.g. after a `shutdown` call tore down the tunnel).
pub async fn read_response<R: tokio::io::AsyncBufRead + Unpin>(
    reader: &mut R,
) -> anyhow::Result<Option<RpcResponse>> {
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(line.trim_end())?))
}

/// Monotonic id generator shared by a single client connection.
#[derive(Debug, Default)]
pub struct IdGen(AtomicU64);

impl IdGen {
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// Serves RPC requests off `reader`/`writer` by dispatching to `builder`
/// until the connection is closed or the `shutdown` method is received.
/// Used directly by `xddmcp-agent`'s main loop.
pub async fn serve<B, R, W>(builder: &B, reader: R, mut writer: W) -> anyhow::Result<()>
where
    B: FlowBuilder + ?Sized,
    R: tokio::io::AsyncRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(reader);
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return Ok(());
        }
        let req: RpcRequest = match serde_json::from_str(line.trim_end()) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "malformed rpc request, dropping connection");
                return Ok(());
            }
        };
        let is_shutdown = req.method == "shutdown";
        let id = req.id;
        let response = dispatch(builder, req).await.unwrap_or_else(|e| RpcResponse::err(id, e));
        let mut bytes = serde_json::to_vec(&response)?;
        bytes.push(b'\n');
        writer.write_all(&bytes).await?;
        writer.flush().await?;
        if is_shutdown {
            return Ok(());
        }
    }
}

async fn dispatch<B: FlowBuilder + ?Sized>(
    builder: &B,
    req: RpcRequest,
) -> anyhow::Result<RpcResponse> {
    let id = req.id;
    macro_rules! call {
        ($e:expr) => {
            match $e {
                Ok(v) => Ok(RpcResponse::ok(id, serde_json::to_value(v)?)),
                Err(e) => Err(e),
            }
        };
    }
    match req.method.as_str() {
        "build_flow" => {
            let params: BuildFlowRequest = serde_json::from_value(req.params)?;
            call!(builder.build_flow(params).await)
        }
        "path_exists" => {
            let path: String = serde_json::from_value(req.params)?;
            call!(builder.path_exists(&path).await)
        }
        "path_is_dir" => {
            let path: String = serde_json::from_value(req.params)?;
            call!(builder.path_is_dir(&path).await)
        }
        "get_file_size" => {
            let path: String = serde_json::from_value(req.params)?;
            call!(builder.get_file_size(&path).await)
        }
        "build_walk" => {
            #[derive(Deserialize)]
            struct Params {
                source: String,
                target: String,
                target_exists: bool,
                target_is_dir: bool,
                rewrite_absolute_links: bool,
            }
            let p: Params = serde_json::from_value(req.params)?;
            call!(
                builder
                    .build_walk(
                        p.source,
                        p.target,
                        p.target_exists,
                        p.target_is_dir,
                        p.rewrite_absolute_links,
                    )
                    .await
            )
        }
        "create_directory" => {
            let path: String = serde_json::from_value(req.params)?;
            call!(builder.create_directory(&path).await)
        }
        "create_symlink" => {
            #[derive(Deserialize)]
            struct Params {
                path: String,
                link_target: String,
            }
            let p: Params = serde_json::from_value(req.params)?;
            call!(builder.create_symlink(&p.path, &p.link_target).await)
        }
        "create_empty_file" => {
            let path: String = serde_json::from_value(req.params)?;
            call!(builder.create_empty_file(&path).await)
        }
        "remove_restart_cookie" => {
            #[derive(Deserialize)]
            struct Params {
                dest_path: String,
                shard_idx: u64,
                shard_count: u64,
            }
            let p: Params = serde_json::from_value(req.params)?;
            call!(
                builder
                    .remove_restart_cookie(&p.dest_path, p.shard_idx, p.shard_count)
                    .await
            )
        }
        "get_restart_offset" => {
            #[derive(Deserialize)]
            struct Params {
                dest_path: String,
                shard_idx: u64,
                shard_count: u64,
            }
            let p: Params = serde_json::from_value(req.params)?;
            call!(
                builder
                    .get_restart_offset(&p.dest_path, p.shard_idx, p.shard_count)
                    .await
            )
        }
        "mark_transfer_completed" => {
            #[derive(Deserialize)]
            struct Params {
                dest_root: String,
                dest_path: String,
            }
            let p: Params = serde_json::from_value(req.params)?;
            call!(builder.mark_transfer_completed(&p.dest_root, &p.dest_path).await)
        }
        "transfer_is_complete" => {
            #[derive(Deserialize)]
            struct Params {
                dest_root: String,
                dest_path: String,
            }
            let p: Params = serde_json::from_value(req.params)?;
            call!(builder.transfer_is_complete(&p.dest_root, &p.dest_path).await)
        }
        "remove_transfer_progress_file" => {
            let dest_root: String = serde_json::from_value(req.params)?;
            call!(builder.remove_transfer_progress_file(&dest_root).await)
        }
        "hostname" => call!(builder.hostname().await),
        "protocol_version" => call!(builder.protocol_version().await),
        "has_preallocate_available" => call!(builder.has_preallocate_available().await),
        "start_flow" => {
            let params: StartFlowRequest = serde_json::from_value(req.params)?;
            call!(builder.start_flow(params).await)
        }
        "poll_flow" => call!(builder.poll_flow().await),
        "completion_status" => call!(builder.completion_status().await),
        "current_byte" => call!(builder.current_byte().await),
        "output" => {
            let flush_all: bool = serde_json::from_value(req.params)?;
            call!(builder.output(flush_all).await)
        }
        "cancel_flow" => call!(builder.cancel_flow().await),
        "error_string" => call!(builder.error_string().await),
        "shutdown" => call!(builder.shutdown().await),
        other => Err(anyhow::anyhow!("unknown rpc method: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow_builder::LocalFlowBuilder;

    #[tokio::test]
    async fn request_response_roundtrip_over_duplex_stream() {
        let (client, server) = tokio::io::duplex(4096);
        let builder = LocalFlowBuilder::shared();
        let (server_read, server_write) = tokio::io::split(server);
        let serve_task = tokio::spawn(async move {
            serve(builder.as_ref(), server_read, server_write).await.unwrap();
        });

        let (client_read, mut client_write) = tokio::io::split(client);
        let mut client_read = BufReader::new(client_read);

        write_request(
            &mut client_write,
            &RpcRequest {
                id: 1,
                method: "hostname".to_string(),
                params: serde_json::Value::Null,
            },
        )
        .await
        .unwrap();
        let resp = read_response(&mut client_read).await.unwrap().unwrap();
        assert_eq!(resp.id, 1);
        assert!(resp.error.is_none());

        write_request(
            &mut client_write,
            &RpcRequest {
                id: 2,
                method: "shutdown".to_string(),
                params: serde_json::Value::Null,
            },
        )
        .await
        .unwrap();
        let resp = read_response(&mut client_read).await.unwrap().unwrap();
        assert_eq!(resp.id, 2);

        assert!(read_response(&mut client_read).await.unwrap().is_none());
        serve_task.await.unwrap();
    }

    #[tokio::test]
    async fn unknown_method_returns_error_response() {
        let (client, server) = tokio::io::duplex(4096);
        let builder = LocalFlowBuilder::shared();
        let (server_read, server_write) = tokio::io::split(server);
        tokio::spawn(async move {
            let _ = serve(builder.as_ref(), server_read, server_write).await;
        });

        let (client_read, mut client_write) = tokio::io::split(client);
        let mut client_read = BufReader::new(client_read);
        write_request(
            &mut client_write,
            &RpcRequest {
                id: 1,
                method: "not_a_real_method".to_string(),
                params: serde_json::Value::Null,
            },
        )
        .await
        .unwrap();
        let resp = read_response(&mut client_read).await.unwrap().unwrap();
        assert!(resp.error.is_some());
    }
}

//! Exercises `RemoteFlowBuilderProxy` end-to-end against a loopback RPC
//! server, without needing a real remote host or SSH session: the proxy
//! only cares that it is handed a connected `TcpStream`, which is exactly
//! what `Transport::connect` gives it after the port forward is set up.

use common::flow_builder::{FlowBuilder, LocalFlowBuilder};
use remote::RemoteFlowBuilderProxy;

async fn spawn_loopback_agent() -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, write_half) = stream.into_split();
        let builder = LocalFlowBuilder::shared();
        let _ = common::rpc::serve(builder.as_ref(), read_half, write_half).await;
    });
    (addr, handle)
}

#[tokio::test]
async fn proxy_reaches_filesystem_probes_over_tcp() {
    let (addr, server) = spawn_loopback_agent().await;
    let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let proxy = RemoteFlowBuilderProxy::new(stream);

    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("present");
    std::fs::write(&path, b"hi").unwrap();

    assert!(proxy.path_exists(path.to_str().unwrap()).await.unwrap());
    assert!(!proxy
        .path_exists(tmp.path().join("absent").to_str().unwrap())
        .await
        .unwrap());
    assert_eq!(proxy.get_file_size(path.to_str().unwrap()).await.unwrap(), 2);

    proxy.shutdown().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn proxy_round_trips_progress_marker_state() {
    let (addr, server) = spawn_loopback_agent().await;
    let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let proxy = RemoteFlowBuilderProxy::new(stream);

    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().to_str().unwrap();

    assert!(!proxy.transfer_is_complete(root, "a/b").await.unwrap());
    proxy.mark_transfer_completed(root, "a/b").await.unwrap();
    assert!(proxy.transfer_is_complete(root, "a/b").await.unwrap());

    proxy.shutdown().await.unwrap();
    server.await.unwrap();
}

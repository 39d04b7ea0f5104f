#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use switchboard_core::{Arguments, BincodeCodec, InvocationMode, Request, Response};
use switchboard_fabric::transport::{framed, TcpTransportListener};
use switchboard_fabric::ServerCodec;

/// Echo peer: every request carries `(payload, delay_ms)`; the reply echoes
/// the payload after sleeping for the delay, so replies can overtake each
/// other on one connection.
pub struct EchoPeer {
    pub addr: SocketAddr,
    pub accepted: Arc<AtomicUsize>,
}

pub async fn spawn_echo_peer() -> EchoPeer {
    let listener = TcpTransportListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));

    let counter = accepted.clone();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else { break };
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(serve(stream));
        }
    });

    EchoPeer { addr, accepted }
}

async fn serve(stream: tokio::net::TcpStream) {
    let (mut reader, mut writer) = framed(stream, ServerCodec::<BincodeCodec>::default());
    let (tx, mut rx) = mpsc::unbounded_channel::<Response>();

    tokio::spawn(async move {
        while let Some(response) = rx.recv().await {
            if writer.send(response).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(request)) = reader.next().await {
        let tx = tx.clone();
        tokio::spawn(async move {
            let (payload, delay) =
                <(String, u64)>::decode(&request.arguments, &BincodeCodec).unwrap();
            tokio::time::sleep(Duration::from_millis(delay)).await;
            if request.mode != InvocationMode::Async {
                let value = bincode::serialize(&payload).unwrap();
                let _ = tx.send(Response::success(&request, value));
            }
        });
    }
}

pub fn echo_request(payload: &str, delay_ms: u64) -> Request {
    let arguments = (payload.to_string(), delay_ms).encode(&BincodeCodec).unwrap();
    Request::new("test.Echo", "echo", InvocationMode::Sync).arguments(arguments)
}

//! Mock SAUC recognition service
//!
//! Answers every client frame with an interim full-server-response and the
//! client's final packet with a final one. Records the handshake headers it
//! was dialled with.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

use sauc_gateway::core::sauc::{
    Compression, FLAG_FINAL_PACKET, Frame, MessageType, Serialization, build_frame,
};

/// How the mock behaves once it has sent its final result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterFinal {
    /// Keep the connection open until the gateway closes it
    StayOpen,
    /// Close the connection right after the final result
    Close,
}

#[derive(Default)]
pub struct MockUpstreamState {
    /// `x-api-*` headers of each accepted connection
    pub handshakes: Mutex<Vec<Vec<(String, String)>>>,
    /// Payload bytes of every parseable binary frame received
    pub received_bytes: Mutex<usize>,
    /// Binary messages received, parseable or not
    pub received_frames: Mutex<usize>,
}

pub async fn spawn_mock_upstream(after_final: AfterFinal) -> (String, Arc<MockUpstreamState>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    let state = Arc::new(MockUpstreamState::default());

    let accept_state = state.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let state = accept_state.clone();
            tokio::spawn(async move {
                let headers_state = state.clone();
                let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                    let headers = request
                        .headers()
                        .iter()
                        .filter(|(name, _)| name.as_str().starts_with("x-api-"))
                        .map(|(name, value)| {
                            (
                                name.as_str().to_string(),
                                value.to_str().unwrap_or_default().to_string(),
                            )
                        })
                        .collect();
                    headers_state.handshakes.lock().push(headers);
                    Ok(response)
                };
                let Ok(mut ws) = accept_hdr_async(stream, callback).await else {
                    return;
                };

                while let Some(Ok(message)) = ws.next().await {
                    match message {
                        Message::Binary(data) => {
                            *state.received_frames.lock() += 1;
                            let Ok(frame) = Frame::parse(&data) else {
                                continue;
                            };
                            *state.received_bytes.lock() += frame.payload.len();
                            if frame.is_final_packet() {
                                let result = server_response(FLAG_FINAL_PACKET, "hello world");
                                if ws.send(Message::Binary(result)).await.is_err() {
                                    break;
                                }
                                if after_final == AfterFinal::Close {
                                    let _ = ws.close(None).await;
                                    break;
                                }
                            } else if ws.send(Message::Binary(server_response(0, ""))).await.is_err() {
                                break;
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }
            });
        }
    });

    (format!("ws://{addr}/api/v3/sauc/bigmodel"), state)
}

pub fn server_response(flags: u8, text: &str) -> bytes::Bytes {
    let payload = serde_json::json!({ "result": { "text": text } }).to_string();
    build_frame(
        MessageType::FullServerResponse,
        Serialization::Json,
        Compression::None,
        flags,
        payload.as_bytes(),
    )
}

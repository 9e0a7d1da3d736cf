//! Mock Sonogram server for session integration tests.
//!
//! Accepts one WebSocket client on an ephemeral port, answers
//! `requestGrammar` with a canned grammar, records every frame the client
//! sends and lets the test push frames of its own.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use sonogram_core::Endpoint;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::{Data, OpCode};
use tokio_tungstenite::tungstenite::protocol::frame::Frame;
use tokio_tungstenite::tungstenite::Message as WsFrame;

/// How long a test waits for the client before failing.
pub const WAIT: Duration = Duration::from_secs(5);

pub struct MockServer {
    pub port: u16,
    received: mpsc::UnboundedReceiver<Value>,
    outgoing: Option<mpsc::UnboundedSender<WsFrame>>,
    close_frame: Arc<AtomicBool>,
}

impl MockServer {
    /// Start a server that replies to `requestGrammar` with `grammar`.
    pub async fn start(grammar: &str) -> Self {
        let reply = serde_json::json!({"action": "grammar", "grammar": grammar}).to_string();
        Self::start_with_reply(Some(reply)).await
    }

    /// Start a server that sends `reply` verbatim (or nothing) on `requestGrammar`.
    pub async fn start_with_reply(reply: Option<String>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock server");
        let port = listener.local_addr().unwrap().port();

        let (received_tx, received) = mpsc::unbounded_channel();
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let close_frame = Arc::new(AtomicBool::new(false));
        tokio::spawn(serve(
            listener,
            reply,
            received_tx,
            outgoing_rx,
            Arc::clone(&close_frame),
        ));

        Self {
            port,
            received,
            outgoing: Some(outgoing_tx),
            close_frame,
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::websocket("127.0.0.1", self.port, false)
    }

    /// Next JSON message from the client, `None` once the client has gone.
    pub async fn next_message(&mut self) -> Option<Value> {
        tokio::time::timeout(WAIT, self.received.recv())
            .await
            .expect("timed out waiting for the client")
    }

    /// Push a raw text frame to the client.
    pub fn send(&self, text: impl Into<String>) {
        self.send_frame(WsFrame::text(text.into()));
    }

    /// Push one message split over `parts` WebSocket frames (a text frame
    /// followed by continuation frames).
    pub fn send_fragmented(&self, text: &str, parts: usize) {
        let bytes = text.as_bytes();
        let size = bytes.len().div_ceil(parts.max(1)).max(1);
        let chunks: Vec<&[u8]> = bytes.chunks(size).collect();
        for (i, chunk) in chunks.iter().enumerate() {
            let opcode = if i == 0 {
                OpCode::Data(Data::Text)
            } else {
                OpCode::Data(Data::Continue)
            };
            let is_final = i + 1 == chunks.len();
            self.send_frame(WsFrame::Frame(Frame::message(
                chunk.to_vec(),
                opcode,
                is_final,
            )));
        }
    }

    fn send_frame(&self, frame: WsFrame) {
        if let Some(tx) = &self.outgoing {
            tx.send(frame).expect("mock server still running");
        }
    }

    /// Whether the client ended the connection with a close frame.
    pub fn saw_close_frame(&self) -> bool {
        self.close_frame.load(Ordering::SeqCst)
    }

    /// Close the connection from the server side.
    pub fn close(&mut self) {
        self.outgoing = None;
    }
}

async fn serve(
    listener: TcpListener,
    reply: Option<String>,
    received: mpsc::UnboundedSender<Value>,
    mut outgoing: mpsc::UnboundedReceiver<WsFrame>,
    close_frame: Arc<AtomicBool>,
) {
    let Ok((stream, _)) = listener.accept().await else {
        return;
    };
    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };

    loop {
        tokio::select! {
            frame = ws.next() => match frame {
                Some(Ok(WsFrame::Text(text))) => {
                    let value: Value =
                        serde_json::from_str(text.as_str()).expect("client frames are JSON");
                    let wants_grammar = value["action"] == "requestGrammar";
                    if received.send(value).is_err() {
                        break;
                    }
                    if wants_grammar {
                        if let Some(reply) = &reply {
                            if ws.send(WsFrame::text(reply.clone())).await.is_err() {
                                break;
                            }
                        }
                    }
                }
                Some(Ok(WsFrame::Close(_))) => {
                    close_frame.store(true, Ordering::SeqCst);
                    break;
                }
                Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            command = outgoing.recv() => match command {
                Some(frame) => {
                    if ws.send(frame).await.is_err() {
                        break;
                    }
                }
                None => {
                    let _ = ws.close(None).await;
                    break;
                }
            },
        }
    }
}

/// Poll `condition` until it holds, failing the test after [`WAIT`].
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

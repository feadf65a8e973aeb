//! Terminal viewer for a remote session
//!
//! Connects to `/ws/{id}`, puts the local terminal in raw mode and bridges
//! stdin/stdout to the socket until the user detaches (Ctrl+Q) or the
//! server closes the stream.

use std::io::Write;

use bytes::Bytes;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::error::{Result, StreamError};

/// Byte that detaches the viewer (Ctrl+Q)
pub const DETACH_BYTE: u8 = 0x11;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Result of a session attachment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachResult {
    /// User detached with Ctrl+Q
    Detached,
    /// Server closed the stream (process ended or another viewer took over)
    SessionEnded,
    /// The connection failed mid-stream
    Error(String),
}

/// Attach the local terminal to the stream at `url`
pub async fn attach_to_session(url: &str) -> Result<AttachResult> {
    let (socket, _) = connect_async(url)
        .await
        .map_err(|e| StreamError::Transport(format!("cannot connect to {}: {}", url, e)))?;
    info!("Attached to {}", url);

    enable_raw_mode()?;
    let result = run_async_loop(socket).await;

    let _ = disable_raw_mode();
    let _ = std::io::stdout().flush();
    // Keystrokes typed while detaching must not leak into the shell
    flush_stdin();

    info!("Attach complete, result: {:?}", result);
    Ok(result)
}

/// Split stdin input at the detach key.
///
/// Returns the bytes to forward and whether the detach key was pressed.
pub fn split_at_detach(data: &[u8]) -> (&[u8], bool) {
    match data.iter().position(|b| *b == DETACH_BYTE) {
        Some(pos) => (&data[..pos], true),
        None => (data, false),
    }
}

fn flush_stdin() {
    use nix::sys::termios::{FlushArg, tcflush};

    let _ = tcflush(std::io::stdin(), FlushArg::TCIFLUSH);
}

async fn run_async_loop(socket: Socket) -> AttachResult {
    let (mut sink, mut stream) = socket.split();
    let (input_tx, mut input_rx) = mpsc::channel::<Bytes>(64);

    // stdin -> socket; the sender is dropped on detach or EOF
    let stdin_task = tokio::spawn(async move {
        let mut stdin = tokio::io::stdin();
        let mut buf = [0u8; 1024];

        loop {
            match stdin.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    let (data, detach) = split_at_detach(&buf[..n]);
                    if !data.is_empty() && input_tx.send(Bytes::copy_from_slice(data)).await.is_err() {
                        break;
                    }
                    if detach {
                        debug!("Ctrl+Q detected, detaching");
                        break;
                    }
                }
                Err(e) => {
                    warn!("stdin read error: {}", e);
                    break;
                }
            }
        }
    });

    let mut stdout = tokio::io::stdout();
    let result = loop {
        tokio::select! {
            input = input_rx.recv() => match input {
                Some(data) => {
                    if let Err(e) = sink.send(Message::Binary(data)).await {
                        break AttachResult::Error(e.to_string());
                    }
                }
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break AttachResult::Detached;
                }
            },
            message = stream.next() => match message {
                Some(Ok(Message::Binary(data))) => {
                    if stdout.write_all(&data).await.is_err() {
                        break AttachResult::Error("stdout closed".to_string());
                    }
                    let _ = stdout.flush().await;
                }
                Some(Ok(Message::Close(_))) | None => break AttachResult::SessionEnded,
                Some(Ok(_)) => {}
                Some(Err(e)) => break AttachResult::Error(e.to_string()),
            },
        }
    };

    stdin_task.abort();
    result
}

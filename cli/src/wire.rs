//! Request/response helpers over one websocket connection.

use std::time::Duration;

use frames::{Data, Frame, Status, syscall};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use uuid::Uuid;

use crate::error::CliError;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SESSION_TIMEOUT: Duration = Duration::from_secs(5);
const REPLY_TIMEOUT: Duration = Duration::from_secs(15);

pub fn ws_url(base_url: &str) -> Result<String, CliError> {
    let base = base_url.trim_end_matches('/');
    if let Some(rest) = base.strip_prefix("http://") {
        return Ok(format!("ws://{rest}/api/ws"));
    }
    if let Some(rest) = base.strip_prefix("https://") {
        return Ok(format!("wss://{rest}/api/ws"));
    }

    Err(CliError::InvalidBaseUrl(base_url.to_owned()))
}

pub fn api_url(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}

/// Connect, wait for `session:connected`, and join `board_id`.
/// Returns the stream and the join reply.
pub async fn connect_and_join(base_url: &str, board_id: Uuid) -> Result<(WsStream, Frame), CliError> {
    let (mut stream, _) = connect_async(ws_url(base_url)?).await?;
    wait_for_session_connected(&mut stream).await?;

    let join = Frame::request(syscall::BOARD_JOIN, Data::new()).with_board_id(board_id);
    send_frame(&mut stream, &join).await?;
    let joined = wait_for_terminal_response(&mut stream, &join.id, syscall::BOARD_JOIN).await?;
    Ok((stream, joined))
}

pub async fn send_frame(stream: &mut WsStream, frame: &Frame) -> Result<(), CliError> {
    stream.send(Message::Binary(frames::encode_frame(frame).into())).await?;
    Ok(())
}

async fn wait_for_session_connected(stream: &mut WsStream) -> Result<(), CliError> {
    let fut = async {
        loop {
            let frame = recv_next(stream).await?;
            if frame.syscall == syscall::SESSION_CONNECTED {
                return Ok(());
            }
        }
    };
    tokio::time::timeout(SESSION_TIMEOUT, fut)
        .await
        .map_err(|_| CliError::Timeout(syscall::SESSION_CONNECTED))?
}

/// Skip frames until the terminal reply to `request_id` arrives.
pub async fn wait_for_terminal_response(
    stream: &mut WsStream,
    request_id: &str,
    label: &'static str,
) -> Result<Frame, CliError> {
    let fut = async {
        loop {
            let frame = recv_next(stream).await?;
            if frame.parent_id.as_deref() != Some(request_id) || !frame.status.is_terminal() {
                continue;
            }
            if frame.status == Status::Error {
                return Err(CliError::ServerError {
                    syscall: frame.syscall.clone(),
                    message: frame.error_message().unwrap_or("unknown websocket error").to_owned(),
                });
            }
            return Ok(frame);
        }
    };
    tokio::time::timeout(REPLY_TIMEOUT, fut)
        .await
        .map_err(|_| CliError::Timeout(label))?
}

/// Next binary frame. Text, ping and pong messages are skipped.
pub async fn recv_next(stream: &mut WsStream) -> Result<Frame, CliError> {
    loop {
        let Some(message) = stream.next().await else {
            return Err(CliError::WsClosed);
        };
        match message? {
            Message::Binary(bytes) => return frames::decode_frame(&bytes).map_err(CliError::from),
            Message::Close(_) => return Err(CliError::WsClosed),
            _ => {}
        }
    }
}

#[cfg(test)]
#[path = "wire_test.rs"]
mod tests;

//! WebSocket 终端处理器
//!
//! 协议：
//! - 第一帧为文本帧，内容为打开请求（主机凭据 + rows/cols）
//! - 之后 `{"type":"resize","rows":R,"cols":C}` 调整尺寸，`{"type":"close"}` 主动关闭，
//!   其余文本帧和二进制帧都按原始输入处理
//! - 服务端以二进制帧发送终端输出；出错时发送一条 `{"type":"error","message":…}` 后关闭

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    Extension,
};
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::middleware::{AppState, CallerId};
use crate::models::batch::TerminalOpenRequest;
use crate::realtime::{ClientEvent, ServerEvent};
use crate::ssh::{Credential, TerminalSize};

/// 等待打开请求的时间上限
const OPEN_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// 文本控制消息
#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ControlMessage {
    Resize { rows: u16, cols: u16 },
    Close,
}

/// 发往客户端的错误帧
#[derive(Debug, Serialize)]
struct ErrorFrame<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    message: &'a str,
}

/// 升级为 WebSocket 终端会话
pub async fn terminal_ws(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerId>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(state, caller, socket))
}

async fn handle_socket(state: Arc<AppState>, caller: CallerId, socket: WebSocket) {
    let (sink, stream) = socket.split();
    serve_terminal(state, caller, sink, stream, OPEN_REQUEST_TIMEOUT).await;
}

/// 在一条已建立的帧流上运行终端会话
async fn serve_terminal<K, S>(
    state: Arc<AppState>,
    caller: CallerId,
    mut sink: K,
    mut stream: S,
    open_timeout: Duration,
) where
    K: Sink<Message, Error = axum::Error> + Unpin + Send,
    S: Stream<Item = Result<Message, axum::Error>> + Unpin + Send,
{
    let request = match timeout(open_timeout, read_open_request(&mut stream)).await {
        Ok(Ok(Some(request))) => request,
        Ok(Ok(None)) => {
            debug!(caller = %caller.0, "Client left before opening a terminal");
            return;
        }
        Ok(Err(message)) => {
            send_error_and_close(&mut sink, &message).await;
            return;
        }
        Err(_) => {
            send_error_and_close(&mut sink, "timed out waiting for open request").await;
            return;
        }
    };

    let size = request.size();
    let credential = match Credential::try_from(request.node) {
        Ok(credential) => credential,
        Err(e) => {
            send_error_and_close(&mut sink, &format!("Malformed credential: {}", e)).await;
            return;
        }
    };

    info!(caller = %caller.0, target = %credential.target(), "Terminal session requested");

    let input = stream.filter_map(|frame| future::ready(client_event(frame)));
    let output = sink.with(|event: ServerEvent| {
        future::ready(Ok::<_, axum::Error>(server_frame(event)))
    });

    let summary = state
        .terminal_bridge
        .run(credential, size, input, output)
        .await;

    info!(
        caller = %caller.0,
        target = %summary.target,
        reason = ?summary.reason,
        "Terminal websocket finished"
    );
}

/// 读取第一帧打开请求；客户端在此之前断开时返回 Ok(None)
async fn read_open_request<S>(stream: &mut S) -> Result<Option<TerminalOpenRequest>, String>
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                return serde_json::from_str::<TerminalOpenRequest>(text.as_str())
                    .map(Some)
                    .map_err(|e| format!("invalid open request: {}", e));
            }
            Ok(Message::Binary(_)) => {
                return Err("first frame must be a JSON open request".to_string());
            }
            Ok(Message::Close(_)) => return Ok(None),
            Ok(_) => continue,
            Err(e) => {
                warn!(error = %e, "WebSocket error before open request");
                return Ok(None);
            }
        }
    }
    Ok(None)
}

/// 将客户端帧转换为终端事件；心跳帧返回 None
fn client_event(frame: Result<Message, axum::Error>) -> Option<ClientEvent> {
    match frame {
        Ok(Message::Text(text)) => match serde_json::from_str::<ControlMessage>(text.as_str()) {
            Ok(ControlMessage::Resize { rows, cols }) => {
                Some(ClientEvent::Resize(TerminalSize::new(rows, cols)))
            }
            Ok(ControlMessage::Close) => Some(ClientEvent::Close),
            Err(_) => Some(ClientEvent::Input(text.as_str().as_bytes().to_vec())),
        },
        Ok(Message::Binary(bytes)) => Some(ClientEvent::Input(bytes.to_vec())),
        Ok(Message::Close(_)) => Some(ClientEvent::Close),
        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => None,
        Err(e) => {
            debug!(error = %e, "WebSocket read failed");
            Some(ClientEvent::Close)
        }
    }
}

/// 将终端事件转换为服务端帧
fn server_frame(event: ServerEvent) -> Message {
    match event {
        ServerEvent::Output(bytes) => Message::Binary(bytes.into()),
        ServerEvent::Error(message) => Message::Text(error_text(&message).into()),
    }
}

fn error_text(message: &str) -> String {
    serde_json::to_string(&ErrorFrame {
        kind: "error",
        message,
    })
    .unwrap_or_else(|_| r#"{"type":"error","message":"internal error"}"#.to_string())
}

async fn send_error_and_close<S>(sink: &mut S, message: &str)
where
    S: Sink<Message> + Unpin,
{
    warn!(message = %message, "Refusing terminal session");
    let _ = sink.send(Message::Text(error_text(message).into())).await;
    let _ = sink.close().await;
}

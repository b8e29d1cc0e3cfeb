//! grpc-websockets transport.
//!
//! # Responsibilities
//! - Complete the WebSocket handshake (axum) with the `grpc-websockets` subprotocol
//! - Turn the client's header message and data messages into a gRPC-Web request
//! - Stream the gRPC-Web response back as binary messages
//! - Keep the socket alive with pings when configured
//!
//! # Data Flow
//! ```text
//! client → [header block] [0|data]* [1]        → POST request → tonic-web → continuation
//! client ← [0x80|len|headers] [grpc-web body]* ← gRPC-Web response
//! ```
//!
//! # Design Decisions
//! - gRPC-Web framing (including the trailer frame) comes from tonic-web untouched
//! - Text (base64) format is refused; browsers use binary over WebSockets
//! - Response status codes are not transmitted, only headers
//! - Only finish-send ends the request body cleanly. A client that goes away
//!   earlier turns into a body error, so the upstream stream is reset
//! - The socket is read for the whole session; a disconnect aborts the call

use std::fmt::Display;
use std::time::Duration;

use axum::body::Body;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::FromRequestParts;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, Request, Response, Uri};
use axum::response::IntoResponse;
use bytes::{BufMut, Bytes, BytesMut};
use futures_util::stream::{self, SplitStream};
use futures_util::{SinkExt, StreamExt};
use http_body_util::BodyExt;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tower::{BoxError, Service};
use tracing::Instrument;

use crate::bridge::classify::GRPC_WEBSOCKETS_PROTOCOL;
use crate::bridge::grpc_web;
use crate::http::X_REQUEST_ID;
use crate::observability::metrics;

/// Flag byte of the frame that carries response headers.
pub const HEADER_FRAME_FLAG: u8 = 0x80;

/// First byte of a client message signalling the end of the request stream.
pub const CLIENT_FINISH_SEND: u8 = 1;

const GRPC_WEB_TEXT_CONTENT_TYPE: &str = "application/grpc-web-text";
const DEFAULT_CONTENT_TYPE: &str = "application/grpc-web+proto";

/// Client data messages buffered ahead of the upstream.
const REQUEST_BUFFER: usize = 16;

/// Errors that end a grpc-websockets session.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Socket closed (or sent something else) before the header block.
    #[error("client did not send request headers")]
    MissingHeaders,

    /// A header line could not be parsed.
    #[error("invalid header line: {0:?}")]
    InvalidHeader(String),

    /// Base64 text format was requested.
    #[error("grpc-web-text is not supported over websockets")]
    TextFormat,

    /// The client closed or dropped the socket before the call completed.
    #[error("client went away before the call completed")]
    ClientAborted,

    /// Response headers do not fit the 32-bit frame length.
    #[error("response header block too large: {0} bytes")]
    HeadersTooLarge(usize),

    /// The socket or the response body failed.
    #[error("transport error: {0}")]
    Transport(#[from] axum::Error),

    /// The continuation returned an error.
    #[error("downstream error: {0}")]
    Downstream(String),
}

impl BridgeError {
    fn close_code(&self) -> u16 {
        match self {
            BridgeError::MissingHeaders | BridgeError::InvalidHeader(_) => close_code::PROTOCOL,
            BridgeError::TextFormat => close_code::UNSUPPORTED,
            BridgeError::ClientAborted => close_code::AWAY,
            BridgeError::HeadersTooLarge(_)
            | BridgeError::Transport(_)
            | BridgeError::Downstream(_) => close_code::ERROR,
        }
    }
}

/// Upgrade `req` and serve it as a grpc-websockets session against `continuation`.
///
/// Returns the handshake response immediately; the session runs on the
/// upgraded connection inside the current request span. Handshake rejections
/// are returned as-is.
pub async fn bridge<S>(continuation: S, req: Request<Body>, ping: Option<Duration>) -> Response<Body>
where
    S: Service<Request<Body>, Response = Response<Body>> + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError> + Display + Send + 'static,
{
    let (mut parts, _body) = req.into_parts();
    let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            tracing::debug!(error = %rejection, "grpc-websockets handshake rejected");
            return rejection.into_response();
        }
    };

    let uri = parts.uri;
    let request_id = parts.headers.get(X_REQUEST_ID).cloned();
    let span = tracing::Span::current();
    upgrade
        .protocols([GRPC_WEBSOCKETS_PROTOCOL])
        .on_upgrade(move |socket| {
            async move {
                let _session = metrics::WebSocketSession::open();
                tracing::debug!(path = %uri.path(), "grpc-websockets session started");
                serve_socket(socket, continuation, uri, request_id, ping).await;
            }
            .instrument(span)
        })
}

async fn serve_socket<S>(
    socket: WebSocket,
    continuation: S,
    uri: Uri,
    request_id: Option<HeaderValue>,
    ping: Option<Duration>,
) where
    S: Service<Request<Body>, Response = Response<Body>> + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError> + Display + Send + 'static,
{
    let (mut sink, mut stream) = socket.split();
    let mut keepalive = ping.map(keepalive_interval);

    let result = async {
        let headers = loop {
            tokio::select! {
                headers = read_headers(&mut stream) => break headers?,
                _ = tick(&mut keepalive) => sink.send(Message::Ping(Bytes::new())).await?,
            }
        };

        let (data_tx, data_rx) = mpsc::channel(REQUEST_BUFFER);
        let (finished_tx, finished_rx) = oneshot::channel();
        let request = build_request(uri, headers, request_id, request_body(data_rx, finished_rx))?;

        let client = read_client(stream, data_tx, finished_tx);
        tokio::pin!(client);

        let call = grpc_web::bridge(continuation, request);
        tokio::pin!(call);
        let response = loop {
            tokio::select! {
                response = &mut call => {
                    break response.map_err(|e| BridgeError::Downstream(e.to_string()))?
                }
                gone = &mut client => return Err(gone),
                _ = tick(&mut keepalive) => sink.send(Message::Ping(Bytes::new())).await?,
            }
        };

        let (parts, mut body) = response.into_parts();
        sink.send(Message::Binary(encode_header_frame(&parts.headers)?))
            .await?;

        loop {
            tokio::select! {
                frame = body.frame() => match frame {
                    Some(Ok(frame)) => {
                        if let Ok(data) = frame.into_data() {
                            if !data.is_empty() {
                                sink.send(Message::Binary(data)).await?;
                            }
                        }
                    }
                    Some(Err(e)) => return Err(BridgeError::Transport(e)),
                    None => break,
                },
                gone = &mut client => return Err(gone),
                _ = tick(&mut keepalive) => sink.send(Message::Ping(Bytes::new())).await?,
            }
        }
        Ok::<_, BridgeError>(())
    }
    .await;

    let close = match result {
        Ok(()) => CloseFrame {
            code: close_code::NORMAL,
            reason: "".into(),
        },
        Err(BridgeError::ClientAborted) => {
            tracing::debug!("grpc-websockets client went away, call aborted");
            return;
        }
        Err(e) => {
            tracing::warn!(error = %e, "grpc-websockets session failed");
            CloseFrame {
                code: e.close_code(),
                reason: e.to_string().into(),
            }
        }
    };
    if let Err(e) = sink.send(Message::Close(Some(close))).await {
        tracing::debug!(error = %e, "failed to send close frame");
    }
}

fn keepalive_interval(every: Duration) -> Interval {
    let mut interval = time::interval_at(Instant::now() + every, every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn tick(keepalive: &mut Option<Interval>) {
    match keepalive {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn read_headers(stream: &mut SplitStream<WebSocket>) -> Result<HeaderMap, BridgeError> {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => return parse_header_block(text.as_str().as_bytes()),
            Some(Ok(Message::Binary(bytes))) => return parse_header_block(&bytes),
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) | None => return Err(BridgeError::MissingHeaders),
            Some(Err(e)) => return Err(BridgeError::Transport(e)),
        }
    }
}

/// Pumps client data messages into the request body until finish-send, then
/// keeps reading so a disconnect is noticed. Resolves once the client is gone.
async fn read_client(
    mut stream: SplitStream<WebSocket>,
    data: mpsc::Sender<Bytes>,
    finished: oneshot::Sender<()>,
) -> BridgeError {
    let mut sending = Some((data, finished));
    loop {
        let bytes = match stream.next().await {
            Some(Ok(Message::Binary(bytes))) => bytes,
            Some(Ok(Message::Close(_))) | None => return BridgeError::ClientAborted,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                tracing::debug!(error = %e, "grpc-websockets read failed");
                return BridgeError::ClientAborted;
            }
        };
        let Some((data, _)) = &sending else {
            continue;
        };
        match bytes.first() {
            None => {}
            Some(&CLIENT_FINISH_SEND) => {
                if let Some((_, finished)) = sending.take() {
                    let _ = finished.send(());
                }
            }
            Some(_) => {
                if data.send(bytes.slice(1..)).await.is_err() {
                    // Upstream stopped reading the body.
                    sending = None;
                }
            }
        }
    }
}

enum ClientEvent {
    Finished(bool),
    Data(Option<Bytes>),
}

type BodyState = (mpsc::Receiver<Bytes>, Option<oneshot::Receiver<()>>);

/// Request body fed by [`read_client`].
///
/// Ends cleanly only once finish-send was seen and buffered data is drained.
/// If the reader goes away first the body yields [`BridgeError::ClientAborted`].
fn request_body(data: mpsc::Receiver<Bytes>, finished: oneshot::Receiver<()>) -> Body {
    let initial: Option<BodyState> = Some((data, Some(finished)));
    let chunks = stream::unfold(initial, |state| async move {
        let (mut data, mut finished) = state?;
        loop {
            let event = match finished.as_mut() {
                Some(signal) => tokio::select! {
                    biased;
                    sent = signal => ClientEvent::Finished(sent.is_ok()),
                    chunk = data.recv() => ClientEvent::Data(chunk),
                },
                None => ClientEvent::Data(data.recv().await),
            };
            match event {
                ClientEvent::Finished(true) => finished = None,
                ClientEvent::Finished(false) => return Some((Err(BridgeError::ClientAborted), None)),
                ClientEvent::Data(Some(chunk)) => return Some((Ok(chunk), Some((data, finished)))),
                ClientEvent::Data(None) if finished.is_none() => return None,
                ClientEvent::Data(None) => return Some((Err(BridgeError::ClientAborted), None)),
            }
        }
    });
    Body::from_stream(chunks)
}

fn build_request(
    uri: Uri,
    mut headers: HeaderMap,
    request_id: Option<HeaderValue>,
    body: Body,
) -> Result<Request<Body>, BridgeError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    match content_type {
        Some(ct) if ct.starts_with(GRPC_WEB_TEXT_CONTENT_TYPE) => return Err(BridgeError::TextFormat),
        Some(_) => {}
        None => {
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(DEFAULT_CONTENT_TYPE));
        }
    }
    if let Some(id) = request_id {
        headers.entry(X_REQUEST_ID).or_insert(id);
    }

    let mut request = Request::new(body);
    *request.method_mut() = Method::POST;
    *request.uri_mut() = uri;
    *request.headers_mut() = headers;
    Ok(request)
}

/// Parse a `name: value` block separated by CRLF (bare LF accepted).
pub fn parse_header_block(raw: &[u8]) -> Result<HeaderMap, BridgeError> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| BridgeError::InvalidHeader(String::from_utf8_lossy(raw).into_owned()))?;

    let mut headers = HeaderMap::new();
    for line in text.split('\n') {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| BridgeError::InvalidHeader(line.to_string()))?;
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|_| BridgeError::InvalidHeader(line.to_string()))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|_| BridgeError::InvalidHeader(line.to_string()))?;
        headers.append(name, value);
    }
    Ok(headers)
}

/// Encode response headers as a flagged, length-prefixed frame.
pub fn encode_header_frame(headers: &HeaderMap) -> Result<Bytes, BridgeError> {
    let mut block = BytesMut::new();
    for (name, value) in headers {
        block.put_slice(name.as_str().as_bytes());
        block.put_slice(b": ");
        block.put_slice(value.as_bytes());
        block.put_slice(b"\r\n");
    }

    let len = frame_length(block.len())?;
    let mut frame = BytesMut::with_capacity(5 + block.len());
    frame.put_u8(HEADER_FRAME_FLAG);
    frame.put_u32(len);
    frame.put(block);
    Ok(frame.freeze())
}

fn frame_length(len: usize) -> Result<u32, BridgeError> {
    u32::try_from(len).map_err(|_| BridgeError::HeadersTooLarge(len))
}

//! Shared utilities for integration testing.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;

use bytes::Bytes;
use futures_util::stream;
use http_body_util::{combinators::BoxBody, BodyExt, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use grpc_web_bridge::config::BridgeConfig;
use grpc_web_bridge::{HttpServer, Shutdown};

type EchoBody = BoxBody<Bytes, Infallible>;

async fn spawn_upstream<F, Fut>(handler: F) -> SocketAddr
where
    F: Fn(Request<Incoming>) -> Fut + Clone + Send + 'static,
    Fut: Future<Output = Result<Response<EchoBody>, Infallible>> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        let _ = hyper::server::conn::http2::Builder::new(TokioExecutor::new())
                            .serve_connection(TokioIo::new(stream), service_fn(handler))
                            .await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// Start an h2c upstream that answers like a gRPC server.
///
/// `application/grpc*` requests get their body echoed back followed by
/// `grpc-status: 0` trailers. Anything else gets `plain:<path>`. Every
/// response reports the received content type in `x-upstream-content-type`
/// and the received request id in `x-upstream-request-id`.
pub async fn start_grpc_echo_upstream() -> SocketAddr {
    spawn_upstream(echo).await
}

/// Start an h2c gRPC upstream that reports, per call, whether the request
/// body ended cleanly (`true`) or with an error (`false`).
#[allow(dead_code)]
pub async fn start_recording_upstream() -> (SocketAddr, mpsc::UnboundedReceiver<bool>) {
    let (outcomes, rx) = mpsc::unbounded_channel();
    let addr = spawn_upstream(move |req: Request<Incoming>| {
        let outcomes = outcomes.clone();
        async move {
            let clean = req.into_body().collect().await.is_ok();
            let _ = outcomes.send(clean);
            Ok(grpc_response(Response::builder(), Bytes::new()))
        }
    })
    .await;
    (addr, rx)
}

/// Start an h2c gRPC upstream that sends response headers and then never
/// writes. A message arrives on the receiver when a response body is dropped.
#[allow(dead_code)]
pub async fn start_stalled_upstream() -> (SocketAddr, mpsc::UnboundedReceiver<()>) {
    let (dropped, rx) = mpsc::unbounded_channel();
    let addr = spawn_upstream(move |_req: Request<Incoming>| {
        let guard = DropSignal(dropped.clone());
        async move {
            let frames = stream::unfold(guard, |guard| async move {
                std::future::pending::<()>().await;
                Some((Ok::<_, Infallible>(Frame::data(Bytes::new())), guard))
            });
            let response = Response::builder()
                .status(200)
                .header(CONTENT_TYPE, "application/grpc")
                .body(StreamBody::new(frames).boxed())
                .unwrap();
            Ok(response)
        }
    })
    .await;
    (addr, rx)
}

struct DropSignal(mpsc::UnboundedSender<()>);

impl Drop for DropSignal {
    fn drop(&mut self) {
        let _ = self.0.send(());
    }
}

fn grpc_response(builder: hyper::http::response::Builder, payload: Bytes) -> Response<EchoBody> {
    let mut trailers = HeaderMap::new();
    trailers.insert("grpc-status", HeaderValue::from_static("0"));
    let frames: Vec<Result<Frame<Bytes>, Infallible>> =
        vec![Ok(Frame::data(payload)), Ok(Frame::trailers(trailers))];
    builder
        .status(200)
        .header(CONTENT_TYPE, "application/grpc")
        .body(StreamBody::new(stream::iter(frames)).boxed())
        .unwrap()
}

async fn echo(req: Request<Incoming>) -> Result<Response<EchoBody>, Infallible> {
    let content_type = req.headers().get(CONTENT_TYPE).cloned();
    let request_id = req.headers().get("x-request-id").cloned();
    let path = req.uri().path().to_string();
    let payload = req
        .into_body()
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .unwrap_or_default();

    let is_grpc = content_type
        .as_ref()
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("application/grpc"))
        .unwrap_or(false);

    let mut builder = Response::builder();
    if let Some(ct) = content_type {
        builder = builder.header("x-upstream-content-type", ct);
    }
    if let Some(id) = request_id {
        builder = builder.header("x-upstream-request-id", id);
    }

    if is_grpc {
        return Ok(grpc_response(builder, payload));
    }

    let frames: Vec<Result<Frame<Bytes>, Infallible>> =
        vec![Ok(Frame::data(Bytes::from(format!("plain:{path}"))))];
    Ok(builder
        .status(200)
        .header(CONTENT_TYPE, "text/plain")
        .body(StreamBody::new(stream::iter(frames)).boxed())
        .unwrap())
}

/// Start the bridge in front of `upstream`. Returns its address.
pub async fn start_bridge(upstream: SocketAddr, mut config: BridgeConfig, shutdown: &Shutdown) -> SocketAddr {
    config.upstream.address = upstream.to_string();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    config.listener.bind_address = addr.to_string();

    let server = HttpServer::new(config).unwrap();
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    addr
}

/// Length-prefixed, uncompressed gRPC message frame.
pub fn grpc_frame(message: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(5 + message.len());
    frame.push(0);
    frame.extend_from_slice(&(message.len() as u32).to_be_bytes());
    frame.extend_from_slice(message);
    frame
}

/// Find a gRPC-Web trailer frame (flag 0x80) after `offset` and return its text.
#[allow(dead_code)]
pub fn trailer_text(body: &[u8], offset: usize) -> Option<String> {
    let rest = body.get(offset..)?;
    if rest.first() != Some(&0x80) || rest.len() < 5 {
        return None;
    }
    let len = u32::from_be_bytes([rest[1], rest[2], rest[3], rest[4]]) as usize;
    let block = rest.get(5..5 + len)?;
    Some(String::from_utf8_lossy(block).into_owned())
}

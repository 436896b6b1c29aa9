//! # HTTP Server
//!
//! Gateway adapter built on Hyper and Tokio: turns wire requests into
//! `RawRequest`s for the dispatcher and writes its `RawResponse`s back.
//!
//! ## Key Features
//!
//! - One tokio task per connection
//! - Each request dispatched on its own task, so a client disconnect never
//!   cancels a handler midway
//! - Graceful shutdown on Ctrl-C with a drain timeout
//! - Connection keep-alive support
//! - Request body size limit (413)

use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::request::RawRequest;
use crate::response::RawResponse;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info};

/// HTTP server driving a dispatcher
pub struct Server {
    config: ServerConfig,
    dispatcher: Arc<Dispatcher>,
}

impl Server {
    /// Create a server for a fully registered dispatcher
    #[must_use]
    pub fn new(dispatcher: Dispatcher, config: ServerConfig) -> Self {
        Self {
            config,
            dispatcher: Arc::new(dispatcher),
        }
    }

    /// Bind the server to an address
    #[must_use]
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.config.address = addr;
        self
    }

    /// Server configuration
    #[must_use]
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind the configured address and serve until Ctrl-C
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the socket cannot be bound or accepting fails.
    pub async fn serve(&self) -> Result<()> {
        let addr = self.config.address;

        let socket = if addr.is_ipv4() {
            tokio::net::TcpSocket::new_v4()?
        } else {
            tokio::net::TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        #[cfg(not(windows))]
        {
            socket.set_reuseport(true)?;
        }
        socket.bind(addr)?;
        let listener = socket.listen(1024)?;

        self.serve_on(listener, shutdown_signal()).await
    }

    /// Serve on an existing listener until `shutdown` resolves, then wait up
    /// to the shutdown timeout for open connections to finish
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if accepting fails.
    pub async fn serve_on(
        &self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()>,
    ) -> Result<()> {
        info!("Server listening on http://{}", listener.local_addr()?);

        let active = Arc::new(AtomicUsize::new(0));
        let max_body_size = self.config.max_body_size;
        let keep_alive = self.config.keep_alive;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    let (stream, remote_addr) = accept_result?;
                    let io = TokioIo::new(stream);
                    let dispatcher = Arc::clone(&self.dispatcher);
                    let active = Arc::clone(&active);

                    active.fetch_add(1, Ordering::Relaxed);
                    tokio::task::spawn(async move {
                        let service = service_fn(move |req| {
                            let dispatcher = Arc::clone(&dispatcher);
                            handle_request(req, dispatcher, remote_addr, max_body_size)
                        });
                        if let Err(err) = http1::Builder::new()
                            .keep_alive(keep_alive)
                            .serve_connection(io, service)
                            .await
                        {
                            error!("Error serving connection: {:?}", err);
                        }
                        active.fetch_sub(1, Ordering::Relaxed);
                    });
                }
                () = &mut shutdown => {
                    info!("Shutdown signal received, stopping server...");
                    break;
                }
            }
        }

        let drain = async {
            while active.load(Ordering::Relaxed) > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        if tokio::time::timeout(self.config.shutdown_timeout(), drain)
            .await
            .is_err()
        {
            info!(
                open = active.load(Ordering::Relaxed),
                "shutdown timeout reached with connections still open"
            );
        }
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to install CTRL+C signal handler: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn handle_request(
    req: Request<Incoming>,
    dispatcher: Arc<Dispatcher>,
    remote_addr: SocketAddr,
    max_body_size: usize,
) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let version = format!("{:?}", req.version());

    let response = match to_raw_request(req, remote_addr, max_body_size).await {
        Ok(raw) => match tokio::spawn(async move { dispatcher.handle(raw).await }).await {
            Ok(response) => into_hyper(response),
            Err(e) => {
                error!("Dispatch task failed: {}", e);
                plain(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
            }
        },
        Err(Error::PayloadTooLarge { limit, actual }) => {
            info!(limit, actual, "request body too large");
            plain(StatusCode::PAYLOAD_TOO_LARGE, "Payload Too Large")
        }
        Err(e) => {
            error!("Failed to read request: {}", e);
            plain(StatusCode::BAD_REQUEST, "Bad Request")
        }
    };

    info!(
        "    {} - \"{} {} {}\" {}",
        remote_addr,
        method,
        path,
        version,
        response.status()
    );
    Ok(response)
}

/// Collect a hyper request into a `RawRequest`, enforcing the body limit
async fn to_raw_request(
    req: Request<Incoming>,
    remote_addr: SocketAddr,
    max_body_size: usize,
) -> Result<RawRequest> {
    let declared = req
        .headers()
        .get(hyper::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if let Some(content_len) = declared {
        if content_len > max_body_size {
            return Err(Error::PayloadTooLarge {
                limit: max_body_size,
                actual: content_len,
            });
        }
    }

    let (parts, body) = req.into_parts();
    let body = body.collect().await?.to_bytes();
    if body.len() > max_body_size {
        return Err(Error::PayloadTooLarge {
            limit: max_body_size,
            actual: body.len(),
        });
    }

    Ok(RawRequest {
        method: parts.method.as_str().to_string(),
        path: parts.uri.path().to_string(),
        query: parts.uri.query().map(String::from),
        headers: parts.headers,
        body,
        remote_addr: Some(remote_addr),
    })
}

/// Convert a dispatcher response to hyper
fn into_hyper(response: RawResponse) -> Response<Full<Bytes>> {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut builder = Response::builder().status(status);
    for (name, value) in &response.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
        .body(Full::new(response.body))
        .unwrap_or_else(|e| {
            error!("Invalid response header: {}", e);
            plain(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        })
}

fn plain(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::Reply;
    use std::sync::atomic::AtomicBool;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::{oneshot, Notify};

    #[test]
    fn test_into_hyper_keeps_headers() {
        let raw = RawResponse {
            status: 302,
            headers: vec![
                ("Location".to_string(), "/".to_string()),
                ("Set-Cookie".to_string(), "a=1".to_string()),
                ("Set-Cookie".to_string(), "b=2".to_string()),
            ],
            body: Bytes::new(),
        };
        let response = into_hyper(raw);
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers().get_all("set-cookie").iter().count(), 2);
    }

    #[test]
    fn test_into_hyper_invalid_header_is_500() {
        let raw = RawResponse {
            status: 200,
            headers: vec![("Bad Header".to_string(), "x".to_string())],
            body: Bytes::new(),
        };
        assert_eq!(
            into_hyper(raw).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    async fn roundtrip(addr: SocketAddr, request: &str) -> String {
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut out = String::new();
        stream.read_to_string(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn test_serve_over_tcp() {
        let mut dispatcher = Dispatcher::new();
        dispatcher
            .get("/hello/:name", |args: Vec<String>| async move {
                Ok::<_, Error>(Reply::from(format!("hello {}", args[0])))
            })
            .unwrap();
        let config = ServerConfig {
            max_body_size: 8,
            shutdown_timeout_secs: 1,
            ..ServerConfig::default()
        };
        let server = Arc::new(Server::new(dispatcher, config));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn({
            let server = Arc::clone(&server);
            async move {
                server
                    .serve_on(listener, async {
                        rx.await.ok();
                    })
                    .await
            }
        });

        let out = roundtrip(
            addr,
            "GET /hello/bob HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(out.starts_with("HTTP/1.1 200 OK"));
        assert!(out.to_ascii_lowercase().contains("x-powered-by: warpgate/"));
        assert!(out.ends_with("hello bob"));

        let out = roundtrip(
            addr,
            "POST /hello/bob HTTP/1.1\r\nHost: localhost\r\nContent-Length: 100\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(out.starts_with("HTTP/1.1 413"));

        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_handler_finishes_after_client_disconnect() {
        let finished = Arc::new(AtomicBool::new(false));
        let notify = Arc::new(Notify::new());
        let mut dispatcher = Dispatcher::new();
        dispatcher
            .get("/slow", {
                let finished = Arc::clone(&finished);
                let notify = Arc::clone(&notify);
                move |_args: Vec<String>| {
                    let finished = Arc::clone(&finished);
                    let notify = Arc::clone(&notify);
                    async move {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        finished.store(true, Ordering::SeqCst);
                        notify.notify_one();
                        Ok::<_, Error>(Reply::Empty)
                    }
                }
            })
            .unwrap();
        let server = Arc::new(Server::new(dispatcher, ServerConfig::default()));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn({
            let server = Arc::clone(&server);
            async move {
                server
                    .serve_on(listener, async {
                        rx.await.ok();
                    })
                    .await
            }
        });

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /slow HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        drop(stream);

        tokio::time::timeout(Duration::from_secs(2), notify.notified())
            .await
            .unwrap();
        assert!(finished.load(Ordering::SeqCst));

        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }
}

//! Socket transport: one connection, one exchange at a time.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use http::{Method, Request, Response};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, OwnedMutexGuard, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::auth::{AuthState, Credentials};
use crate::client::HttpClient;
use crate::config::TransportConfig;
use crate::error::HttpConnError;
use crate::framing::PrivateProtocolHeader;
use crate::server::HttpServer;
use crate::wire;

/// Any bidirectional byte stream the transport can own (TCP, TLS, duplex).
pub trait Connection: AsyncRead + AsyncWrite + Send + Sync + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Sync + Unpin> Connection for T {}

type Stream = BufReader<Box<dyn Connection>>;

struct Inner {
    /// `None` once closed.
    stream: Option<Stream>,
    config: TransportConfig,
    credentials: Credentials,
    /// Framing applied when we act as the HTTP client.
    client_header: Option<PrivateProtocolHeader>,
    /// Framing applied when we act as the HTTP server.
    server_header: Option<PrivateProtocolHeader>,
}

struct Shared {
    closed: CancellationToken,
    closing: AtomicBool,
    auth_tx: watch::Sender<AuthState>,
}

/// Owns exactly one physical connection.
///
/// All traffic goes through a [`TransportGuard`] obtained from [`lock`],
/// which serializes exchanges. [`close`] preempts any exchange in flight.
///
/// [`lock`]: SocketTransport::lock
/// [`close`]: SocketTransport::close
pub struct SocketTransport {
    inner: Arc<Mutex<Inner>>,
    shared: Arc<Shared>,
}

impl SocketTransport {
    pub fn new<C: Connection + 'static>(conn: C) -> Self {
        Self::with_config(conn, TransportConfig::default())
    }

    pub fn with_config<C: Connection + 'static>(conn: C, config: TransportConfig) -> Self {
        let (auth_tx, _) = watch::channel(AuthState::default());
        Self {
            inner: Arc::new(Mutex::new(Inner {
                stream: Some(BufReader::new(Box::new(conn))),
                config,
                credentials: Credentials::none(),
                client_header: None,
                server_header: None,
            })),
            shared: Arc::new(Shared {
                closed: CancellationToken::new(),
                closing: AtomicBool::new(false),
                auth_tx,
            }),
        }
    }

    /// Waits for exclusive use of the connection.
    pub async fn lock(&self) -> TransportGuard {
        TransportGuard {
            inner: self.inner.clone().lock_owned().await,
            shared: self.shared.clone(),
        }
    }

    /// Receiver notified on every actual credential change.
    pub fn subscribe_auth(&self) -> watch::Receiver<AuthState> {
        self.shared.auth_tx.subscribe()
    }

    /// Current authentication state without taking the lock.
    pub fn auth_state(&self) -> AuthState {
        *self.shared.auth_tx.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closing.load(Ordering::Acquire)
    }

    /// Resolves once the transport has been closed.
    pub async fn closed(&self) {
        self.shared.closed.cancelled().await
    }

    /// Closes the connection. Returns `true` only for the call that closed it.
    ///
    /// An exchange in flight on another task fails with
    /// [`HttpConnError::Closed`] and releases the lock.
    pub async fn close(&self) -> bool {
        if self.shared.closing.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.shared.closed.cancel();

        let mut inner = self.inner.lock().await;
        let limit = inner.config.write_timeout;
        if let Some(mut stream) = inner.stream.take() {
            match tokio::time::timeout(limit, stream.shutdown()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(error = %e, "shutdown failed"),
                Err(_) => debug!("shutdown timed out"),
            }
        }
        debug!("transport closed");
        true
    }
}

impl std::fmt::Debug for SocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketTransport")
            .field("closed", &self.is_closed())
            .field("auth", &self.auth_state())
            .finish()
    }
}

/// Exclusive access to a [`SocketTransport`]; released on drop.
pub struct TransportGuard {
    inner: OwnedMutexGuard<Inner>,
    shared: Arc<Shared>,
}

impl TransportGuard {
    /// Client-role view: send requests to the device.
    pub fn client(&mut self) -> HttpClient<'_> {
        HttpClient::new(self)
    }

    /// Server-role view: receive requests pushed by the device.
    pub fn server(&mut self) -> HttpServer<'_> {
        HttpServer::new(self)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.stream.is_none() || self.shared.closed.is_cancelled()
    }

    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    pub fn set_read_timeout(&mut self, timeout: Duration) {
        self.inner.config.read_timeout = timeout;
    }

    pub fn set_write_timeout(&mut self, timeout: Duration) {
        self.inner.config.write_timeout = timeout;
    }

    pub fn credentials(&self) -> &Credentials {
        &self.inner.credentials
    }

    /// Returns `true` when an authentication scheme is configured.
    pub fn is_authorized(&self) -> bool {
        self.inner.credentials.is_set()
    }

    /// Replaces the credentials. Subscribers are notified only when they
    /// actually differ; returns whether they did.
    pub fn set_credentials(&mut self, credentials: Credentials) -> bool {
        if self.inner.credentials == credentials {
            return false;
        }
        let configured = credentials.is_set();
        debug!(scheme = ?credentials.scheme, username = %credentials.username, "credentials changed");
        self.inner.credentials = credentials;
        self.shared.auth_tx.send_modify(|state| {
            state.generation += 1;
            state.configured = configured;
        });
        true
    }

    pub fn set_digest_auth(&mut self, username: &str, password: &str) -> bool {
        self.set_credentials(Credentials::digest(username, password))
    }

    pub fn set_basic_auth(&mut self, username: &str, password: &str) -> bool {
        self.set_credentials(Credentials::basic(username, password))
    }

    pub fn clear_authorization(&mut self) -> bool {
        self.set_credentials(Credentials::none())
    }

    pub fn client_header(&self) -> Option<&PrivateProtocolHeader> {
        self.inner.client_header.as_ref()
    }

    /// Framing used while acting as the client (requests out, responses in).
    pub fn set_client_header(&mut self, header: Option<PrivateProtocolHeader>) {
        self.inner.client_header = header;
    }

    pub fn server_header(&self) -> Option<&PrivateProtocolHeader> {
        self.inner.server_header.as_ref()
    }

    /// Framing used while acting as the server (requests in, responses out).
    pub fn set_server_header(&mut self, header: Option<PrivateProtocolHeader>) {
        self.inner.server_header = header;
    }

    pub(crate) async fn write_request(&mut self, req: &Request<Bytes>) -> Result<(), HttpConnError> {
        let mut out = Vec::with_capacity(256 + req.body().len());
        if let Some(header) = &self.inner.client_header {
            header.write_request_head(&mut out).await?;
        }
        wire::encode_request(req, &mut out);
        debug!(method = %req.method(), uri = %req.uri(), bytes = out.len(), "writing request");
        self.write_message(out).await
    }

    pub(crate) async fn read_response(
        &mut self,
        method: &Method,
    ) -> Result<Response<Bytes>, HttpConnError> {
        let Inner {
            stream,
            config,
            client_header,
            ..
        } = &mut *self.inner;
        let result = match stream.as_mut() {
            Some(stream) => {
                with_deadline(&self.shared.closed, config.read_timeout, async {
                    let framing = match client_header.as_ref() {
                        Some(header) => header.read_response_head(stream).await,
                        None => Ok(()),
                    };
                    let framing = unframed(framing)?;
                    let res = wire::read_response(stream, method, config).await?;
                    framing.map(|()| res)
                })
                .await
            }
            None => Err(HttpConnError::Closed),
        };
        self.check(result)
    }

    pub(crate) async fn read_request(&mut self) -> Result<Request<Bytes>, HttpConnError> {
        let Inner {
            stream,
            config,
            server_header,
            ..
        } = &mut *self.inner;
        let result = match stream.as_mut() {
            Some(stream) => {
                with_deadline(&self.shared.closed, config.read_timeout, async {
                    let framing = match server_header.as_ref() {
                        Some(header) => header.read_request_head(stream).await,
                        None => Ok(()),
                    };
                    let framing = unframed(framing)?;
                    let req = wire::read_request(stream, config).await?;
                    framing.map(|()| req)
                })
                .await
            }
            None => Err(HttpConnError::Closed),
        };
        self.check(result)
    }

    pub(crate) async fn write_response(
        &mut self,
        res: &Response<Bytes>,
    ) -> Result<(), HttpConnError> {
        let mut out = Vec::with_capacity(256 + res.body().len());
        if let Some(header) = &self.inner.server_header {
            header.write_response_head(&mut out).await?;
        }
        wire::encode_response(res, &mut out);
        debug!(status = %res.status(), bytes = out.len(), "writing response");
        self.write_message(out).await
    }

    async fn write_message(&mut self, bytes: Vec<u8>) -> Result<(), HttpConnError> {
        let limit = self.inner.config.write_timeout;
        let result = match self.inner.stream.as_mut() {
            Some(stream) => {
                with_deadline(&self.shared.closed, limit, async {
                    stream.write_all(&bytes).await?;
                    stream.flush().await?;
                    Ok(())
                })
                .await
            }
            None => Err(HttpConnError::Closed),
        };
        self.check(result)
    }

    /// Drops the connection after a fatal error so later exchanges fail fast.
    fn check<T>(&mut self, result: Result<T, HttpConnError>) -> Result<T, HttpConnError> {
        let Err(e) = &result else {
            return result;
        };
        if e.is_fatal() {
            if self.inner.stream.take().is_some() && !matches!(e, HttpConnError::Closed) {
                warn!(error = %e, "closing connection after transport failure");
            }
            self.shared.closing.store(true, Ordering::Release);
            self.shared.closed.cancel();
        }
        result
    }
}

/// Splits a prefix read result into "keep reading" and "fail now".
///
/// A prefix that was read but rejected still has its message behind it; the
/// message is consumed before the `Framing` error is reported so the next
/// exchange starts on a message boundary. Other errors stop the read.
fn unframed(
    result: Result<(), HttpConnError>,
) -> Result<Result<(), HttpConnError>, HttpConnError> {
    match result {
        Ok(()) => Ok(Ok(())),
        Err(e @ HttpConnError::Framing(_)) => Ok(Err(e)),
        Err(e) => Err(e),
    }
}

/// Runs `fut` under `limit`, preempted by transport close.
async fn with_deadline<T, F>(
    closed: &CancellationToken,
    limit: Duration,
    fut: F,
) -> Result<T, HttpConnError>
where
    F: Future<Output = Result<T, HttpConnError>>,
{
    tokio::select! {
        biased;
        _ = closed.cancelled() => Err(HttpConnError::Closed),
        result = tokio::time::timeout(limit, fut) => {
            match result {
                Ok(r) => r,
                Err(_) => Err(HttpConnError::Timeout),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};

    #[tokio::test]
    async fn credential_change_notifies_once() {
        let (a, _b) = duplex(1024);
        let transport = SocketTransport::new(a);
        let mut rx = transport.subscribe_auth();

        let mut guard = transport.lock().await;
        assert!(guard.set_digest_auth("admin", "pw"));
        assert!(!guard.set_digest_auth("admin", "pw"));
        drop(guard);

        assert!(rx.has_changed().unwrap());
        let state = *rx.borrow_and_update();
        assert_eq!(state.generation, 1);
        assert!(state.configured);
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn each_field_change_notifies() {
        let (a, _b) = duplex(1024);
        let transport = SocketTransport::new(a);

        let mut guard = transport.lock().await;
        assert!(guard.set_digest_auth("admin", "pw"));
        assert!(guard.set_digest_auth("admin", "pw2"));
        assert!(guard.set_digest_auth("root", "pw2"));
        assert!(guard.set_basic_auth("root", "pw2"));
        assert!(guard.is_authorized());
        assert!(guard.clear_authorization());
        assert!(!guard.is_authorized());
        assert!(!guard.clear_authorization());
        drop(guard);

        let state = transport.auth_state();
        assert_eq!(state.generation, 5);
        assert!(!state.configured);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_shuts_the_stream() {
        let (a, mut b) = duplex(1024);
        let transport = SocketTransport::new(a);

        assert!(transport.close().await);
        assert!(!transport.close().await);
        assert!(transport.is_closed());

        let mut buf = [0u8; 1];
        assert_eq!(b.read(&mut buf).await.unwrap(), 0);

        let mut guard = transport.lock().await;
        assert!(guard.is_closed());
        let err = guard.read_request().await.unwrap_err();
        assert!(matches!(err, HttpConnError::Closed), "{err:?}");
    }

    #[tokio::test]
    async fn read_times_out_and_poisons() {
        let (a, _b) = duplex(1024);
        let transport = SocketTransport::with_config(
            a,
            TransportConfig {
                read_timeout: Duration::from_millis(20),
                ..TransportConfig::default()
            },
        );

        let mut guard = transport.lock().await;
        let err = guard.read_response(&Method::GET).await.unwrap_err();
        assert!(matches!(err, HttpConnError::Timeout), "{err:?}");
        assert!(guard.is_closed());
        drop(guard);
        assert!(transport.is_closed());
    }

    #[tokio::test]
    async fn rejected_request_prefix_consumes_its_message() {
        let (a, mut b) = duplex(1024);
        let transport = SocketTransport::new(a);
        b.write_all(b"XXXXGET /a HTTP/1.1\r\nContent-Length: 2\r\n\r\nhiSDC\0GET /b HTTP/1.1\r\n\r\n")
            .await
            .unwrap();

        let mut guard = transport.lock().await;
        guard.set_server_header(Some(PrivateProtocolHeader {
            request_prefix: Bytes::from_static(b"SDC\0"),
            response_prefix: Bytes::new(),
            strict: true,
        }));
        let err = guard.read_request().await.unwrap_err();
        assert!(matches!(err, HttpConnError::Framing(_)), "{err:?}");
        assert!(!guard.is_closed());

        let req = guard.read_request().await.unwrap();
        assert_eq!(req.uri().path(), "/b");
    }

    #[tokio::test]
    async fn close_preempts_in_flight_read() {
        let (a, _b) = duplex(1024);
        let transport = Arc::new(SocketTransport::new(a));

        let reader = {
            let transport = transport.clone();
            tokio::spawn(async move {
                let mut guard = transport.lock().await;
                guard.read_request().await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(transport.close().await);

        let err = reader.await.unwrap().unwrap_err();
        assert!(matches!(err, HttpConnError::Closed), "{err:?}");
    }

    #[tokio::test]
    async fn closed_future_resolves_after_close() {
        let (a, _b) = duplex(64);
        let transport = Arc::new(SocketTransport::new(a));
        let waiter = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.closed().await })
        };
        transport.close().await;
        waiter.await.unwrap();
    }
}

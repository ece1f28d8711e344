//! Device sessions.
//!
//! Every session wraps one [`SocketTransport`]. A server session starts in
//! the HTTP server role for exactly one exchange (the registration push)
//! and from then on only issues requests, like a client session does.

use std::net::SocketAddr;
use std::ops::Deref;

use holosens_api::register::initiative_register;
use holosens_api::{DeviceManager, InitiativeRegisterParams};
use holosens_httpconn::{
    AuthState, Connection, Credentials, HttpConnError, SocketTransport, TransportGuard,
};
use socket2::{SockRef, TcpKeepalive};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::{KeepaliveConfig, SessionConfig};
use crate::error::SessionError;

/// Enables TCP keep-alive on `stream`.
///
/// For TLS, call this on the TCP stream before wrapping it.
pub fn apply_keepalive(stream: &TcpStream, config: &KeepaliveConfig) -> std::io::Result<()> {
    let keepalive = TcpKeepalive::new().with_time(config.period);
    SockRef::from(stream).set_tcp_keepalive(&keepalive)
}

/// One device connection plus its credentials.
pub struct Session {
    transport: SocketTransport,
    peer_addr: Option<SocketAddr>,
}

impl Session {
    /// Wraps an already established connection (TLS, duplex, ...).
    pub async fn new<C: Connection + 'static>(conn: C, config: &SessionConfig) -> Self {
        Self::build(conn, None, config).await
    }

    /// Wraps a TCP stream, enabling keep-alive first.
    pub async fn from_tcp(stream: TcpStream, config: &SessionConfig) -> Self {
        let peer_addr = stream.peer_addr().ok();
        if let Err(e) = apply_keepalive(&stream, &config.keepalive) {
            warn!(peer = ?peer_addr, error = %e, "failed to enable tcp keep-alive");
        }
        Self::build(stream, peer_addr, config).await
    }

    async fn build<C: Connection + 'static>(
        conn: C,
        peer_addr: Option<SocketAddr>,
        config: &SessionConfig,
    ) -> Self {
        let transport = SocketTransport::with_config(conn, config.transport.clone());
        transport
            .lock()
            .await
            .set_client_header(config.response_header.clone());
        Self {
            transport,
            peer_addr,
        }
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn transport(&self) -> &SocketTransport {
        &self.transport
    }

    /// Exclusive use of the connection for ad-hoc exchanges.
    pub async fn lock(&self) -> TransportGuard {
        self.transport.lock().await
    }

    /// Device management endpoints over this session.
    pub fn device(&self) -> DeviceManager<'_> {
        DeviceManager::new(&self.transport)
    }

    /// Uses Digest authentication from now on.
    pub async fn set_authorization(&self, username: &str, password: &str) -> bool {
        self.set_credentials(Credentials::digest(username, password))
            .await
    }

    /// Returns `true` if the credentials changed.
    pub async fn set_credentials(&self, credentials: Credentials) -> bool {
        self.transport.lock().await.set_credentials(credentials)
    }

    pub async fn clear_authorization(&self) -> bool {
        self.transport.lock().await.clear_authorization()
    }

    pub fn is_authorized(&self) -> bool {
        self.transport.auth_state().configured
    }

    /// Notified on every actual credential change.
    pub fn subscribe_auth(&self) -> watch::Receiver<AuthState> {
        self.transport.subscribe_auth()
    }

    /// Closes the connection. Returns `true` only for the call that closed it.
    pub async fn close(&self) -> bool {
        self.transport.close().await
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("peer_addr", &self.peer_addr)
            .field("transport", &self.transport)
            .finish()
    }
}

/// A session opened by the device, identified by its registration.
#[derive(Debug)]
pub struct ServerSession {
    session: Session,
    registration: InitiativeRegisterParams,
}

impl ServerSession {
    /// Accepts a device that dialed us over plain TCP and waits for its
    /// registration push.
    pub async fn accept(stream: TcpStream, config: &SessionConfig) -> Result<Self, SessionError> {
        Self::register(Session::from_tcp(stream, config).await).await
    }

    /// Like [`accept`](Self::accept) for an arbitrary connection, e.g. after
    /// a TLS handshake.
    pub async fn accept_connection<C: Connection + 'static>(
        conn: C,
        config: &SessionConfig,
    ) -> Result<Self, SessionError> {
        Self::register(Session::new(conn, config).await).await
    }

    /// Builds an active session from a registration already answered by
    /// another HTTP stack that has handed over the connection.
    pub async fn with_registration<C: Connection + 'static>(
        conn: C,
        registration: InitiativeRegisterParams,
        config: &SessionConfig,
    ) -> Self {
        Self {
            session: Session::new(conn, config).await,
            registration,
        }
    }

    async fn register(session: Session) -> Result<Self, SessionError> {
        let result = {
            let mut guard = session.lock().await;
            initiative_register(&mut guard).await
        };
        match result {
            Ok(registration) => {
                info!(
                    serial = %registration.serial_number,
                    device = %registration.device_name,
                    peer = ?session.peer_addr,
                    "device registered"
                );
                Ok(Self {
                    session,
                    registration,
                })
            }
            Err(e) => {
                session.close().await;
                match e {
                    HttpConnError::Json(_) | HttpConnError::Decode(_) => {
                        Err(SessionError::Registration(e.to_string()))
                    }
                    e => Err(e.into()),
                }
            }
        }
    }

    pub fn registration(&self) -> &InitiativeRegisterParams {
        &self.registration
    }

    pub fn serial_number(&self) -> &str {
        &self.registration.serial_number
    }

    pub fn session(&self) -> &Session {
        &self.session
    }
}

impl Deref for ServerSession {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.session
    }
}

/// A session we opened by dialing the device.
#[derive(Debug)]
pub struct ClientSession {
    session: Session,
}

impl ClientSession {
    pub async fn new<C: Connection + 'static>(conn: C, config: &SessionConfig) -> Self {
        Self {
            session: Session::new(conn, config).await,
        }
    }

    pub async fn from_tcp(stream: TcpStream, config: &SessionConfig) -> Self {
        Self {
            session: Session::from_tcp(stream, config).await,
        }
    }

    /// Dials `addr`, giving up after the configured write timeout.
    pub async fn connect(
        addr: impl ToSocketAddrs,
        config: &SessionConfig,
    ) -> Result<Self, SessionError> {
        let limit = config.transport.write_timeout;
        let stream = tokio::time::timeout(limit, TcpStream::connect(addr))
            .await
            .map_err(|_| HttpConnError::Timeout)??;
        debug!(peer = ?stream.peer_addr().ok(), "connected to device");
        Ok(Self::from_tcp(stream, config).await)
    }

    pub fn session(&self) -> &Session {
        &self.session
    }
}

impl Deref for ClientSession {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.session
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use tokio::io::duplex;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn response_header_is_installed_on_the_client_role() {
        let (ours, _theirs) = duplex(1024);
        let session = Session::new(ours, &SessionConfig::push_registration()).await;
        let guard = session.lock().await;
        assert_eq!(
            guard.client_header().map(|h| h.response_prefix.len()),
            Some(8)
        );
        assert!(guard.server_header().is_none());
    }

    #[tokio::test]
    async fn authorization_round_trip() {
        let (ours, _theirs) = duplex(1024);
        let session = Session::new(ours, &SessionConfig::default()).await;
        assert!(!session.is_authorized());

        assert!(session.set_authorization("ApiAdmin", "a1234567").await);
        assert!(session.is_authorized());
        assert!(!session.set_authorization("ApiAdmin", "a1234567").await);

        assert!(session.clear_authorization().await);
        assert!(!session.is_authorized());
    }

    #[tokio::test]
    async fn close_once() {
        let (ours, _theirs) = duplex(1024);
        let session = ClientSession::new(ours, &SessionConfig::default()).await;
        assert!(session.close().await);
        assert!(!session.close().await);
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn from_tcp_records_peer_and_enables_keepalive() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let dial = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        let (stream, peer) = listener.accept().await.unwrap();
        let _device = dial.await.unwrap();

        let config = SessionConfig {
            keepalive: KeepaliveConfig {
                period: Duration::from_secs(30),
            },
            ..SessionConfig::default()
        };
        let session = Session::from_tcp(stream, &config).await;
        assert_eq!(session.peer_addr(), Some(peer));
    }

    #[tokio::test]
    async fn keepalive_is_set_on_the_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let stream = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        apply_keepalive(&stream, &KeepaliveConfig::default()).unwrap();
        assert!(SockRef::from(&stream).keepalive().unwrap());
    }

    #[tokio::test]
    async fn connect_refused_is_an_io_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = ClientSession::connect(addr, &SessionConfig::default())
            .await
            .unwrap_err();
        assert!(
            matches!(&err, SessionError::Http(HttpConnError::Io(_))),
            "{err:?}"
        );
    }
}

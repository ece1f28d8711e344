//! Accept loop: one registration task per device connection.

use std::net::SocketAddr;

use holosens_api::DEFAULT_CHANNEL_ID;
use holosens_httpconn::Credentials;
use holosens_session::{ServerSession, SessionCache, SessionConfig};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::config::Config;

/// Runs until Ctrl-C, then closes every cached session.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&config.bind).await?;
    info!(addr = %listener.local_addr()?, "waiting for device registrations");

    let cache = SessionCache::new(config.cache_config());
    let session_config = config.session_config();
    let credentials = config.credentials();

    let mut summary = tokio::time::interval(config.summary_interval());
    summary.tick().await; // Skip immediate first tick.

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("SIGINT received, shutting down");
                break;
            }
            _ = summary.tick() => log_summary(&cache).await,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "device connected");
                    tokio::spawn(register(
                        stream,
                        peer,
                        cache.clone(),
                        session_config.clone(),
                        credentials.clone(),
                    ));
                }
                Err(e) => warn!(error = %e, "accept failed"),
            },
        }
    }

    cache.shutdown().await;
    Ok(())
}

async fn register(
    stream: TcpStream,
    peer: SocketAddr,
    cache: SessionCache,
    config: SessionConfig,
    credentials: Credentials,
) {
    let session = match ServerSession::accept(stream, &config).await {
        Ok(session) => session,
        Err(e) => {
            warn!(%peer, error = %e, "registration failed");
            return;
        }
    };

    let serial = session.serial_number().to_string();
    if serial.is_empty() {
        warn!(%peer, "device registered without a serial number, dropping");
        session.close().await;
        return;
    }

    if credentials.is_set() {
        session.set_credentials(credentials).await;
        match session.device().base_info_query(DEFAULT_CHANNEL_ID).await {
            Ok(info) => info!(
                serial = %serial,
                dev_type = %info.dev_type,
                software = %info.soft_version,
                "device reachable"
            ),
            Err(e) => warn!(serial = %serial, error = %e, "first base info query failed"),
        }
    }

    cache.set(serial, session).await;
}

async fn log_summary(cache: &SessionCache) {
    let sessions = cache.list_server().await;
    info!(devices = sessions.len(), "cached sessions");
    for session in sessions {
        debug!(
            serial = %session.serial_number(),
            peer = ?session.peer_addr(),
            authorized = session.is_authorized(),
            "cached device"
        );
    }
}

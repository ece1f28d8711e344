//! Session and cache settings.

use std::time::Duration;

use holosens_api::DEFAULT_CHANNEL_ID;
use holosens_httpconn::{PrivateProtocolHeader, TransportConfig};

/// TCP keep-alive applied to device sockets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepaliveConfig {
    /// Idle time before the first probe, and the interval between probes.
    pub period: Duration,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(60),
        }
    }
}

/// How a new [`Session`](crate::Session) sets up its transport.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub transport: TransportConfig,
    pub keepalive: KeepaliveConfig,
    /// Framing expected on the device's responses to our requests.
    pub response_header: Option<PrivateProtocolHeader>,
}

impl SessionConfig {
    /// Settings for devices that push their registration: they prefix every
    /// response with [`PrivateProtocolHeader::legacy_registration`].
    pub fn push_registration() -> Self {
        Self {
            response_header: Some(PrivateProtocolHeader::legacy_registration()),
            ..Self::default()
        }
    }
}

/// Heartbeat and eviction policy of a [`SessionCache`](crate::SessionCache).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Time between liveness probes.
    pub heartbeat_interval: Duration,
    /// Consecutive failures tolerated; the next one evicts.
    pub heartbeat_failure_budget: u32,
    /// How long a session may stay cached without credentials.
    pub auth_grace_period: Duration,
    /// Channel passed to the base-info probe.
    pub heartbeat_channel: i32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(60),
            heartbeat_failure_budget: 3,
            auth_grace_period: Duration::from_secs(60),
            heartbeat_channel: DEFAULT_CHANNEL_ID,
        }
    }
}

//! Sessions with HoloSens SDC devices.
//!
//! A [`Session`] owns one device connection. A [`ServerSession`] is created
//! when a device dials us and pushes its registration; a [`ClientSession`]
//! when we dial the device. [`SessionCache`] keeps sessions by key and
//! supervises them with a heartbeat.

pub mod cache;
pub mod config;
pub mod error;
mod heartbeat;
pub mod session;

pub use cache::{CachedSession, SessionCache};
pub use config::{CacheConfig, KeepaliveConfig, SessionConfig};
pub use error::SessionError;
pub use session::{ClientSession, ServerSession, Session, apply_keepalive};

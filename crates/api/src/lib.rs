//! HoloSens SDC north-bound payloads.
//!
//! Only the pieces the session layer needs live here: the common
//! `ResponseStatus` envelope, the registration push the device sends when it
//! connects, and the device-management endpoints (the base-info query doubles
//! as the heartbeat probe).

pub mod common;
pub mod device;
pub mod register;

pub use common::{ResponseEnvelope, ResponseStatus};
pub use device::{
    ActivateStatusQueryReply, BaseInfoQueryReply, ChannelAttr, ChannelInfoQueryReply,
    ChannelNameInfo, ChannelNameSettingParams, ChannelParam, DeviceManager,
};
pub use register::{ChannelBaseInfo, DeviceVersion, InitiativeRegisterParams};

/// Channel ID of the main (fixed) video channel.
pub const DEFAULT_CHANNEL_ID: i32 = 101;

//! Device-initiated registration.
//!
//! A device that dials us sends one `POST` carrying its identity, then
//! expects a `200 OK` with a [`ResponseEnvelope`]. After that the roles flip
//! and we only ever send requests on the connection.

use holosens_httpconn::{Bytes, HttpConnError, Request, TransportGuard, bind_json};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::common::ResponseEnvelope;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct DeviceVersion {
    pub software: String,
    pub uboot: String,
    pub kernel: String,
    pub hardware: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelBaseInfo {
    #[serde(rename = "ChannelId")]
    pub channel_id: i32,
    #[serde(rename = "UUID")]
    pub uuid: String,
    #[serde(rename = "DeviceId")]
    pub device_id: String,
}

/// Body of the registration push.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct InitiativeRegisterParams {
    pub device_name: String,
    pub manufacturer: String,
    pub device_type: String,
    pub serial_number: String,
    pub device_version: DeviceVersion,
    pub ip_addr: String,
    pub channel_info_arr: Vec<ChannelBaseInfo>,
}

/// Decodes a registration request received by some other HTTP stack.
pub fn decode_registration(req: &Request<Bytes>) -> Result<InitiativeRegisterParams, HttpConnError> {
    bind_json(req)
}

/// Acknowledgment body for `req`.
pub fn acknowledgment(req: &Request<Bytes>, accepted: bool) -> ResponseEnvelope {
    let target = request_url(req);
    if accepted {
        ResponseEnvelope::success(target)
    } else {
        ResponseEnvelope::failed(target)
    }
}

fn request_url(req: &Request<Bytes>) -> String {
    req.uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_default()
}

/// Reads the registration push from the device and acknowledges it.
///
/// A body that fails to decode is still answered (with a failure
/// acknowledgment) before the decode error is returned.
pub async fn initiative_register(
    guard: &mut TransportGuard,
) -> Result<InitiativeRegisterParams, HttpConnError> {
    let mut server = guard.server();
    let req = server.receive_request().await?;

    match decode_registration(&req) {
        Ok(params) => {
            server.respond().json(&acknowledgment(&req, true)).await?;
            debug!(serial = %params.serial_number, device = %params.device_name, "registration accepted");
            Ok(params)
        }
        Err(e) => {
            warn!(error = %e, uri = %req.uri(), "registration payload rejected");
            server.respond().json(&acknowledgment(&req, false)).await?;
            Err(e)
        }
    }
}

//! Device management endpoints.
//!
//! Each call takes the transport lock for its whole exchange (including any
//! Digest probe) and releases it on return.

use std::collections::HashMap;

use holosens_httpconn::{FORM_URLENCODED, HttpConnError, SocketTransport};
use serde::{Deserialize, Serialize};

use crate::common::ResponseEnvelope;

const BASE_INFO_PATH: &str = "/SDCAPI/V1.0/MiscIaas/System";
const ACTIVATE_STATUS_PATH: &str = "/SDCAPI/V1.0/AuthIaas/ActivaionStatus";
const CHANNEL_INFO_PATH: &str = "/SDCAPI/V1.0/CnsPaas/ChnQury";
const CHANNEL_NAME_PATH: &str = "/SDCAPI/V1.0/CnsPaas/ChnQury/CnsChnParam";

/// Operating-system memory statistics, in KB.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OsMemInfo {
    pub total_mem: i64,
    pub free_mem: i64,
    pub buff_mem: i64,
    pub cache_mem: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemInfo {
    /// DDR capacity in GB.
    pub ddr_mem: i64,
    /// Memory given to the OS in MB.
    pub os_mem: i64,
    pub os_mem_info: OsMemInfo,
}

/// MMZ memory, in KB.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MmzInfo {
    pub total_mem: i64,
    pub free_mem: i64,
    pub used_mem: i64,
}

/// Flash storage, in KB.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FlashInfo {
    pub total_flash_size: i64,
    pub free_flash_size: i64,
}

/// Network throughput, in bit/s.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetRateInfo {
    pub recv_rate: i64,
    pub send_rate: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BaseInfoQueryReply {
    pub platform_type: String,
    pub bar_code: String,
    pub bom_code: String,
    pub drv_code: String,
    pub dev_type: String,
    pub dzoom_ratio: f64,
    pub cpu_occupy_rate: f64,
    pub flash_version: String,
    pub full_device_type: String,
    pub package_limit_size: i64,
    pub mem_info: MemInfo,
    pub mmz_info: MmzInfo,
    pub flash_info: FlashInfo,
    pub net_rate_info: NetRateInfo,
    pub manufacturer: String,
    pub soft_version: String,
    pub kernel_version: String,
    #[serde(rename = "ESN")]
    pub esn: String,
    pub eth0_mac: String,
    pub eth1_mac: String,
    pub uboot_version: String,
    pub hard_version: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivateStatusQueryReply {
    /// 0 = not activated, 1 = activated.
    #[serde(default)]
    pub status: i32,
}

impl ActivateStatusQueryReply {
    pub fn is_activated(&self) -> bool {
        self.status == 1
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelAttr {
    /// Channel role, e.g. `default`, `details`, `panorama`, `thermalImaging`.
    pub name: String,
    pub desc: String,
    /// `local` or `remote;indexN`.
    pub location: String,
    pub imaging_tech: String,
    #[serde(rename = "channelId")]
    pub channel_id: String,
    /// `"1"` when requests must be forwarded to the channel.
    pub forward_need: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelParam {
    pub uuid: String,
    pub attr_list: ChannelAttr,
    pub func_list: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelInfoQueryReply {
    #[serde(rename = "CnsChnParam")]
    pub cns_chn_param: Vec<ChannelParam>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelNameInfo {
    #[serde(rename = "UUID")]
    pub uuid: String,
    #[serde(rename = "channelName")]
    pub channel_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelNameSettingParams {
    /// 1 to 127 characters.
    #[serde(rename = "channelName")]
    pub channel_name: String,
}

/// Device management calls over one session's transport.
#[derive(Debug, Clone, Copy)]
pub struct DeviceManager<'a> {
    transport: &'a SocketTransport,
}

impl<'a> DeviceManager<'a> {
    pub fn new(transport: &'a SocketTransport) -> Self {
        Self { transport }
    }

    /// `channel_id` is 101 for ordinary models; 102 selects the panorama
    /// channel on multi-lens models.
    pub async fn base_info_query(&self, channel_id: i32) -> Result<BaseInfoQueryReply, HttpConnError> {
        let mut guard = self.transport.lock().await;
        guard
            .client()
            .get(BASE_INFO_PATH)
            .query("ChannelID", channel_id)
            .content_type(FORM_URLENCODED)
            .decode_json()
            .await
    }

    pub async fn activate_status_query(&self) -> Result<ActivateStatusQueryReply, HttpConnError> {
        let mut guard = self.transport.lock().await;
        guard
            .client()
            .get(ACTIVATE_STATUS_PATH)
            .content_type(FORM_URLENCODED)
            .decode_json()
            .await
    }

    pub async fn channel_info_query(&self) -> Result<ChannelInfoQueryReply, HttpConnError> {
        let mut guard = self.transport.lock().await;
        guard
            .client()
            .get(CHANNEL_INFO_PATH)
            .content_type(FORM_URLENCODED)
            .decode_json()
            .await
    }

    pub async fn channel_name_query(&self, uuid: &str) -> Result<Vec<ChannelNameInfo>, HttpConnError> {
        let mut guard = self.transport.lock().await;
        guard
            .client()
            .get(CHANNEL_NAME_PATH)
            .query("uuid", uuid)
            .content_type(FORM_URLENCODED)
            .decode_json()
            .await
    }

    /// A 2xx reply whose envelope carries a non-zero code fails with
    /// [`HttpConnError::Device`].
    pub async fn channel_name_setting(
        &self,
        uuid: &str,
        params: &ChannelNameSettingParams,
    ) -> Result<(), HttpConnError> {
        let mut guard = self.transport.lock().await;
        let reply: ResponseEnvelope = guard
            .client()
            .put(CHANNEL_NAME_PATH)
            .query("uuid", uuid)
            .json(params)
            .decode_json()
            .await?;
        reply.response_status.into_result()
    }
}

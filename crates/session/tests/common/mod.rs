//! Scripted in-process device.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use holosens_api::ResponseEnvelope;
use holosens_digest::Challenge;
use holosens_httpconn::{
    Bytes, Connection, PrivateProtocolHeader, Request, Response, SocketTransport, StatusCode,
    TransportConfig,
};
use tokio::io::{DuplexStream, duplex};
use tokio::task::JoinHandle;

pub const USERNAME: &str = "ApiAdmin";
pub const PASSWORD: &str = "a1234567";
pub const REGISTER_PATH: &str = "/SDCAPI/V1.0/Register";
const BASE_INFO_PATH: &str = "/SDCAPI/V1.0/MiscIaas/System";
const REALM: &str = "HuaweiSDC";

#[derive(Default)]
struct State {
    /// Digest credentials the device insists on, if any.
    credentials: Option<(&'static str, &'static str)>,
    /// Scripted base-info outcomes; success once exhausted.
    outcomes: Mutex<VecDeque<bool>>,
    probes: AtomicUsize,
    nonce: Mutex<String>,
    nonces: AtomicU64,
    requests: Mutex<Vec<(String, String)>>,
}

/// A fake camera. Clones share state.
#[derive(Clone, Default)]
pub struct Device {
    state: Arc<State>,
}

impl Device {
    pub fn open() -> Self {
        Self::default()
    }

    pub fn with_digest() -> Self {
        Self {
            state: Arc::new(State {
                credentials: Some((USERNAME, PASSWORD)),
                ..State::default()
            }),
        }
    }

    /// Queues base-info outcomes: `false` answers 500.
    pub fn script(&self, outcomes: impl IntoIterator<Item = bool>) {
        self.state.outcomes.lock().unwrap().extend(outcomes);
    }

    /// Base-info queries that got past authentication.
    pub fn probes(&self) -> usize {
        self.state.probes.load(Ordering::SeqCst)
    }

    /// (method, target) of every request received.
    pub fn requests(&self) -> Vec<(String, String)> {
        self.state.requests.lock().unwrap().clone()
    }

    /// Our end of a fresh connection to this device.
    pub fn connect(&self) -> DuplexStream {
        let (ours, theirs) = duplex(64 * 1024);
        self.serve(theirs, None);
        ours
    }

    /// Answers requests on `conn` until it closes.
    pub fn serve<C: Connection + 'static>(
        &self,
        conn: C,
        header: Option<PrivateProtocolHeader>,
    ) -> JoinHandle<()> {
        let device = self.clone();
        tokio::spawn(async move {
            let transport = device_transport(conn);
            let mut guard = transport.lock().await;
            guard.set_server_header(header);
            device.answer(&mut guard).await;
        })
    }

    /// Dials in the way a push-registering device does: sends `body` to the
    /// register path, then serves requests with the legacy response prefix.
    pub fn push<C: Connection + 'static>(
        &self,
        conn: C,
        body: String,
    ) -> JoinHandle<Option<ResponseEnvelope>> {
        let device = self.clone();
        tokio::spawn(async move {
            let transport = device_transport(conn);
            let mut guard = transport.lock().await;
            let ack = guard
                .client()
                .post(REGISTER_PATH)
                .content_type("application/json")
                .body(body)
                .decode_json::<ResponseEnvelope>()
                .await
                .ok();

            guard.set_server_header(Some(PrivateProtocolHeader::legacy_registration()));
            let serving = device.clone();
            tokio::spawn(async move {
                let mut guard = guard;
                serving.answer(&mut guard).await;
            });
            ack
        })
    }

    async fn answer(&self, guard: &mut holosens_httpconn::TransportGuard) {
        loop {
            let Ok(req) = guard.server().receive_request().await else {
                break;
            };
            let res = self.handle(&req);
            if guard.server().send_response(res).await.is_err() {
                break;
            }
        }
    }

    fn handle(&self, req: &Request<Bytes>) -> Response<Bytes> {
        let state = &self.state;
        state
            .requests
            .lock()
            .unwrap()
            .push((req.method().to_string(), req.uri().to_string()));

        if let Some((username, password)) = state.credentials {
            let presented = req
                .headers()
                .get("Authorization")
                .and_then(|v| v.to_str().ok());
            let Some(presented) = presented else {
                let nonce = format!("{:032x}", state.nonces.fetch_add(1, Ordering::SeqCst));
                *state.nonce.lock().unwrap() = nonce.clone();
                return challenge(&nonce);
            };
            let issued = Challenge {
                realm: REALM.to_string(),
                nonce: state.nonce.lock().unwrap().clone(),
                algorithm: "MD5".to_string(),
            };
            let expected = holosens_digest::authorization(
                &issued,
                req.method().as_str(),
                &req.uri().to_string(),
                username,
                password,
            )
            .unwrap();
            if presented != expected {
                return reply(StatusCode::UNAUTHORIZED, "Unauthorized");
            }
        }

        if req.uri().path() != BASE_INFO_PATH {
            return reply(StatusCode::NOT_FOUND, "not found");
        }
        state.probes.fetch_add(1, Ordering::SeqCst);
        let healthy = state.outcomes.lock().unwrap().pop_front().unwrap_or(true);
        if healthy {
            reply(
                StatusCode::OK,
                r#"{"devType":"X2221-10-FLI","ESN":"2102351","softVersion":"SDC 11.0.0"}"#,
            )
        } else {
            reply(StatusCode::INTERNAL_SERVER_ERROR, "probe failed")
        }
    }
}

/// Registration body for `serial`.
pub fn registration(serial: &str) -> String {
    serde_json::json!({
        "DeviceName": format!("Camera {serial}"),
        "Manufacturer": "Huawei",
        "DeviceType": "X2221-10-FLI",
        "SerialNumber": serial,
        "DeviceVersion": {"Software": "SDC 11.0.0", "Uboot": "1.1", "Kernel": "4.9", "Hardware": "VER.A"},
        "IpAddr": "192.168.1.20",
        "ChannelInfoArr": [{"ChannelId": 101, "UUID": "0d1f-uuid", "DeviceId": "dev-1"}]
    })
    .to_string()
}

fn device_transport<C: Connection + 'static>(conn: C) -> SocketTransport {
    // Idle for as long as the tests need, even under paused time.
    let config = TransportConfig {
        read_timeout: Duration::from_secs(24 * 3600),
        ..TransportConfig::default()
    };
    SocketTransport::with_config(conn, config)
}

fn reply(status: StatusCode, body: &'static str) -> Response<Bytes> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Bytes::from_static(body.as_bytes()))
        .unwrap()
}

fn challenge(nonce: &str) -> Response<Bytes> {
    Response::builder()
        .status(StatusCode::UNAUTHORIZED)
        .header(
            "WWW-Authenticate",
            format!(r#"Digest realm="{REALM}", nonce="{nonce}", algorithm="MD5", qop="auth""#),
        )
        .body(Bytes::new())
        .unwrap()
}

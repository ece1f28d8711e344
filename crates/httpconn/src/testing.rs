//! In-process fake device for unit tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use holosens_digest::Challenge;
use http::header::AUTHORIZATION;
use http::{Request, Response};
use tokio::io::DuplexStream;

use crate::{PrivateProtocolHeader, SocketTransport};

pub(crate) const REALM: &str = "HuaweiSDC";

/// Answers every request with `handler` and records what it saw.
pub(crate) struct FakeDevice {
    requests: Arc<Mutex<Vec<Request<Bytes>>>>,
}

impl FakeDevice {
    pub(crate) fn spawn<F>(handler: F) -> (DuplexStream, Self)
    where
        F: Fn(&Request<Bytes>) -> Response<Bytes> + Send + Sync + 'static,
    {
        Self::spawn_with_header(None, handler)
    }

    pub(crate) fn spawn_with_header<F>(
        header: Option<PrivateProtocolHeader>,
        handler: F,
    ) -> (DuplexStream, Self)
    where
        F: Fn(&Request<Bytes>) -> Response<Bytes> + Send + Sync + 'static,
    {
        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = requests.clone();

        tokio::spawn(async move {
            let transport = SocketTransport::new(theirs);
            let mut guard = transport.lock().await;
            guard.set_server_header(header);
            loop {
                let Ok(req) = guard.server().receive_request().await else {
                    break;
                };
                let res = handler(&req);
                recorded.lock().unwrap().push(req);
                if guard.server().send_response(res).await.is_err() {
                    break;
                }
            }
        });

        (ours, Self { requests })
    }

    pub(crate) fn requests(&self) -> Vec<Request<Bytes>> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(copy_request)
            .collect()
    }

    pub(crate) fn json_reply(status: u16, body: &'static str) -> Response<Bytes> {
        Response::builder()
            .status(status)
            .header("Content-Type", "application/json")
            .body(Bytes::from_static(body.as_bytes()))
            .unwrap()
    }
}

fn copy_request(req: &Request<Bytes>) -> Request<Bytes> {
    let mut copy = Request::new(req.body().clone());
    *copy.method_mut() = req.method().clone();
    *copy.uri_mut() = req.uri().clone();
    *copy.headers_mut() = req.headers().clone();
    copy
}

/// Device that demands Digest auth with a fresh nonce per challenge.
pub(crate) fn digest_device(username: &'static str, password: &'static str) -> (DuplexStream, FakeDevice) {
    let counter = AtomicU64::new(0);
    let nonce = Mutex::new(String::new());

    FakeDevice::spawn(move |req| {
        let presented = req.headers().get(AUTHORIZATION).and_then(|v| v.to_str().ok());
        let Some(presented) = presented else {
            let fresh = format!("{:032x}", 0x5eed_0000 + counter.fetch_add(1, Ordering::Relaxed));
            *nonce.lock().unwrap() = fresh.clone();
            return challenge(&fresh);
        };

        let challenge_sent = Challenge {
            realm: REALM.to_string(),
            nonce: nonce.lock().unwrap().clone(),
            algorithm: "MD5".to_string(),
        };
        let expected = holosens_digest::authorization(
            &challenge_sent,
            req.method().as_str(),
            &req.uri().to_string(),
            username,
            password,
        )
        .unwrap();
        if presented == expected {
            FakeDevice::json_reply(200, r#"{"ok":true}"#)
        } else {
            Response::builder()
                .status(401)
                .body(Bytes::from_static(b"Unauthorized"))
                .unwrap()
        }
    })
}

fn challenge(nonce: &str) -> Response<Bytes> {
    Response::builder()
        .status(401)
        .header(
            "WWW-Authenticate",
            format!(r#"Digest realm="{REALM}", nonce="{nonce}", algorithm="MD5", qop="auth""#),
        )
        .body(Bytes::new())
        .unwrap()
}

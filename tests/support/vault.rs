// ABOUTME: Minimal HTTP server standing in for Vault's SSH signing endpoint.
// ABOUTME: Replies with a canned status and body and records every request.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub token: Option<String>,
    pub body: serde_json::Value,
}

pub struct MockVault {
    address: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockVault {
    /// Start a server that answers every request with `status` and `body`.
    pub async fn start(status: u16, body: impl Into<String>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = format!("http://{}", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));
        let status = StatusCode::from_u16(status).unwrap();
        let body = Bytes::from(body.into());

        let recorded = Arc::clone(&requests);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let recorded = Arc::clone(&recorded);
                let body = body.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<Incoming>| {
                        let recorded = Arc::clone(&recorded);
                        let body = body.clone();
                        async move {
                            let method = req.method().to_string();
                            let path = req.uri().path().to_string();
                            let token = req
                                .headers()
                                .get("x-vault-token")
                                .and_then(|v| v.to_str().ok())
                                .map(str::to_string);
                            let bytes = req.into_body().collect().await?.to_bytes();
                            let json = serde_json::from_slice(&bytes)
                                .unwrap_or(serde_json::Value::Null);
                            recorded.lock().unwrap().push(RecordedRequest {
                                method,
                                path,
                                token,
                                body: json,
                            });

                            let response = Response::builder()
                                .status(status)
                                .header("content-type", "application/json")
                                .body(Full::new(body))
                                .unwrap();
                            Ok::<_, hyper::Error>(response)
                        }
                    });
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        Self { address, requests }
    }

    /// A server that signs successfully, returning `signed_key`.
    pub async fn signing(signed_key: &str) -> Self {
        let body = serde_json::json!({
            "request_id": "ca1b0bcc-0e08-99f0-bf1d-22551662d027",
            "lease_id": "",
            "lease_duration": 0,
            "renewable": false,
            "data": {
                "serial_number": "dda93051ae06a644",
                "signed_key": signed_key,
            },
            "warnings": null,
        });
        Self::start(200, body.to_string()).await
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

/// An address nothing listens on.
pub async fn unused_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

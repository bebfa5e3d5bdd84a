//! Signed HTTP probes against node agents.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use serde_json::Value;
use tracing::debug;

use nodescale_core::HealthSample;
use nodescale_core::config::{HealthConfig, TimingConfig};

use crate::signer::TokenSigner;

/// Anything that can sample a node's CPU usage.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Probe the agent at `ip`. Never errors; failures come back as
    /// samples with `ok = false`.
    async fn probe(&self, node_id: &str, ip: &str) -> HealthSample;
}

/// Probes the agent over plain HTTP/1.1 with a fresh token per request.
#[derive(Debug, Clone)]
pub struct HttpProber {
    signer: TokenSigner,
    port: u16,
    path: String,
    timeout: Duration,
}

impl HttpProber {
    pub fn new(signer: TokenSigner, port: u16, path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            signer,
            port,
            path: path.into(),
            timeout,
        }
    }

    pub fn from_config(health: &HealthConfig, timing: &TimingConfig, signer: TokenSigner) -> Self {
        Self::new(signer, health.port, health.path.clone(), timing.probe_timeout())
    }

    async fn request(&self, address: &str) -> Result<f64, String> {
        let token = self.signer.sign().map_err(|e| e.to_string())?;
        let payload = serde_json::json!({ "jwt": token }).to_string();
        let uri = format!("http://{address}{}", self.path);

        let stream = tokio::net::TcpStream::connect(address)
            .await
            .map_err(|e| format!("connect: {e}"))?;
        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| format!("handshake: {e}"))?;

        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = http::Request::builder()
            .method(http::Method::POST)
            .uri(&uri)
            .header(http::header::HOST, address)
            .header(http::header::CONTENT_TYPE, "application/json")
            .header(http::header::USER_AGENT, "nodescale-health/0.1")
            .body(Full::new(Bytes::from(payload)))
            .map_err(|e| format!("request: {e}"))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| format!("send: {e}"))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(format!("status {status}"));
        }

        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| format!("body: {e}"))?
            .to_bytes();
        parse_health_body(&body)
    }
}

#[async_trait]
impl HealthProbe for HttpProber {
    async fn probe(&self, node_id: &str, ip: &str) -> HealthSample {
        let address = format!("{ip}:{}", self.port);
        match tokio::time::timeout(self.timeout, self.request(&address)).await {
            Ok(Ok(cpu)) => HealthSample::healthy(node_id, cpu),
            Ok(Err(reason)) => {
                debug!(%node_id, %address, %reason, "health probe failed");
                HealthSample::failed(node_id)
            }
            Err(_) => {
                debug!(%node_id, %address, "health probe timed out");
                HealthSample::failed(node_id)
            }
        }
    }
}

/// Extract CPU percent from an agent reply.
///
/// Accepts `{"usage": {"cpu": <number>}}`; a top-level `error` field, a
/// missing reading, or a negative/non-finite value is a failure.
pub fn parse_health_body(body: &[u8]) -> Result<f64, String> {
    let value: Value = serde_json::from_slice(body).map_err(|e| format!("decode: {e}"))?;

    if let Some(err) = value.get("error")
        && !err.is_null()
    {
        return Err(format!("agent error: {err}"));
    }

    let cpu = value
        .get("usage")
        .and_then(|u| u.get("cpu"))
        .ok_or_else(|| "no usage.cpu in reply".to_string())?;

    let cpu = match cpu {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| format!("usage.cpu is not a number: {cpu}"))?;

    if !cpu.is_finite() || cpu < 0.0 {
        return Err(format!("usage.cpu out of range: {cpu}"));
    }
    Ok(cpu)
}

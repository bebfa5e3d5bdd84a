//! DigitalOcean implementation of [`CloudClient`].
//!
//! Droplets are the fleet's nodes and one load balancer fronts them. The
//! balancer endpoint only supports full replacement, so every membership
//! update re-sends the complete balancer definition from [`BalancerSpec`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use nodescale_core::NodeId;
use nodescale_core::config::{
    BalancerHealthCheck, BalancerSpec, ForwardingRule, NodeSpec, StickySessions,
};

use crate::client::{CloudClient, CloudNode};
use crate::error::{CloudError, CloudResult};

/// Largest page the droplet listing endpoint hands out.
const PAGE_SIZE: u32 = 200;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct DigitalOceanClient {
    http: reqwest::Client,
    base_url: String,
    balancer: BalancerSpec,
}

impl DigitalOceanClient {
    /// Build a client against `api_url` (normally `https://api.digitalocean.com/`).
    pub fn new(api_url: &str, token: &str, balancer: BalancerSpec) -> CloudResult<Self> {
        let mut auth = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| CloudError::Invalid("api token is not a valid header value".to_string()))?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("nodescale/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CloudError::Invalid(format!("http client: {e}")))?;

        let mut base_url = api_url.to_string();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }

        Ok(Self {
            http,
            base_url,
            balancer,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl CloudClient for DigitalOceanClient {
    async fn list_nodes(&self, tag: &str) -> CloudResult<Vec<CloudNode>> {
        let per_page = PAGE_SIZE.to_string();
        let resp = self
            .http
            .get(self.url("v2/droplets"))
            .query(&[("tag_name", tag), ("per_page", per_page.as_str())])
            .send()
            .await
            .map_err(transport)?;
        let resp = check(resp).await?;
        let body: DropletList = resp.json().await.map_err(transport)?;

        // The API occasionally answers 200 with an error envelope.
        if let Some(id) = body.id {
            let message = body.message.unwrap_or_default();
            return Err(if id == "service_unavailable" {
                CloudError::Transient(format!("{id}: {message}"))
            } else {
                CloudError::Provider { status: 200, message: format!("{id}: {message}") }
            });
        }

        let nodes: Vec<CloudNode> = body.droplets.into_iter().map(CloudNode::from).collect();
        debug!(tag, count = nodes.len(), "listed droplets");
        Ok(nodes)
    }

    async fn create_node(&self, spec: &NodeSpec) -> CloudResult<NodeId> {
        let request = CreateDroplet::from_spec(spec);
        let resp = self
            .http
            .post(self.url("v2/droplets"))
            .json(&request)
            .send()
            .await
            .map_err(transport)?;
        let resp = check(resp).await?;
        let body: CreatedDroplet = resp.json().await.map_err(transport)?;

        let id = body.droplet.id.to_string();
        info!(droplet_id = %id, name = %spec.name, "droplet created");
        Ok(id)
    }

    async fn destroy_node(&self, id: &str) -> CloudResult<()> {
        let resp = self
            .http
            .delete(self.url(&format!("v2/droplets/{id}")))
            .send()
            .await
            .map_err(transport)?;

        if resp.status() == StatusCode::NOT_FOUND {
            debug!(droplet_id = %id, "droplet already gone");
            return Ok(());
        }
        check(resp).await?;
        info!(droplet_id = %id, "droplet destroyed");
        Ok(())
    }

    async fn set_balancer_membership(&self, ids: &[NodeId]) -> CloudResult<()> {
        let droplet_ids = ids
            .iter()
            .map(|id| {
                id.parse::<u64>()
                    .map_err(|_| CloudError::Invalid(format!("droplet id {id:?} is not numeric")))
            })
            .collect::<CloudResult<Vec<u64>>>()?;

        let request = UpdateBalancer::new(&self.balancer, droplet_ids);
        let resp = self
            .http
            .put(self.url(&format!("v2/load_balancers/{}", self.balancer.id)))
            .json(&request)
            .send()
            .await
            .map_err(transport)?;
        check(resp).await?;
        info!(balancer_id = %self.balancer.id, members = ids.len(), "balancer membership replaced");
        Ok(())
    }
}

// ── Error mapping ─────────────────────────────────────────────────

async fn check(resp: Response) -> CloudResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = resp.text().await.unwrap_or_default();
    Err(classify(status, message))
}

fn classify(status: StatusCode, message: String) -> CloudError {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        CloudError::Transient(format!("{status}: {message}"))
    } else {
        CloudError::Provider {
            status: status.as_u16(),
            message,
        }
    }
}

fn transport(e: reqwest::Error) -> CloudError {
    if e.is_decode() {
        CloudError::Decode(e.to_string())
    } else {
        CloudError::Transient(e.to_string())
    }
}

// ── Wire types ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct DropletList {
    #[serde(default)]
    droplets: Vec<Droplet>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Droplet {
    id: u64,
    #[serde(default)]
    networks: Networks,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Networks {
    #[serde(default)]
    v4: Vec<NetworkV4>,
}

#[derive(Debug, Deserialize)]
struct NetworkV4 {
    ip_address: String,
    #[serde(rename = "type", default)]
    kind: String,
}

impl Droplet {
    /// Private address when private networking is on, else the first one.
    fn address(&self) -> Option<String> {
        self.networks
            .v4
            .iter()
            .find(|n| n.kind == "private")
            .or_else(|| self.networks.v4.first())
            .map(|n| n.ip_address.clone())
    }
}

impl From<Droplet> for CloudNode {
    fn from(d: Droplet) -> Self {
        CloudNode {
            id: d.id.to_string(),
            ip_address: d.address(),
            tags: d.tags,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreatedDroplet {
    droplet: CreatedId,
}

#[derive(Debug, Deserialize)]
struct CreatedId {
    id: u64,
}

#[derive(Debug, Serialize)]
struct CreateDroplet<'a> {
    name: &'a str,
    region: &'a str,
    size: &'a str,
    image: Value,
    ssh_keys: Vec<Value>,
    backups: bool,
    ipv6: bool,
    private_networking: bool,
    monitoring: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_data: Option<&'a str>,
    tags: &'a [String],
}

impl<'a> CreateDroplet<'a> {
    fn from_spec(spec: &'a NodeSpec) -> Self {
        Self {
            name: &spec.name,
            region: &spec.region,
            size: &spec.size,
            image: id_or_slug(&spec.image),
            ssh_keys: spec.ssh_keys.iter().map(|k| id_or_slug(k)).collect(),
            backups: spec.backups,
            ipv6: spec.ipv6,
            private_networking: spec.private_networking,
            monitoring: spec.monitoring,
            user_data: spec.user_data.as_deref(),
            tags: &spec.tags,
        }
    }
}

/// Images and SSH keys are referenced either by numeric id or by
/// slug/fingerprint; the API wants ids as JSON numbers.
fn id_or_slug(value: &str) -> Value {
    match value.parse::<u64>() {
        Ok(n) => Value::from(n),
        Err(_) => Value::from(value),
    }
}

#[derive(Debug, Serialize)]
struct UpdateBalancer<'a> {
    name: &'a str,
    region: &'a str,
    algorithm: &'a str,
    forwarding_rules: &'a [ForwardingRule],
    health_check: &'a BalancerHealthCheck,
    sticky_sessions: &'a StickySessions,
    enable_proxy_protocol: bool,
    droplet_ids: Vec<u64>,
}

impl<'a> UpdateBalancer<'a> {
    fn new(spec: &'a BalancerSpec, droplet_ids: Vec<u64>) -> Self {
        Self {
            name: &spec.name,
            region: &spec.region,
            algorithm: &spec.algorithm,
            forwarding_rules: &spec.forwarding_rules,
            health_check: &spec.health_check,
            sticky_sessions: &spec.sticky_sessions,
            enable_proxy_protocol: spec.enable_proxy_protocol,
            droplet_ids,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use axum::extract::{Path, Query, State};
    use axum::http::{HeaderMap as AxumHeaders, StatusCode as AxumStatus};
    use axum::routing::{get, put};
    use axum::{Json, Router};
    use serde_json::json;
    use std::collections::HashMap;

    #[derive(Clone, Default)]
    struct FakeApi {
        seen: Arc<Mutex<Vec<String>>>,
        last_body: Arc<Mutex<Option<Value>>>,
        list_reply: Arc<Mutex<Option<Value>>>,
    }

    impl FakeApi {
        fn record(&self, line: String) {
            self.seen.lock().unwrap().push(line);
        }
    }

    async fn list(
        State(api): State<FakeApi>,
        headers: AxumHeaders,
        Query(q): Query<HashMap<String, String>>,
    ) -> Json<Value> {
        let auth = headers.get("authorization").and_then(|v| v.to_str().ok()).unwrap_or("");
        api.record(format!("GET tag={} auth={auth}", q.get("tag_name").cloned().unwrap_or_default()));
        let reply = api.list_reply.lock().unwrap().clone();
        Json(reply.unwrap_or_else(|| {
            json!({
                "droplets": [
                    {"id": 11, "networks": {"v4": [
                        {"ip_address": "203.0.113.5", "type": "public"},
                        {"ip_address": "10.10.0.5", "type": "private"}
                    ]}, "tags": ["nodejs"]},
                    {"id": 12, "networks": {"v4": []}, "tags": ["nodejs"]}
                ]
            })
        }))
    }

    async fn create(State(api): State<FakeApi>, Json(body): Json<Value>) -> (AxumStatus, Json<Value>) {
        api.record("POST droplets".to_string());
        *api.last_body.lock().unwrap() = Some(body);
        (AxumStatus::ACCEPTED, Json(json!({"droplet": {"id": 4242}})))
    }

    async fn destroy(State(api): State<FakeApi>, Path(id): Path<String>) -> AxumStatus {
        api.record(format!("DELETE {id}"));
        match id.as_str() {
            "404" => AxumStatus::NOT_FOUND,
            "503" => AxumStatus::SERVICE_UNAVAILABLE,
            _ => AxumStatus::NO_CONTENT,
        }
    }

    async fn update_lb(
        State(api): State<FakeApi>,
        Path(id): Path<String>,
        Json(body): Json<Value>,
    ) -> (AxumStatus, Json<Value>) {
        api.record(format!("PUT lb {id}"));
        *api.last_body.lock().unwrap() = Some(body);
        if id == "quota" {
            return (AxumStatus::UNPROCESSABLE_ENTITY, Json(json!({"id": "unprocessable_entity"})));
        }
        (AxumStatus::OK, Json(json!({"load_balancer": {"id": id}})))
    }

    async fn serve(api: FakeApi) -> String {
        let app = Router::new()
            .route("/v2/droplets", get(list).post(create))
            .route("/v2/droplets/{id}", axum::routing::delete(destroy))
            .route("/v2/load_balancers/{id}", put(update_lb))
            .with_state(api);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn balancer(id: &str) -> BalancerSpec {
        BalancerSpec {
            id: id.to_string(),
            ..BalancerSpec::default()
        }
    }

    #[tokio::test]
    async fn lists_droplets_with_private_address() {
        let api = FakeApi::default();
        let url = serve(api.clone()).await;
        let client = DigitalOceanClient::new(&url, "secret", balancer("lb-1")).unwrap();

        let nodes = client.list_nodes("nodejs").await.unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].id, "11");
        assert_eq!(nodes[0].ip_address.as_deref(), Some("10.10.0.5"));
        assert_eq!(nodes[1].ip_address, None);

        let seen = api.seen.lock().unwrap();
        assert_eq!(seen[0], "GET tag=nodejs auth=Bearer secret");
    }

    #[tokio::test]
    async fn service_unavailable_envelope_is_transient() {
        let api = FakeApi::default();
        *api.list_reply.lock().unwrap() =
            Some(json!({"id": "service_unavailable", "message": "try again"}));
        let url = serve(api).await;
        let client = DigitalOceanClient::new(&url, "t", balancer("lb-1")).unwrap();

        let err = client.list_nodes("nodejs").await.unwrap_err();
        assert!(err.is_transient(), "got {err:?}");
    }

    #[tokio::test]
    async fn create_sends_template_and_returns_id() {
        let api = FakeApi::default();
        let url = serve(api.clone()).await;
        let client = DigitalOceanClient::new(&url, "t", balancer("lb-1")).unwrap();

        let spec = NodeSpec {
            image: "53396713".to_string(),
            ssh_keys: vec!["12345".to_string(), "aa:bb:cc".to_string()],
            tags: vec!["nodejs".to_string()],
            ..NodeSpec::default()
        };
        let id = client.create_node(&spec).await.unwrap();
        assert_eq!(id, "4242");

        let body = api.last_body.lock().unwrap().clone().unwrap();
        assert_eq!(body["image"], json!(53396713));
        assert_eq!(body["ssh_keys"], json!([12345, "aa:bb:cc"]));
        assert_eq!(body["tags"], json!(["nodejs"]));
        assert!(body.get("user_data").is_none());
    }

    #[tokio::test]
    async fn destroy_treats_missing_droplet_as_success() {
        let url = serve(FakeApi::default()).await;
        let client = DigitalOceanClient::new(&url, "t", balancer("lb-1")).unwrap();

        client.destroy_node("77").await.unwrap();
        client.destroy_node("404").await.unwrap();
        assert!(client.destroy_node("503").await.unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn membership_update_sends_full_balancer() {
        let api = FakeApi::default();
        let url = serve(api.clone()).await;
        let client = DigitalOceanClient::new(&url, "t", balancer("lb-1")).unwrap();

        client
            .set_balancer_membership(&["11".to_string(), "4242".to_string()])
            .await
            .unwrap();

        let body = api.last_body.lock().unwrap().clone().unwrap();
        assert_eq!(body["droplet_ids"], json!([11, 4242]));
        assert_eq!(body["algorithm"], json!("round_robin"));
        assert_eq!(body["sticky_sessions"]["type"], json!("none"));
        assert_eq!(body["forwarding_rules"][0]["entry_port"], json!(80));
        assert_eq!(api.seen.lock().unwrap().last().unwrap(), "PUT lb lb-1");
    }

    #[tokio::test]
    async fn membership_rejection_is_permanent() {
        let url = serve(FakeApi::default()).await;
        let client = DigitalOceanClient::new(&url, "t", balancer("quota")).unwrap();

        let err = client.set_balancer_membership(&["1".to_string()]).await.unwrap_err();
        assert!(matches!(err, CloudError::Provider { status: 422, .. }));
    }

    #[tokio::test]
    async fn non_numeric_member_id_is_rejected_locally() {
        let client = DigitalOceanClient::new("http://127.0.0.1:1", "t", balancer("lb-1")).unwrap();
        let err = client.set_balancer_membership(&["abc".to_string()]).await.unwrap_err();
        assert!(matches!(err, CloudError::Invalid(_)));
    }

    #[test]
    fn status_classification() {
        assert!(classify(StatusCode::TOO_MANY_REQUESTS, String::new()).is_transient());
        assert!(classify(StatusCode::BAD_GATEWAY, String::new()).is_transient());
        assert!(!classify(StatusCode::UNAUTHORIZED, String::new()).is_transient());
    }
}

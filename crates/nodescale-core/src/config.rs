//! nodescale.toml configuration parser.
//!
//! Every field has a documented fallback so a minimal file only needs the
//! provider-specific bits (`[node].image`, `[balancer].id`). Secrets are
//! never stored here: the config only names the environment variables
//! that hold them.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::parse_duration;
use crate::error::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ScalerConfig {
    pub fleet: FleetConfig,
    pub scaling: ScalingConfig,
    pub timing: TimingConfig,
    pub health: HealthConfig,
    pub provider: ProviderConfig,
    pub node: NodeSpec,
    pub balancer: BalancerSpec,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FleetConfig {
    /// Provider tag that identifies fleet members.
    pub tag: String,
    /// Floor for the fleet size.
    pub minimum_nodes: usize,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            tag: "nodescale".to_string(),
            minimum_nodes: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScalingConfig {
    /// Average CPU (percent) above which the fleet grows.
    pub cpu_upper_threshold: f64,
    /// Average CPU (percent) below which the fleet shrinks.
    pub cpu_lower_threshold: f64,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            cpu_upper_threshold: 80.0,
            cpu_lower_threshold: 60.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimingConfig {
    pub monitor_interval: String,
    pub readiness_poll_interval: String,
    pub readiness_timeout: String,
    pub grace_delay: String,
    pub probe_timeout: String,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            monitor_interval: "10s".to_string(),
            readiness_poll_interval: "5s".to_string(),
            readiness_timeout: "5m".to_string(),
            grace_delay: "60s".to_string(),
            probe_timeout: "10s".to_string(),
        }
    }
}

impl TimingConfig {
    pub fn monitor_interval(&self) -> Duration {
        parse_duration(&self.monitor_interval).unwrap_or(Duration::from_secs(10))
    }

    pub fn readiness_poll_interval(&self) -> Duration {
        parse_duration(&self.readiness_poll_interval).unwrap_or(Duration::from_secs(5))
    }

    pub fn readiness_timeout(&self) -> Duration {
        parse_duration(&self.readiness_timeout).unwrap_or(Duration::from_secs(300))
    }

    pub fn grace_delay(&self) -> Duration {
        parse_duration(&self.grace_delay).unwrap_or(Duration::from_secs(60))
    }

    pub fn probe_timeout(&self) -> Duration {
        parse_duration(&self.probe_timeout).unwrap_or(Duration::from_secs(10))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HealthConfig {
    /// Port each node serves its health endpoint on.
    pub port: u16,
    /// HTTP path of the health endpoint.
    pub path: String,
    /// Lifetime of the signed token sent with each probe.
    pub token_ttl: String,
    /// Environment variable holding the shared service key.
    pub service_key_env: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            port: 1111,
            path: "/api/health".to_string(),
            token_ttl: "60s".to_string(),
            service_key_env: "NODESCALE_SERVICE_KEY".to_string(),
        }
    }
}

impl HealthConfig {
    pub fn token_ttl(&self) -> Duration {
        parse_duration(&self.token_ttl).unwrap_or(Duration::from_secs(60))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderConfig {
    pub api_url: String,
    /// Environment variable holding the provider API token.
    pub token_env: String,
    pub retry: RetryConfig,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.digitalocean.com/".to_string(),
            token_env: "DIGITALOCEAN_TOKEN".to_string(),
            retry: RetryConfig::default(),
        }
    }
}

/// Bounded exponential backoff for transient provider errors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: String,
    pub max_delay: String,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: "500ms".to_string(),
            max_delay: "5s".to_string(),
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        parse_duration(&self.base_delay).unwrap_or(Duration::from_millis(500))
    }

    pub fn max_delay(&self) -> Duration {
        parse_duration(&self.max_delay).unwrap_or(Duration::from_secs(5))
    }
}

/// Template for every node the controller creates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NodeSpec {
    pub name: String,
    pub region: String,
    pub size: String,
    pub image: String,
    pub ssh_keys: Vec<String>,
    pub backups: bool,
    pub ipv6: bool,
    pub private_networking: bool,
    pub monitoring: bool,
    /// cloud-init payload run on first boot.
    pub user_data: Option<String>,
    pub tags: Vec<String>,
}

impl Default for NodeSpec {
    fn default() -> Self {
        Self {
            name: "nodescale-node".to_string(),
            region: "sfo2".to_string(),
            size: "s-1vcpu-1gb".to_string(),
            image: String::new(),
            ssh_keys: Vec::new(),
            backups: false,
            ipv6: false,
            private_networking: true,
            monitoring: false,
            user_data: None,
            tags: Vec::new(),
        }
    }
}

/// Full load balancer definition. The provider replaces the whole object
/// on every membership update, so all of it has to be known.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BalancerSpec {
    pub id: String,
    pub name: String,
    pub region: String,
    pub algorithm: String,
    pub forwarding_rules: Vec<ForwardingRule>,
    pub health_check: BalancerHealthCheck,
    pub sticky_sessions: StickySessions,
    pub enable_proxy_protocol: bool,
}

impl Default for BalancerSpec {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: "nodescale-balancer".to_string(),
            region: "sfo2".to_string(),
            algorithm: "round_robin".to_string(),
            forwarding_rules: vec![ForwardingRule::default()],
            health_check: BalancerHealthCheck::default(),
            sticky_sessions: StickySessions::default(),
            enable_proxy_protocol: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForwardingRule {
    pub entry_protocol: String,
    pub entry_port: u16,
    pub target_protocol: String,
    pub target_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_id: Option<String>,
}

impl Default for ForwardingRule {
    fn default() -> Self {
        Self {
            entry_protocol: "http".to_string(),
            entry_port: 80,
            target_protocol: "http".to_string(),
            target_port: 80,
            certificate_id: None,
        }
    }
}

/// The balancer's own TCP/HTTP check, independent of nodescale's probes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BalancerHealthCheck {
    pub protocol: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub check_interval_seconds: u32,
    pub response_timeout_seconds: u32,
    pub healthy_threshold: u32,
    pub unhealthy_threshold: u32,
}

impl Default for BalancerHealthCheck {
    fn default() -> Self {
        Self {
            protocol: "tcp".to_string(),
            port: 1111,
            path: None,
            check_interval_seconds: 10,
            response_timeout_seconds: 5,
            healthy_threshold: 5,
            unhealthy_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StickySessions {
    #[serde(rename = "type")]
    pub kind: String,
}

impl Default for StickySessions {
    fn default() -> Self {
        Self {
            kind: "none".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
    /// Listen address for the deploy trigger and status API.
    pub listen: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:2345".to_string(),
        }
    }
}

impl ApiConfig {
    pub fn listen_addr(&self) -> Option<SocketAddr> {
        self.listen.parse().ok()
    }
}

impl ScalerConfig {
    /// Read, parse, and validate a config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate config from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ScalerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// The node template with the fleet tag guaranteed present, so that
    /// every created node shows up in the tagged listing.
    pub fn node_spec(&self) -> NodeSpec {
        let mut spec = self.node.clone();
        if !spec.tags.iter().any(|t| t == &self.fleet.tag) {
            spec.tags.push(self.fleet.tag.clone());
        }
        spec
    }

    /// Check every constraint and report all problems at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if self.fleet.tag.trim().is_empty() {
            problems.push("fleet.tag must not be empty".to_string());
        }
        if self.fleet.minimum_nodes == 0 {
            problems.push("fleet.minimum_nodes must be at least 1".to_string());
        }

        let upper = self.scaling.cpu_upper_threshold;
        let lower = self.scaling.cpu_lower_threshold;
        if !(0.0..=100.0).contains(&upper) || !(0.0..=100.0).contains(&lower) {
            problems.push("cpu thresholds must be within 0..=100".to_string());
        }
        if lower >= upper {
            problems.push(format!(
                "scaling.cpu_lower_threshold ({lower}) must be below cpu_upper_threshold ({upper})"
            ));
        }

        let durations = [
            ("timing.monitor_interval", &self.timing.monitor_interval),
            ("timing.readiness_poll_interval", &self.timing.readiness_poll_interval),
            ("timing.readiness_timeout", &self.timing.readiness_timeout),
            ("timing.grace_delay", &self.timing.grace_delay),
            ("timing.probe_timeout", &self.timing.probe_timeout),
            ("health.token_ttl", &self.health.token_ttl),
            ("provider.retry.base_delay", &self.provider.retry.base_delay),
            ("provider.retry.max_delay", &self.provider.retry.max_delay),
        ];
        for (field, value) in durations {
            match parse_duration(value) {
                None => problems.push(format!("{field}: cannot parse duration {value:?}")),
                Some(d) if d.is_zero() && field != "timing.grace_delay" => {
                    problems.push(format!("{field} must be greater than zero"))
                }
                Some(_) => {}
            }
        }

        if let Some(timeout) = parse_duration(&self.timing.probe_timeout)
            && !(Duration::from_secs(1)..=Duration::from_secs(30)).contains(&timeout)
        {
            problems.push("timing.probe_timeout must be between 1s and 30s".to_string());
        }
        if let (Some(poll), Some(deadline)) = (
            parse_duration(&self.timing.readiness_poll_interval),
            parse_duration(&self.timing.readiness_timeout),
        ) && poll >= deadline
        {
            problems.push(
                "timing.readiness_poll_interval must be shorter than readiness_timeout".to_string(),
            );
        }

        if self.provider.retry.max_attempts == 0 {
            problems.push("provider.retry.max_attempts must be at least 1".to_string());
        }
        if self.provider.api_url.trim().is_empty() {
            problems.push("provider.api_url must not be empty".to_string());
        }

        if self.health.port == 0 {
            problems.push("health.port must not be 0".to_string());
        }
        if !self.health.path.starts_with('/') {
            problems.push("health.path must start with '/'".to_string());
        }

        for (field, value) in [
            ("node.image", &self.node.image),
            ("node.region", &self.node.region),
            ("node.size", &self.node.size),
            ("balancer.id", &self.balancer.id),
        ] {
            if value.trim().is_empty() {
                problems.push(format!("{field} must be set"));
            }
        }
        if self.balancer.forwarding_rules.is_empty() {
            problems.push("balancer.forwarding_rules must not be empty".to_string());
        }

        if self.api.listen_addr().is_none() {
            problems.push(format!("api.listen: invalid socket address {:?}", self.api.listen));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }
}

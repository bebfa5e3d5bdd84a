//! Subcommand implementations: daemon wiring, config check, deploy client.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use tokio::sync::watch;
use tracing::{error, info, warn};

use nodescale_api::{ApiState, build_router};
use nodescale_autoscale::ScalingPolicy;
use nodescale_cloud::{CloudClient, DigitalOceanClient};
use nodescale_core::{DeployTrigger, ScalerConfig};
use nodescale_health::{HealthProbe, HttpProber, TokenSigner};
use nodescale_lifecycle::{FleetRegistry, LifecycleController, LifecycleSettings};
use nodescale_metrics::FleetMetrics;
use nodescale_monitor::FleetMonitor;
use nodescale_rollout::DeployOrchestrator;

/// Secrets never live in the config file, only in the environment.
fn env_secret(var: &str) -> anyhow::Result<String> {
    match std::env::var(var) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => bail!("environment variable {var} is not set"),
    }
}

pub async fn run(config_path: &Path) -> anyhow::Result<()> {
    let config = ScalerConfig::from_file(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    info!(
        path = %config_path.display(),
        tag = %config.fleet.tag,
        minimum_nodes = config.fleet.minimum_nodes,
        "nodescale daemon starting"
    );

    let service_key = env_secret(&config.health.service_key_env)?;
    let api_token = env_secret(&config.provider.token_env)?;
    let signer = TokenSigner::new(service_key.as_bytes(), config.health.token_ttl())?;

    // ── Initialize subsystems ──────────────────────────────────

    let cloud: Arc<dyn CloudClient> = Arc::new(DigitalOceanClient::new(
        &config.provider.api_url,
        &api_token,
        config.balancer.clone(),
    )?);
    info!(api = %config.provider.api_url, balancer = %config.balancer.id, "cloud client initialized");

    let prober: Arc<dyn HealthProbe> = Arc::new(HttpProber::from_config(
        &config.health,
        &config.timing,
        signer.clone(),
    ));

    let registry = FleetRegistry::shared();
    let lifecycle = LifecycleController::new(
        cloud,
        prober.clone(),
        LifecycleSettings::from_config(&config),
        registry.clone(),
    );
    let orchestrator = Arc::new(DeployOrchestrator::new(lifecycle.clone()));
    let trigger = DeployTrigger::new();
    let metrics = Arc::new(FleetMetrics::new());

    let monitor = Arc::new(FleetMonitor::new(
        lifecycle,
        orchestrator.clone(),
        prober,
        trigger.clone(),
        ScalingPolicy::from_config(&config),
        metrics.clone(),
    ));
    let snapshots = monitor.subscribe();

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let interval = config.timing.monitor_interval();
    let monitor_handle = tokio::spawn(monitor.run(interval, shutdown_rx));

    // ── Start API server ───────────────────────────────────────

    let router = build_router(ApiState {
        trigger,
        signer,
        registry,
        snapshots,
        metrics,
        orchestrator,
    });
    let addr = config
        .api
        .listen_addr()
        .with_context(|| format!("invalid api.listen {:?}", config.api.listen))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "API server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    let _ = monitor_handle.await;
    info!("nodescale daemon stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

pub fn check_config(config_path: &Path) -> anyhow::Result<()> {
    let config = ScalerConfig::from_file(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    for var in [&config.health.service_key_env, &config.provider.token_env] {
        if env_secret(var).is_err() {
            warn!(%var, "secret not present in this environment");
        }
    }

    print!("{}", config.to_toml_string()?);
    info!(path = %config_path.display(), "configuration is valid");
    Ok(())
}

pub async fn request_deploy(url: &str, key_env: &str) -> anyhow::Result<()> {
    let key = env_secret(key_env)?;
    let token = TokenSigner::new(key.as_bytes(), Duration::from_secs(60))?.sign()?;
    let endpoint = format!("{}/deploy", url.trim_end_matches('/'));

    let resp = reqwest::Client::new()
        .post(&endpoint)
        .json(&serde_json::json!({ "jwt": token }))
        .send()
        .await
        .with_context(|| format!("calling {endpoint}"))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("deploy rejected ({status}): {body}");
    }
    info!(%endpoint, "deploy accepted");
    Ok(())
}

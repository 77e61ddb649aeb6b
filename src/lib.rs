//! Argus -- API performance sentinel.
//!
//! Watches endpoint performance, detects statistically significant
//! regressions against a time-aware baseline, and drives each confirmed
//! incident through a bounded five-stage investigation that ends in a
//! scored root cause and a confidence-gated remediation action.

pub mod actions;
pub mod api;
pub mod baseline;
pub mod config;
pub mod detect;
pub mod ingest;
pub mod investigate;
pub mod knowledge;
pub mod reason;
pub mod storage;

use crate::actions::deploy::HookDeployer;
use crate::actions::github::GitHubCodeHost;
use crate::actions::notify::{LogNotifier, WebhookNotifier};
use crate::actions::{ActionRouter, CodeHost, Deployer, Notifier};
use crate::baseline::BaselineEngine;
use crate::config::Config;
use crate::detect::detector::{run_detector_loop, RegressionDetector};
use crate::detect::incident::IncidentManager;
use crate::investigate::orchestrator::{run_orchestrator_loop, InvestigationOrchestrator};
use crate::knowledge::KnowledgeBase;
use crate::reason::client::{DisabledReasoner, HttpReasoner};
use crate::reason::Reasoner;
use crate::storage::archive::ArchiveStore;
use crate::storage::window::RecentWindowStore;
use anyhow::{Context, Result};
use chrono::Utc;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

/// Start the argus daemon: ingestion API, detector loop, baseline
/// recompute schedule, and investigation workers.
pub async fn serve(config: Config) -> Result<()> {
    // 1. Storage tiers
    tracing::info!(db_path = %config.server.db_path, "Initializing storage");
    let pool = storage::open_pool(&config.server.db_path)?;
    let window = Arc::new(RecentWindowStore::new(config.detection.retention_secs));
    let archive = ArchiveStore::new(pool.clone());

    // 2. Baseline engine; the table is a derived cache, so a failed first
    //    recompute just means detection waits for the next scheduled one
    let baseline = Arc::new(BaselineEngine::new(
        archive.clone(),
        config.detection.baseline_days,
        config.detection.min_slot_samples,
    ));
    {
        let baseline = baseline.clone();
        let result = tokio::task::spawn_blocking(move || baseline.recompute(Utc::now())).await?;
        if let Err(e) = result {
            warn!("Initial baseline recompute failed: {e:#}");
        }
    }

    // 3. Detector and investigation hand-off
    let incidents = IncidentManager::new(pool.clone());
    let knowledge = KnowledgeBase::new(pool.clone());
    let (incident_tx, incident_rx) = mpsc::channel(32);
    let detector = Arc::new(RegressionDetector::new(
        window.clone(),
        baseline.clone(),
        incidents.clone(),
        config.detection.clone(),
        incident_tx,
    ));

    // 4. Collaborators: anything unconfigured degrades, nothing crashes
    let reasoner: Arc<dyn Reasoner> = match HttpReasoner::from_config(&config.reasoning) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            warn!("Reasoning backend not configured ({e:#}); investigations will be dismissed");
            Arc::new(DisabledReasoner)
        }
    };
    let notifier: Arc<dyn Notifier> = match &config.actions.notify_webhook {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone())),
        None => Arc::new(LogNotifier),
    };
    let code_host: Option<Arc<dyn CodeHost>> = match (
        &config.actions.code_host_api,
        &config.actions.repo,
        std::env::var(&config.actions.code_host_token_env).ok(),
    ) {
        (Some(api), Some(repo), Some(token)) => Some(Arc::new(GitHubCodeHost::new(
            api.clone(),
            repo.clone(),
            token,
        ))),
        _ => {
            info!("Code host not configured, fixes will be notify-only");
            None
        }
    };
    let deployer: Option<Arc<dyn Deployer>> = config
        .actions
        .deploy_hook
        .as_ref()
        .map(|url| Arc::new(HookDeployer::new(url.clone())) as Arc<dyn Deployer>);

    let router = ActionRouter::new(
        notifier,
        code_host,
        deployer,
        window.clone(),
        config.actions.clone(),
    );
    let orchestrator = Arc::new(InvestigationOrchestrator::new(
        window.clone(),
        knowledge,
        incidents.clone(),
        detector.clone(),
        reasoner,
        router,
        config.clone(),
    ));

    // 5. Background loops
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(run_detector_loop(detector.clone(), shutdown_rx.clone()));
    tokio::spawn(run_orchestrator_loop(orchestrator, incident_rx));
    tokio::spawn(run_baseline_loop(
        baseline.clone(),
        config.detection.baseline_cron.clone(),
        shutdown_rx.clone(),
    ));
    tokio::spawn(run_window_purge_loop(window.clone(), shutdown_rx));

    // 6. API server
    let state = api::state::AppState {
        window,
        archive,
        incidents,
        baseline,
        detector,
        retention_secs: config.detection.retention_secs,
    };
    let app = api::router(state);

    let addr: std::net::SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.server.bind))?;
    tracing::info!(%addr, "Argus listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    Ok(())
}

/// Recompute baselines on the configured cron schedule. The expression was
/// validated at config load.
async fn run_baseline_loop(
    baseline: Arc<BaselineEngine>,
    cron_expr: String,
    mut shutdown: watch::Receiver<bool>,
) {
    let Ok(schedule) = cron::Schedule::from_str(&cron_expr) else {
        error!(%cron_expr, "Invalid baseline cron expression, recompute disabled");
        return;
    };
    info!(%cron_expr, "Baseline recompute scheduled");

    loop {
        let now = Utc::now();
        let Some(next) = schedule.after(&now).next() else {
            warn!("Baseline cron schedule has no future firings");
            return;
        };
        let wait = (next - now).to_std().unwrap_or_default();

        tokio::select! {
            _ = tokio::time::sleep(wait) => {
                let baseline = baseline.clone();
                // Archive scans can take a while; keep them off the runtime
                let result = tokio::task::spawn_blocking(move || baseline.recompute(Utc::now())).await;
                match result {
                    Ok(Ok(slots)) => info!(slots, "Scheduled baseline recompute finished"),
                    Ok(Err(e)) => error!("Baseline recompute failed: {e:#}"),
                    Err(e) => error!("Baseline recompute task panicked: {e}"),
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("Baseline loop stopping");
                    return;
                }
            }
        }
    }
}

/// Periodic full eviction pass so endpoints that stopped receiving traffic
/// do not pin stale samples in memory.
async fn run_window_purge_loop(window: Arc<RecentWindowStore>, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
    loop {
        tokio::select! {
            _ = interval.tick() => window.evict_older_than(Utc::now()),
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

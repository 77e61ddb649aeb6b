//! End-to-end pipeline test: archived history -> baseline -> three
//! anomalous polls -> incident -> five-stage investigation -> gated
//! actions -> knowledge base entry.

use argus::actions::{ActionError, ActionRouter, CodeHost, Deployer, Notifier, PrRef};
use argus::baseline::BaselineEngine;
use argus::config::{ActionConfig, Config};
use argus::detect::detector::RegressionDetector;
use argus::detect::incident::IncidentManager;
use argus::detect::{Incident, IncidentStatus, TriggerMetric};
use argus::ingest::Sample;
use argus::investigate::orchestrator::InvestigationOrchestrator;
use argus::investigate::FixProposal;
use argus::knowledge::KnowledgeBase;
use argus::reason::{ReasonError, Reasoner};
use argus::storage::archive::ArchiveStore;
use argus::storage::window::RecentWindowStore;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

fn sample(endpoint: &str, ts: DateTime<Utc>, latency: f64, queries: u32) -> Sample {
    Sample {
        endpoint: endpoint.to_string(),
        timestamp: ts,
        method: "GET".to_string(),
        status: 200,
        latency_ms: latency,
        query_count: queries,
        db_time_ms: 2.0,
        user_id: Some("user-1".to_string()),
        commit_sha: Some("deadbee".to_string()),
    }
}

struct ScriptedReasoner {
    confidence: f64,
}

#[async_trait]
impl Reasoner for ScriptedReasoner {
    async fn infer(&self, stage: &str, _prompt: &str) -> Result<String, ReasonError> {
        let response = match stage {
            "hypothesize" => serde_json::json!({
                "hypotheses": [
                    {"rank": 1, "title": "N+1 query", "description": "loop per row",
                     "confidence_score": 0.7, "evidence_needed": ["query trend", "commit diff"]},
                    {"rank": 2, "title": "Missing index", "description": "full scans",
                     "confidence_score": 0.2},
                    {"rank": 3, "title": "Connection pool exhaustion", "description": "waits",
                     "confidence_score": 0.1}
                ]
            }),
            "confirm" => serde_json::json!({
                "confirmed_hypothesis_title": "N+1 query",
                "confidence_score": self.confidence,
                "evidence_chain": ["queries went 3 to 45 per request"],
                "affected_code_location": "db.rs get_checkout_total",
                "affected_code_snippet": "for item in items { query(item) }"
            }),
            "fix" => serde_json::json!({
                "summary": "replace loop with a single JOIN",
                "original_code": "for item in items { query(item) }",
                "fixed_code": "query_all_joined(items)",
                "risk_level": "low",
                "pr_title": "fix: eliminate N+1 in checkout",
                "pr_body": "details"
            }),
            other => panic!("unexpected stage {other}"),
        };
        Ok(response.to_string())
    }
}

#[derive(Default)]
struct Calls(Mutex<Vec<String>>);

struct MockNotifier(Arc<Calls>);
#[async_trait]
impl Notifier for MockNotifier {
    async fn notify(&self, _message: &str) -> Result<(), ActionError> {
        self.0 .0.lock().unwrap().push("notify".to_string());
        Ok(())
    }
}

struct MockCodeHost(Arc<Calls>);
#[async_trait]
impl CodeHost for MockCodeHost {
    async fn commit_diff(&self, sha: &str) -> Result<String, ActionError> {
        self.0 .0.lock().unwrap().push(format!("diff:{sha}"));
        Ok("diff --git a/db.rs\n+for item in items { query(item) }".to_string())
    }
    async fn create_pr(
        &self,
        _proposal: &FixProposal,
        _incident: &Incident,
        auto_merge: bool,
    ) -> Result<PrRef, ActionError> {
        self.0
             .0
            .lock()
            .unwrap()
            .push(format!("create_pr:{auto_merge}"));
        Ok(PrRef {
            number: 42,
            url: "https://example.test/pr/42".to_string(),
        })
    }
}

struct MockDeployer(Arc<Calls>);
#[async_trait]
impl Deployer for MockDeployer {
    async fn deploy(&self, _pr: &PrRef) -> Result<String, ActionError> {
        self.0 .0.lock().unwrap().push("deploy".to_string());
        Ok("deploy-9".to_string())
    }
}

#[tokio::test(start_paused = true)]
async fn full_pipeline_from_samples_to_auto_merge() {
    let pool = argus::storage::open_test_pool();
    let window = Arc::new(RecentWindowStore::new(1800));
    let archive = ArchiveStore::new(pool.clone());
    let incidents = IncidentManager::new(pool.clone());
    let knowledge = KnowledgeBase::new(pool.clone());

    // A week of Tuesdays at 14:00 would be ideal; one slot is enough.
    // Baseline: /checkout normally runs at 120ms with 3 queries.
    let slot_time = Utc.with_ymd_and_hms(2025, 6, 10, 14, 0, 0).unwrap(); // Tuesday
    for i in 0..20 {
        archive
            .append(&sample("/checkout", slot_time + Duration::seconds(i), 120.0, 3))
            .unwrap();
    }
    let baseline = Arc::new(BaselineEngine::new(archive.clone(), 7, 5));
    baseline.recompute(slot_time + Duration::minutes(30)).unwrap();

    let (tx, mut rx) = mpsc::channel(8);
    let detector = Arc::new(RegressionDetector::new(
        window.clone(),
        baseline,
        incidents.clone(),
        Default::default(),
        tx,
    ));

    // Three consecutive polls see 450ms (score 3.75 >= 3.0)
    let poll_start = slot_time + Duration::minutes(10);
    for tick in 0..3 {
        let at = poll_start + Duration::seconds(10 * tick);
        window.record(sample("/checkout", at, 450.0, 45));
        detector.poll_once(at).unwrap();
    }

    let incident = rx.try_recv().expect("incident confirmed on third strike");
    assert_eq!(incident.endpoint, "/checkout");
    assert_eq!(incident.trigger_metric, TriggerMetric::QueryCount); // 45/3 = 15x beats 3.75x
    assert_eq!(incident.commit_sha.as_deref(), Some("deadbee"));
    assert!(incidents.has_active("/checkout").unwrap());

    // Investigation with a high-confidence scripted reasoner
    let calls = Arc::new(Calls::default());
    let config = Config {
        actions: ActionConfig {
            verify_settle_secs: 0,
            verify_poll_secs: 1,
            verify_timeout_secs: 2,
            ..ActionConfig::default()
        },
        ..Config::default()
    };
    let router = ActionRouter::new(
        Arc::new(MockNotifier(calls.clone())),
        Some(Arc::new(MockCodeHost(calls.clone()))),
        Some(Arc::new(MockDeployer(calls.clone()))),
        window.clone(),
        config.actions.clone(),
    );
    let orchestrator = Arc::new(InvestigationOrchestrator::new(
        window.clone(),
        knowledge.clone(),
        incidents.clone(),
        detector.clone(),
        Arc::new(ScriptedReasoner { confidence: 0.95 }),
        router,
        config,
    ));

    // The deploy "works": recovery shows up in the live window
    window.record(sample("/checkout", Utc::now(), 118.0, 3));

    orchestrator.investigate(incident.clone()).await;

    // Incident closed, detection re-enabled
    let closed = incidents.get(incident.id).unwrap().unwrap();
    assert_eq!(closed.status, IncidentStatus::Resolved);
    assert!(!incidents.has_active("/checkout").unwrap());

    // Remediation chain ran in order: diff fetch, PR with auto-merge, deploy
    let calls = calls.0.lock().unwrap().clone();
    assert!(calls.contains(&"diff:deadbee".to_string()));
    let pr_pos = calls.iter().position(|c| c == "create_pr:true").unwrap();
    let deploy_pos = calls.iter().position(|c| c == "deploy").unwrap();
    assert!(pr_pos < deploy_pos);

    // Learning loop closed: entry archived with verified outcome
    let entries = knowledge.for_endpoint("/checkout", 5).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].root_cause.as_deref(), Some("N+1 query"));
    assert_eq!(entries[0].action_taken, "auto_merged");
    assert_eq!(entries[0].action_succeeded, Some(true));

    // And the next similar incident will find it
    let similar = knowledge
        .similar("checkout latency regression query explosion", 3)
        .unwrap();
    assert_eq!(similar.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn low_confidence_dismisses_without_code_action() {
    let pool = argus::storage::open_test_pool();
    let window = Arc::new(RecentWindowStore::new(1800));
    let incidents = IncidentManager::new(pool.clone());
    let knowledge = KnowledgeBase::new(pool.clone());
    let baseline = Arc::new(BaselineEngine::new(ArchiveStore::new(pool.clone()), 7, 5));
    let (tx, _rx) = mpsc::channel(8);
    let detector = Arc::new(RegressionDetector::new(
        window.clone(),
        baseline,
        incidents.clone(),
        Default::default(),
        tx,
    ));

    let incident = Incident {
        id: uuid::Uuid::new_v4(),
        endpoint: "/checkout".to_string(),
        opened_at: Utc::now(),
        trigger_metric: TriggerMetric::Latency,
        anomaly_score: 3.2,
        status: IncidentStatus::Open,
        latency_before_ms: 120.0,
        latency_after_ms: 400.0,
        query_count_before: 3.0,
        query_count_after: 4.0,
        commit_sha: None,
        affected_user_ids: vec![],
    };
    incidents.open(&incident).unwrap();

    let calls = Arc::new(Calls::default());
    let config = Config::default();
    let router = ActionRouter::new(
        Arc::new(MockNotifier(calls.clone())),
        Some(Arc::new(MockCodeHost(calls.clone()))),
        Some(Arc::new(MockDeployer(calls.clone()))),
        window.clone(),
        config.actions.clone(),
    );
    let orchestrator = Arc::new(InvestigationOrchestrator::new(
        window,
        knowledge.clone(),
        incidents.clone(),
        detector,
        Arc::new(ScriptedReasoner { confidence: 0.40 }),
        router,
        config,
    ));

    orchestrator.investigate(incident.clone()).await;

    let closed = incidents.get(incident.id).unwrap().unwrap();
    assert_eq!(closed.status, IncidentStatus::Dismissed);

    // Notification is fire-and-forget; the hard guarantee is that no code
    // action was dispatched
    let calls = calls.0.lock().unwrap().clone();
    assert!(!calls.iter().any(|c| c.starts_with("create_pr")));
    assert!(!calls.iter().any(|c| c == "deploy"));

    // Record preserved with the unconfirmed conclusion
    let entries = knowledge.for_endpoint("/checkout", 5).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].confidence, Some(0.40));
}

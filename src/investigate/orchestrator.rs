//! Investigation orchestrator.
//!
//! One worker task per incident, fed by the detector over a channel, so a
//! slow investigation never delays detection of the next regression. The
//! five stages run strictly in order; a stage failure dismisses the
//! incident with the record preserved. The orchestrator -- not any stage,
//! not the router -- is the single authority on incident status.

use crate::actions::{ActionOutcome, ActionRouter};
use crate::config::Config;
use crate::detect::detector::RegressionDetector;
use crate::detect::incident::IncidentManager;
use crate::detect::{Incident, IncidentStatus};
use crate::investigate::{steps, InvestigationRecord, Stage};
use crate::knowledge::{KnowledgeBase, KnowledgeEntry};
use crate::reason::{ReasonError, Reasoner};
use crate::storage::window::RecentWindowStore;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

pub struct InvestigationOrchestrator {
    window: Arc<RecentWindowStore>,
    knowledge: KnowledgeBase,
    incidents: IncidentManager,
    detector: Arc<RegressionDetector>,
    reasoner: Arc<dyn Reasoner>,
    router: ActionRouter,
    config: Config,
}

impl InvestigationOrchestrator {
    pub fn new(
        window: Arc<RecentWindowStore>,
        knowledge: KnowledgeBase,
        incidents: IncidentManager,
        detector: Arc<RegressionDetector>,
        reasoner: Arc<dyn Reasoner>,
        router: ActionRouter,
        config: Config,
    ) -> Self {
        Self {
            window,
            knowledge,
            incidents,
            detector,
            reasoner,
            router,
            config,
        }
    }

    /// Drive one incident through the full pipeline. Never panics; every
    /// failure path ends in a terminal incident status and an archived
    /// record.
    pub async fn investigate(self: Arc<Self>, incident: Incident) {
        info!(
            incident_id = %incident.id,
            endpoint = %incident.endpoint,
            commit = incident.commit_sha.as_deref().unwrap_or("unknown"),
            "Investigation started"
        );

        if let Err(e) = self
            .incidents
            .set_status(incident.id, IncidentStatus::Investigating, None)
        {
            error!(incident_id = %incident.id, "Failed to mark investigating: {e:#}");
        }

        let mut record =
            InvestigationRecord::new(incident.id, &incident.endpoint, incident.opened_at);
        let backoff = self.config.reasoning.retry_backoff_ms;

        // Stage 1: characterize (pure data, infallible)
        let characterization = steps::characterize(&incident, &self.window, Utc::now());
        record.characterization = Some(characterization.clone());

        // Stage 2: hypothesize (reasoning call)
        let past = self
            .knowledge
            .similar(&characterization.summary(), 3)
            .unwrap_or_else(|e| {
                warn!("Knowledge base lookup failed: {e:#}");
                Vec::new()
            });
        let hypotheses = match steps::hypothesize(
            &characterization,
            &past,
            self.reasoner.as_ref(),
            backoff,
        )
        .await
        {
            Ok(hypotheses) => hypotheses,
            Err(e) => {
                return self
                    .dismiss_failed(&incident, record, Stage::Hypothesize, e)
                    .await;
            }
        };
        record.hypotheses = hypotheses.clone();

        // Stage 3: gather evidence (pure data; commit diff is best effort)
        let commit_diff = match incident.commit_sha.as_deref() {
            Some(sha) => self.router.fetch_commit_diff(sha).await,
            None => None,
        };
        let evidence =
            steps::gather_evidence(&hypotheses, &incident.endpoint, commit_diff, &self.window);
        record.evidence = evidence.clone();

        // Stage 4: confirm (reasoning call; sole producer of confidence)
        let cause = match steps::confirm_root_cause(
            &hypotheses,
            &evidence,
            self.reasoner.as_ref(),
            backoff,
        )
        .await
        {
            Ok(cause) => cause,
            Err(e) => {
                return self
                    .dismiss_failed(&incident, record, Stage::Confirm, e)
                    .await;
            }
        };
        let confidence = cause.confidence;
        record.confirmed_cause = Some(cause.clone());

        // Gate: below the propose floor there is no fix stage at all
        if confidence < self.config.actions.propose_floor {
            info!(
                incident_id = %incident.id,
                confidence = format_args!("{confidence:.2}"),
                floor = self.config.actions.propose_floor,
                "Confidence below propose floor, dismissing"
            );
            let reason = format!(
                "confidence {confidence:.2} below propose floor {}",
                self.config.actions.propose_floor
            );
            // Router still notifies humans of the dismissed conclusion
            let outcome = self.router.dispatch(&record, &incident).await;
            self.close(
                &incident,
                record,
                IncidentStatus::Dismissed,
                Some(&reason),
                outcome,
            );
            return;
        }

        // Stage 5: fix (reasoning call)
        let proposal = match steps::generate_fix(
            &cause,
            &characterization,
            self.reasoner.as_ref(),
            backoff,
        )
        .await
        {
            Ok(proposal) => proposal,
            Err(e) => return self.dismiss_failed(&incident, record, Stage::Fix, e).await,
        };
        record.proposed_fix = Some(proposal);

        info!(
            incident_id = %incident.id,
            cause = %cause.title,
            confidence = format_args!("{confidence:.2}"),
            "Investigation complete, routing actions"
        );

        // Resolved only after the router has finished (or skipped) actions
        let outcome = self.router.dispatch(&record, &incident).await;
        self.close(&incident, record, IncidentStatus::Resolved, None, outcome);
    }

    /// A reasoning stage failed twice: dismiss, preserve and archive the
    /// record, tell humans. Never a crash.
    async fn dismiss_failed(
        &self,
        incident: &Incident,
        mut record: InvestigationRecord,
        stage: Stage,
        err: ReasonError,
    ) {
        let reason = match &err {
            ReasonError::Timeout(_) => "investigation timeout".to_string(),
            _ => format!("{stage} stage failed: {err}"),
        };
        error!(
            incident_id = %incident.id,
            %stage,
            "Investigation failed: {err}"
        );
        record.failed_stage = Some(stage.as_str().to_string());
        record.failure_reason = Some(reason.clone());

        let outcome = self.router.dispatch(&record, incident).await;
        self.close(
            incident,
            record,
            IncidentStatus::Dismissed,
            Some(&reason),
            outcome,
        );
    }

    /// Terminal transition: set final status, archive the record into the
    /// knowledge base, and re-enable detection for the endpoint.
    fn close(
        &self,
        incident: &Incident,
        record: InvestigationRecord,
        status: IncidentStatus,
        reason: Option<&str>,
        outcome: ActionOutcome,
    ) {
        if let Err(e) = self.incidents.set_status(incident.id, status, reason) {
            error!(incident_id = %incident.id, "Failed to set terminal status: {e:#}");
        }

        let entry = KnowledgeEntry {
            incident_id: incident.id.to_string(),
            endpoint: incident.endpoint.clone(),
            root_cause: record.confirmed_cause.as_ref().map(|c| c.title.clone()),
            characterization: record
                .characterization
                .as_ref()
                .map(|c| c.summary())
                .unwrap_or_else(|| format!("{} regression", incident.endpoint)),
            confidence: record.confidence(),
            record_json: serde_json::to_value(&record).unwrap_or(serde_json::Value::Null),
            action_taken: outcome.action_taken.clone(),
            action_succeeded: outcome.succeeded(),
            created_at: Utc::now(),
        };
        if let Err(e) = self.knowledge.store(&entry) {
            error!(incident_id = %incident.id, "Failed to archive knowledge entry: {e:#}");
        }

        self.detector.mark_resolved(&incident.endpoint);
        info!(
            incident_id = %incident.id,
            status = status.as_str(),
            action = %outcome.action_taken,
            "Incident closed"
        );
    }
}

/// Feed incidents from the detector into per-incident worker tasks.
pub async fn run_orchestrator_loop(
    orchestrator: Arc<InvestigationOrchestrator>,
    mut rx: mpsc::Receiver<Incident>,
) {
    info!("Investigation orchestrator started");
    while let Some(incident) = rx.recv().await {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            orchestrator.investigate(incident).await;
        });
    }
    info!("Investigation orchestrator stopped");
}

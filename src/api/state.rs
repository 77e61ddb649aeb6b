use crate::baseline::BaselineEngine;
use crate::detect::detector::RegressionDetector;
use crate::detect::incident::IncidentManager;
use crate::storage::archive::ArchiveStore;
use crate::storage::window::RecentWindowStore;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub window: Arc<RecentWindowStore>,
    pub archive: ArchiveStore,
    pub incidents: IncidentManager,
    pub baseline: Arc<BaselineEngine>,
    pub detector: Arc<RegressionDetector>,
    pub retention_secs: i64,
}

use std::sync::Arc;

use crate::manager::DownloadManager;
use crate::observability::Metrics;
use crate::transfer::TransferCoordinator;

/// Read-only handles the dashboard needs
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<TransferCoordinator>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(coordinator: Arc<TransferCoordinator>, metrics: Arc<Metrics>) -> Self {
        Self {
            coordinator,
            metrics,
        }
    }

    pub fn from_manager(manager: &DownloadManager) -> Self {
        Self::new(manager.coordinator().clone(), manager.metrics().clone())
    }
}

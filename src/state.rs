use crate::config::ClusterBackend;
use crate::orchestrator::Orchestrator;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
    pub cluster_backend: ClusterBackend,
}

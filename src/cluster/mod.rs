//! Boundary to the cluster control plane that hosts per-match workloads.
//!
//! A *workload* is a single pod running the game server image, an *endpoint* is a
//! NodePort service exposing it outside the cluster. [`ClusterApi`] is the only
//! surface the orchestrator talks to; [`KubeCluster`] speaks the Kubernetes REST API
//! and [`InMemoryCluster`] runs the same contract in-process.

pub mod kube;
pub mod memory;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

pub use kube::KubeCluster;
pub use memory::{Fault, InMemoryCluster};

#[derive(Debug)]
pub enum ClusterError {
    Http(reqwest::Error),
    Api { status: u16, body: String },
    Decode(String),
    NotFound(String),
    WatchClosed,
    Injected(String),
    Config(String),
}

impl fmt::Display for ClusterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterError::Http(e) => write!(f, "HTTP error: {e}"),
            ClusterError::Api { status, body } => {
                write!(f, "control plane returned {status}: {body}")
            }
            ClusterError::Decode(msg) => write!(f, "failed to decode control plane object: {msg}"),
            ClusterError::NotFound(name) => write!(f, "{name} not found"),
            ClusterError::WatchClosed => write!(f, "watch stream closed"),
            ClusterError::Injected(op) => write!(f, "injected failure in {op}"),
            ClusterError::Config(msg) => write!(f, "client configuration: {msg}"),
        }
    }
}

impl std::error::Error for ClusterError {}

impl From<reqwest::Error> for ClusterError {
    fn from(e: reqwest::Error) -> Self {
        ClusterError::Http(e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl WorkloadPhase {
    pub fn parse(phase: &str) -> Self {
        match phase {
            "Pending" => WorkloadPhase::Pending,
            "Running" => WorkloadPhase::Running,
            "Succeeded" => WorkloadPhase::Succeeded,
            "Failed" => WorkloadPhase::Failed,
            _ => WorkloadPhase::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadPhase::Pending => "Pending",
            WorkloadPhase::Running => "Running",
            WorkloadPhase::Succeeded => "Succeeded",
            WorkloadPhase::Failed => "Failed",
            WorkloadPhase::Unknown => "Unknown",
        }
    }
}

/// What the orchestrator asks the cluster to run for one match.
#[derive(Debug, Clone)]
pub struct WorkloadSpec {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub container_name: String,
    pub image: String,
    pub container_port: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Workload {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub phase: WorkloadPhase,
    pub pod_ip: Option<String>,
}

/// A NodePort-style service selecting a workload by label.
#[derive(Debug, Clone)]
pub struct EndpointSpec {
    pub name: String,
    pub selector: BTreeMap<String, String>,
    pub protocol: String,
    pub port: u16,
    pub target_port: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub name: String,
    pub selector: BTreeMap<String, String>,
    /// External port assigned by the platform; `None` until allocated.
    pub node_port: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventType {
    Added,
    Modified,
    Deleted,
    Bookmark,
}

impl WatchEventType {
    pub fn parse(event_type: &str) -> Option<Self> {
        match event_type {
            "ADDED" => Some(WatchEventType::Added),
            "MODIFIED" => Some(WatchEventType::Modified),
            "DELETED" => Some(WatchEventType::Deleted),
            "BOOKMARK" => Some(WatchEventType::Bookmark),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub event_type: WatchEventType,
    pub object: Workload,
}

/// Change notifications for workloads. Runs until dropped or until the control
/// plane closes it; an `Err` item is a fatal watch error.
pub type WatchStream = BoxStream<'static, Result<WatchEvent, ClusterError>>;

#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn create_workload(&self, spec: &WorkloadSpec) -> Result<Workload, ClusterError>;

    async fn list_workloads(&self) -> Result<Vec<Workload>, ClusterError>;

    async fn delete_workload(&self, name: &str) -> Result<(), ClusterError>;

    /// Existing workloads are replayed as `Added` events before live changes.
    async fn watch_workloads(&self) -> Result<WatchStream, ClusterError>;

    async fn create_endpoint(&self, spec: &EndpointSpec) -> Result<Endpoint, ClusterError>;

    async fn list_endpoints(&self) -> Result<Vec<Endpoint>, ClusterError>;

    async fn delete_endpoint(&self, name: &str) -> Result<(), ClusterError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_parse_roundtrip() {
        for phase in [
            WorkloadPhase::Pending,
            WorkloadPhase::Running,
            WorkloadPhase::Succeeded,
            WorkloadPhase::Failed,
        ] {
            assert_eq!(WorkloadPhase::parse(phase.as_str()), phase);
        }
        assert_eq!(WorkloadPhase::parse("Terminating"), WorkloadPhase::Unknown);
    }

    #[test]
    fn test_watch_event_type_parse() {
        assert_eq!(WatchEventType::parse("ADDED"), Some(WatchEventType::Added));
        assert_eq!(WatchEventType::parse("BOOKMARK"), Some(WatchEventType::Bookmark));
        assert_eq!(WatchEventType::parse("ERROR"), None);
    }

    #[test]
    fn test_error_display() {
        let e = ClusterError::Api {
            status: 409,
            body: "already exists".into(),
        };
        assert_eq!(e.to_string(), "control plane returned 409: already exists");
        assert_eq!(
            ClusterError::NotFound("pod x".into()).to_string(),
            "pod x not found"
        );
    }
}

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;

use crate::cluster::{
    ClusterApi, ClusterError, EndpointSpec, WatchEventType, WorkloadPhase, WorkloadSpec,
};
use crate::config::GameConfig;
use crate::ids;

/// Where players reach a node of the cluster.
pub trait NodeAddressResolver: Send + Sync {
    fn node_address(&self) -> String;
}

/// A fixed host: the minikube IP, a load balancer, or `localhost` for Docker Desktop.
#[derive(Debug, Clone)]
pub struct StaticNodeAddress(pub String);

impl NodeAddressResolver for StaticNodeAddress {
    fn node_address(&self) -> String {
        self.0.clone()
    }
}

#[derive(Debug, Clone)]
pub struct ProvisionSettings {
    pub image: String,
    pub container_name: String,
    pub container_port: u16,
    pub workload_prefix: String,
    pub endpoint_prefix: String,
    pub ready_timeout: Duration,
}

impl From<&GameConfig> for ProvisionSettings {
    fn from(game: &GameConfig) -> Self {
        Self {
            image: game.image.clone(),
            container_name: game.workload_prefix.clone(),
            container_port: game.container_port,
            workload_prefix: game.workload_prefix.clone(),
            endpoint_prefix: game.endpoint_prefix.clone(),
            ready_timeout: Duration::from_secs(game.ready_timeout_secs),
        }
    }
}

/// Cluster objects backing one match, as handed back by a successful provision.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionedMatch {
    pub workload_name: String,
    pub endpoint_name: String,
    pub internal_ip: Option<String>,
    /// `host:port`, no scheme.
    pub external_address: String,
}

#[derive(Debug)]
pub enum ProvisionError {
    Cluster(ClusterError),
    Timeout { workload: String, after: Duration },
    MissingNodePort(String),
}

impl fmt::Display for ProvisionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvisionError::Cluster(e) => write!(f, "cluster error: {e}"),
            ProvisionError::Timeout { workload, after } => {
                write!(f, "workload {workload} not ready after {}s", after.as_secs())
            }
            ProvisionError::MissingNodePort(endpoint) => {
                write!(f, "endpoint {endpoint} has no node port assigned")
            }
        }
    }
}

impl std::error::Error for ProvisionError {}

impl From<ClusterError> for ProvisionError {
    fn from(e: ClusterError) -> Self {
        ProvisionError::Cluster(e)
    }
}

#[derive(Debug)]
pub enum TeardownError {
    InvalidAddress(String),
    EndpointNotFound(u16),
    UnmanagedEndpoint(String),
    Cluster(ClusterError),
}

impl fmt::Display for TeardownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TeardownError::InvalidAddress(addr) => write!(f, "invalid match address: {addr}"),
            TeardownError::EndpointNotFound(port) => {
                write!(f, "no endpoint found for node port {port}")
            }
            TeardownError::UnmanagedEndpoint(name) => {
                write!(f, "endpoint {name} was not created by this server")
            }
            TeardownError::Cluster(e) => write!(f, "cluster error: {e}"),
        }
    }
}

impl std::error::Error for TeardownError {}

impl From<ClusterError> for TeardownError {
    fn from(e: ClusterError) -> Self {
        TeardownError::Cluster(e)
    }
}

/// Resources released by a successful teardown.
#[derive(Debug, Clone, PartialEq)]
pub struct ReleasedMatch {
    pub workload_name: String,
    pub endpoint_name: String,
}

#[derive(Default)]
struct CreatedObjects {
    workload: Option<String>,
    endpoint: Option<String>,
}

/// Drives the control plane through the lifecycle of a per-match workload.
pub struct Provisioner {
    cluster: Arc<dyn ClusterApi>,
    node: Arc<dyn NodeAddressResolver>,
    settings: ProvisionSettings,
}

impl Provisioner {
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        node: Arc<dyn NodeAddressResolver>,
        settings: ProvisionSettings,
    ) -> Self {
        Self {
            cluster,
            node,
            settings,
        }
    }

    fn endpoint_name_for(&self, workload_name: &str) -> String {
        format!("{}{}", self.settings.endpoint_prefix, workload_name)
    }

    /// Creates a workload, waits for it to run, exposes it and returns the address
    /// players connect to. On failure everything created so far is deleted again.
    pub async fn provision(&self) -> Result<ProvisionedMatch, ProvisionError> {
        let mut created = CreatedObjects::default();
        match self.run_pipeline(&mut created).await {
            Ok(provisioned) => Ok(provisioned),
            Err(e) => {
                self.rollback(created).await;
                Err(e)
            }
        }
    }

    async fn run_pipeline(
        &self,
        created: &mut CreatedObjects,
    ) -> Result<ProvisionedMatch, ProvisionError> {
        let workload_name = ids::workload_name(&self.settings.workload_prefix);
        let labels = BTreeMap::from([("app".to_string(), workload_name.clone())]);

        self.cluster
            .create_workload(&WorkloadSpec {
                name: workload_name.clone(),
                labels: labels.clone(),
                container_name: self.settings.container_name.clone(),
                image: self.settings.image.clone(),
                container_port: self.settings.container_port,
            })
            .await?;
        created.workload = Some(workload_name.clone());
        tracing::info!(workload = %workload_name, "workload created, waiting for it to run");

        let internal_ip = match tokio::time::timeout(
            self.settings.ready_timeout,
            wait_until_running(self.cluster.as_ref(), &workload_name),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(ProvisionError::Timeout {
                    workload: workload_name,
                    after: self.settings.ready_timeout,
                })
            }
        };
        tracing::info!(
            workload = %workload_name,
            ip = internal_ip.as_deref().unwrap_or("unknown"),
            "workload running"
        );

        let endpoint_name = self.endpoint_name_for(&workload_name);
        let endpoint = self
            .cluster
            .create_endpoint(&EndpointSpec {
                name: endpoint_name.clone(),
                selector: labels,
                protocol: "TCP".to_string(),
                port: self.settings.container_port,
                target_port: self.settings.container_port,
            })
            .await?;
        created.endpoint = Some(endpoint_name.clone());

        let node_port = endpoint
            .node_port
            .ok_or_else(|| ProvisionError::MissingNodePort(endpoint_name.clone()))?;
        let external_address = format!("{}:{}", self.node.node_address(), node_port);
        tracing::info!(endpoint = %endpoint_name, %external_address, "endpoint ready");

        Ok(ProvisionedMatch {
            workload_name,
            endpoint_name,
            internal_ip,
            external_address,
        })
    }

    async fn rollback(&self, created: CreatedObjects) {
        if let Some(endpoint) = created.endpoint {
            if let Err(e) = self.cluster.delete_endpoint(&endpoint).await {
                tracing::warn!("rollback: failed to delete endpoint {endpoint}: {e}");
            }
        }
        if let Some(workload) = created.workload {
            match self.cluster.delete_workload(&workload).await {
                Ok(()) => tracing::info!(workload = %workload, "rolled back workload"),
                Err(e) => tracing::warn!("rollback: failed to delete workload {workload}: {e}"),
            }
        }
    }

    /// Resolves `pod_url` back to its endpoint through the assigned node port, then
    /// deletes the workload and the endpoint in that order.
    pub async fn release(&self, pod_url: &str) -> Result<ReleasedMatch, TeardownError> {
        let port = parse_port(pod_url)?;

        let endpoints = self.cluster.list_endpoints().await?;
        let endpoint = endpoints
            .into_iter()
            .find(|e| e.node_port == Some(port))
            .ok_or(TeardownError::EndpointNotFound(port))?;

        let workload_name = endpoint
            .name
            .strip_prefix(&self.settings.endpoint_prefix)
            .ok_or_else(|| TeardownError::UnmanagedEndpoint(endpoint.name.clone()))?
            .to_string();

        self.cluster.delete_workload(&workload_name).await?;
        self.cluster.delete_endpoint(&endpoint.name).await?;
        tracing::info!(workload = %workload_name, endpoint = %endpoint.name, "match resources released");

        Ok(ReleasedMatch {
            workload_name,
            endpoint_name: endpoint.name,
        })
    }
}

async fn wait_until_running(
    cluster: &dyn ClusterApi,
    workload_name: &str,
) -> Result<Option<String>, ProvisionError> {
    let mut events = cluster.watch_workloads().await?;
    while let Some(event) = events.next().await {
        let event = event?;
        tracing::debug!(
            workload = %event.object.name,
            phase = event.object.phase.as_str(),
            "workload event"
        );
        let relevant = matches!(
            event.event_type,
            WatchEventType::Added | WatchEventType::Modified
        );
        if relevant
            && event.object.name == workload_name
            && event.object.phase == WorkloadPhase::Running
        {
            return Ok(event.object.pod_ip);
        }
    }
    Err(ProvisionError::Cluster(ClusterError::WatchClosed))
}

/// Port of a `host:port` address.
fn parse_port(address: &str) -> Result<u16, TeardownError> {
    address
        .rsplit_once(':')
        .and_then(|(_, port)| port.trim().parse().ok())
        .ok_or_else(|| TeardownError::InvalidAddress(address.to_string()))
}

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::{broadcast, Mutex};

use super::{
    ClusterApi, ClusterError, Endpoint, EndpointSpec, WatchEvent, WatchEventType, WatchStream,
    Workload, WorkloadPhase, WorkloadSpec,
};

const NODE_PORT_MIN: u16 = 30000;
const NODE_PORT_MAX: u16 = 32767;

/// Operations that can be made to fail on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    CreateWorkload,
    DeleteWorkload,
    Watch,
    CreateEndpoint,
    ListEndpoints,
    DeleteEndpoint,
}

impl Fault {
    fn op(&self) -> &'static str {
        match self {
            Fault::CreateWorkload => "create_workload",
            Fault::DeleteWorkload => "delete_workload",
            Fault::Watch => "watch_workloads",
            Fault::CreateEndpoint => "create_endpoint",
            Fault::ListEndpoints => "list_endpoints",
            Fault::DeleteEndpoint => "delete_endpoint",
        }
    }
}

struct ClusterState {
    workloads: BTreeMap<String, Workload>,
    endpoints: BTreeMap<String, Endpoint>,
    next_node_port: u16,
    next_ip: u32,
    auto_start: bool,
    faults: HashSet<Fault>,
}

impl ClusterState {
    fn check(&self, fault: Fault) -> Result<(), ClusterError> {
        if self.faults.contains(&fault) {
            return Err(ClusterError::Injected(fault.op().to_string()));
        }
        Ok(())
    }

    /// Next free port in the NodePort range, or `None` after one full pass.
    fn allocate_node_port(&mut self) -> Option<u16> {
        let in_use: HashSet<u16> = self.endpoints.values().filter_map(|e| e.node_port).collect();
        for _ in NODE_PORT_MIN..=NODE_PORT_MAX {
            let port = self.next_node_port;
            self.next_node_port = if port >= NODE_PORT_MAX {
                NODE_PORT_MIN
            } else {
                port + 1
            };
            if !in_use.contains(&port) {
                return Some(port);
            }
        }
        None
    }

    fn allocate_ip(&mut self) -> String {
        let n = self.next_ip;
        self.next_ip += 1;
        format!("10.244.{}.{}", (n >> 8) & 0xff, n & 0xff)
    }
}

/// A control plane that lives in the server process.
///
/// Used by `CLUSTER_BACKEND=memory` for local play without Kubernetes, and by the
/// test suite. Workloads go `Pending -> Running` as soon as they are created unless
/// the cluster was built with [`InMemoryCluster::with_manual_start`].
#[derive(Clone)]
pub struct InMemoryCluster {
    state: Arc<Mutex<ClusterState>>,
    events: broadcast::Sender<WatchEvent>,
}

impl Default for InMemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::build(true)
    }

    /// Workloads stay `Pending` until [`InMemoryCluster::start_workload`] is called.
    pub fn with_manual_start() -> Self {
        Self::build(false)
    }

    fn build(auto_start: bool) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            state: Arc::new(Mutex::new(ClusterState {
                workloads: BTreeMap::new(),
                endpoints: BTreeMap::new(),
                next_node_port: NODE_PORT_MIN,
                next_ip: 2,
                auto_start,
                faults: HashSet::new(),
            })),
            events,
        }
    }

    pub async fn inject_fault(&self, fault: Fault) {
        self.state.lock().await.faults.insert(fault);
    }

    pub async fn clear_faults(&self) {
        self.state.lock().await.faults.clear();
    }

    /// Moves a pending workload to `Running` and notifies watchers.
    pub async fn start_workload(&self, name: &str) -> Result<(), ClusterError> {
        let mut state = self.state.lock().await;
        let ip = state.allocate_ip();
        let workload = state
            .workloads
            .get_mut(name)
            .ok_or_else(|| ClusterError::NotFound(format!("pod {name}")))?;
        workload.phase = WorkloadPhase::Running;
        workload.pod_ip = Some(ip);
        let _ = self.events.send(WatchEvent {
            event_type: WatchEventType::Modified,
            object: workload.clone(),
        });
        Ok(())
    }

    pub async fn workload_names(&self) -> Vec<String> {
        self.state.lock().await.workloads.keys().cloned().collect()
    }

    pub async fn endpoint_names(&self) -> Vec<String> {
        self.state.lock().await.endpoints.keys().cloned().collect()
    }
}

#[async_trait]
impl ClusterApi for InMemoryCluster {
    async fn create_workload(&self, spec: &WorkloadSpec) -> Result<Workload, ClusterError> {
        let mut state = self.state.lock().await;
        state.check(Fault::CreateWorkload)?;
        if state.workloads.contains_key(&spec.name) {
            return Err(ClusterError::Api {
                status: 409,
                body: format!("pods \"{}\" already exists", spec.name),
            });
        }

        let workload = Workload {
            name: spec.name.clone(),
            labels: spec.labels.clone(),
            phase: WorkloadPhase::Pending,
            pod_ip: None,
        };
        state.workloads.insert(spec.name.clone(), workload.clone());
        let _ = self.events.send(WatchEvent {
            event_type: WatchEventType::Added,
            object: workload.clone(),
        });

        if state.auto_start {
            let ip = state.allocate_ip();
            if let Some(running) = state.workloads.get_mut(&spec.name) {
                running.phase = WorkloadPhase::Running;
                running.pod_ip = Some(ip);
                let _ = self.events.send(WatchEvent {
                    event_type: WatchEventType::Modified,
                    object: running.clone(),
                });
            }
        }

        tracing::debug!(workload = %spec.name, "in-memory workload created");
        Ok(workload)
    }

    async fn list_workloads(&self) -> Result<Vec<Workload>, ClusterError> {
        Ok(self.state.lock().await.workloads.values().cloned().collect())
    }

    async fn delete_workload(&self, name: &str) -> Result<(), ClusterError> {
        let mut state = self.state.lock().await;
        state.check(Fault::DeleteWorkload)?;
        let workload = state
            .workloads
            .remove(name)
            .ok_or_else(|| ClusterError::NotFound(format!("pod {name}")))?;
        let _ = self.events.send(WatchEvent {
            event_type: WatchEventType::Deleted,
            object: workload,
        });
        Ok(())
    }

    async fn watch_workloads(&self) -> Result<WatchStream, ClusterError> {
        // Snapshot and subscribe under the same lock so no event falls in between.
        let state = self.state.lock().await;
        state.check(Fault::Watch)?;
        let rx = self.events.subscribe();
        let snapshot: Vec<Result<WatchEvent, ClusterError>> = state
            .workloads
            .values()
            .map(|w| {
                Ok(WatchEvent {
                    event_type: WatchEventType::Added,
                    object: w.clone(),
                })
            })
            .collect();
        drop(state);

        let live = futures_util::stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => return Some((Ok(event), rx)),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("in-memory watch lagged, skipped {n} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        Ok(futures_util::stream::iter(snapshot).chain(live).boxed())
    }

    async fn create_endpoint(&self, spec: &EndpointSpec) -> Result<Endpoint, ClusterError> {
        let mut state = self.state.lock().await;
        state.check(Fault::CreateEndpoint)?;
        if state.endpoints.contains_key(&spec.name) {
            return Err(ClusterError::Api {
                status: 409,
                body: format!("services \"{}\" already exists", spec.name),
            });
        }
        let node_port = state
            .allocate_node_port()
            .ok_or_else(|| ClusterError::Api {
                status: 422,
                body: "provided port range is full".to_string(),
            })?;
        let endpoint = Endpoint {
            name: spec.name.clone(),
            selector: spec.selector.clone(),
            node_port: Some(node_port),
        };
        state.endpoints.insert(spec.name.clone(), endpoint.clone());
        tracing::debug!(endpoint = %spec.name, node_port, "in-memory endpoint created");
        Ok(endpoint)
    }

    async fn list_endpoints(&self) -> Result<Vec<Endpoint>, ClusterError> {
        let state = self.state.lock().await;
        state.check(Fault::ListEndpoints)?;
        Ok(state.endpoints.values().cloned().collect())
    }

    async fn delete_endpoint(&self, name: &str) -> Result<(), ClusterError> {
        let mut state = self.state.lock().await;
        state.check(Fault::DeleteEndpoint)?;
        state
            .endpoints
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ClusterError::NotFound(format!("service {name}")))
    }
}

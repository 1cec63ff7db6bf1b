use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::config::KubeConfig;

use super::{
    ClusterApi, ClusterError, Endpoint, EndpointSpec, WatchEvent, WatchEventType, WatchStream,
    Workload, WorkloadPhase, WorkloadSpec,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Kubernetes core/v1 client: pods are workloads, NodePort services are endpoints.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    base_url: String,
    namespace: String,
    token: Option<String>,
}

impl KubeCluster {
    /// `base_url` is the API server root, e.g. `https://10.0.0.1:6443` or a
    /// `kubectl proxy` address.
    pub fn new(base_url: &str, namespace: &str) -> Result<Self, ClusterError> {
        Self::build(base_url, namespace, Client::builder())
    }

    /// Client for the configured API server: extra CA bundle, optional bearer
    /// token, and TLS verification switched off only when asked to.
    pub fn from_config(config: &KubeConfig) -> Result<Self, ClusterError> {
        let mut builder = Client::builder().danger_accept_invalid_certs(config.insecure_tls);
        if let Some(ref path) = config.ca_cert {
            let pem = std::fs::read(path).map_err(|e| {
                ClusterError::Config(format!("cannot read CA bundle {}: {e}", path.display()))
            })?;
            let certs = reqwest::Certificate::from_pem_bundle(&pem).map_err(|e| {
                ClusterError::Config(format!("invalid CA bundle {}: {e}", path.display()))
            })?;
            if certs.is_empty() {
                return Err(ClusterError::Config(format!(
                    "no certificates in CA bundle {}",
                    path.display()
                )));
            }
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
        }
        let cluster = Self::build(&config.api_url, &config.namespace, builder)?;
        Ok(match config.token.clone() {
            Some(token) => cluster.with_token(token),
            None => cluster,
        })
    }

    fn build(
        base_url: &str,
        namespace: &str,
        builder: reqwest::ClientBuilder,
    ) -> Result<Self, ClusterError> {
        // No client-wide timeout: it would also cut off long-lived watch bodies.
        let client = builder.connect_timeout(CONNECT_TIMEOUT).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            namespace: namespace.to_string(),
            token: None,
        })
    }

    pub fn with_token(mut self, token: String) -> Self {
        self.token = Some(token);
        self
    }

    fn url(&self, resource: &str) -> String {
        format!(
            "{}/api/v1/namespaces/{}/{}",
            self.base_url, self.namespace, resource
        )
    }

    fn apply_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(ref token) = self.token {
            builder.header("Authorization", format!("Bearer {token}"))
        } else {
            builder
        }
    }

    async fn send(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, ClusterError> {
        let resp = self
            .apply_auth(builder)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        check_status(resp).await
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ClusterError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    if status == 404 {
        return Err(ClusterError::NotFound(body));
    }
    Err(ClusterError::Api { status, body })
}

async fn decode<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
) -> Result<T, ClusterError> {
    let bytes = resp.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| ClusterError::Decode(e.to_string()))
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn create_workload(&self, spec: &WorkloadSpec) -> Result<Workload, ClusterError> {
        let builder = self
            .client
            .post(self.url("pods"))
            .json(&pod_manifest(spec));
        let pod: PodObject = decode(self.send(builder).await?).await?;
        tracing::info!(workload = %pod.metadata.name, namespace = %self.namespace, "pod created");
        Ok(pod.into())
    }

    async fn list_workloads(&self) -> Result<Vec<Workload>, ClusterError> {
        let list: ObjectList<PodObject> =
            decode(self.send(self.client.get(self.url("pods"))).await?).await?;
        Ok(list.items.into_iter().map(Workload::from).collect())
    }

    async fn delete_workload(&self, name: &str) -> Result<(), ClusterError> {
        let builder = self.client.delete(self.url(&format!("pods/{name}")));
        self.send(builder).await?;
        tracing::info!(workload = %name, "pod deleted");
        Ok(())
    }

    async fn watch_workloads(&self) -> Result<WatchStream, ClusterError> {
        let builder = self
            .client
            .get(self.url("pods"))
            .query(&[("watch", "true")]);
        let resp = self.apply_auth(builder).send().await?;
        let resp = check_status(resp).await?;

        let body = Box::pin(resp.bytes_stream());
        let stream = futures_util::stream::unfold(
            (body, Vec::<u8>::new()),
            |(mut body, mut buf)| async move {
                loop {
                    if let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                        let line: Vec<u8> = buf.drain(..=pos).collect();
                        let line = &line[..line.len() - 1];
                        if line.iter().all(u8::is_ascii_whitespace) {
                            continue;
                        }
                        match decode_watch_line(line) {
                            Ok(Some(event)) => return Some((Ok(event), (body, buf))),
                            Ok(None) => continue,
                            Err(e) => return Some((Err(e), (body, buf))),
                        }
                    }
                    match body.next().await {
                        Some(Ok(chunk)) => buf.extend_from_slice(&chunk),
                        Some(Err(e)) => return Some((Err(ClusterError::Http(e)), (body, buf))),
                        None => return None,
                    }
                }
            },
        );
        Ok(stream.boxed())
    }

    async fn create_endpoint(&self, spec: &EndpointSpec) -> Result<Endpoint, ClusterError> {
        let builder = self
            .client
            .post(self.url("services"))
            .json(&service_manifest(spec));
        let svc: ServiceObject = decode(self.send(builder).await?).await?;
        tracing::info!(endpoint = %svc.metadata.name, "service created");
        Ok(svc.into())
    }

    async fn list_endpoints(&self) -> Result<Vec<Endpoint>, ClusterError> {
        let list: ObjectList<ServiceObject> =
            decode(self.send(self.client.get(self.url("services"))).await?).await?;
        Ok(list.items.into_iter().map(Endpoint::from).collect())
    }

    async fn delete_endpoint(&self, name: &str) -> Result<(), ClusterError> {
        let builder = self.client.delete(self.url(&format!("services/{name}")));
        self.send(builder).await?;
        tracing::info!(endpoint = %name, "service deleted");
        Ok(())
    }
}

pub fn pod_manifest(spec: &WorkloadSpec) -> serde_json::Value {
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "name": spec.name,
            "labels": spec.labels,
        },
        "spec": {
            "containers": [{
                "name": spec.container_name,
                "image": spec.image,
                "ports": [{ "containerPort": spec.container_port }]
            }]
        }
    })
}

pub fn service_manifest(spec: &EndpointSpec) -> serde_json::Value {
    json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": { "name": spec.name },
        "spec": {
            "selector": spec.selector,
            "ports": [{
                "protocol": spec.protocol,
                "port": spec.port,
                "targetPort": spec.target_port
            }],
            "type": "NodePort"
        }
    })
}

/// Decodes one line of a `?watch=true` response. Unknown event types yield `None`,
/// `ERROR` events carry a `Status` object and become an error.
pub fn decode_watch_line(line: &[u8]) -> Result<Option<WatchEvent>, ClusterError> {
    let raw: RawWatchEvent =
        serde_json::from_slice(line).map_err(|e| ClusterError::Decode(e.to_string()))?;

    if raw.event_type == "ERROR" {
        let status: StatusObject = serde_json::from_value(raw.object)
            .map_err(|e| ClusterError::Decode(e.to_string()))?;
        return Err(ClusterError::Api {
            status: status.code.unwrap_or(500),
            body: status.message.unwrap_or_default(),
        });
    }

    let Some(event_type) = WatchEventType::parse(&raw.event_type) else {
        tracing::debug!("ignoring watch event of type {}", raw.event_type);
        return Ok(None);
    };
    let pod: PodObject =
        serde_json::from_value(raw.object).map_err(|e| ClusterError::Decode(e.to_string()))?;
    Ok(Some(WatchEvent {
        event_type,
        object: pod.into(),
    }))
}

#[derive(Debug, Deserialize)]
struct ObjectList<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Default, Deserialize)]
struct ObjectMeta {
    #[serde(default)]
    name: String,
    #[serde(default)]
    labels: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct PodObject {
    #[serde(default)]
    metadata: ObjectMeta,
    #[serde(default)]
    status: Option<PodStatus>,
}

#[derive(Debug, Deserialize)]
struct PodStatus {
    phase: Option<String>,
    #[serde(rename = "podIP")]
    pod_ip: Option<String>,
}

impl From<PodObject> for Workload {
    fn from(pod: PodObject) -> Self {
        let (phase, pod_ip) = match pod.status {
            Some(status) => (
                status
                    .phase
                    .as_deref()
                    .map(WorkloadPhase::parse)
                    .unwrap_or(WorkloadPhase::Pending),
                status.pod_ip,
            ),
            None => (WorkloadPhase::Pending, None),
        };
        Workload {
            name: pod.metadata.name,
            labels: pod.metadata.labels.unwrap_or_default(),
            phase,
            pod_ip,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ServiceObject {
    #[serde(default)]
    metadata: ObjectMeta,
    #[serde(default)]
    spec: Option<ServiceSpec>,
}

#[derive(Debug, Deserialize)]
struct ServiceSpec {
    #[serde(default)]
    selector: Option<BTreeMap<String, String>>,
    #[serde(default)]
    ports: Vec<ServicePort>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServicePort {
    node_port: Option<u16>,
}

impl From<ServiceObject> for Endpoint {
    fn from(svc: ServiceObject) -> Self {
        let (selector, node_port) = match svc.spec {
            Some(spec) => (
                spec.selector.unwrap_or_default(),
                spec.ports.first().and_then(|p| p.node_port),
            ),
            None => (BTreeMap::new(), None),
        };
        Endpoint {
            name: svc.metadata.name,
            selector,
            node_port,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawWatchEvent {
    #[serde(rename = "type")]
    event_type: String,
    object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct StatusObject {
    code: Option<u16>,
    message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pod_manifest_shape() {
        let spec = WorkloadSpec {
            name: "damas-pod-abc".into(),
            labels: BTreeMap::from([("app".to_string(), "damas-pod-abc".to_string())]),
            container_name: "damas-pod".into(),
            image: "igormendonca/damas-pod".into(),
            container_port: 8080,
        };
        let manifest = pod_manifest(&spec);
        assert_eq!(manifest["metadata"]["name"], "damas-pod-abc");
        assert_eq!(manifest["metadata"]["labels"]["app"], "damas-pod-abc");
        assert_eq!(manifest["spec"]["containers"][0]["image"], "igormendonca/damas-pod");
        assert_eq!(
            manifest["spec"]["containers"][0]["ports"][0]["containerPort"],
            8080
        );
    }

    #[test]
    fn test_service_manifest_is_node_port() {
        let spec = EndpointSpec {
            name: "game-service-damas-pod-abc".into(),
            selector: BTreeMap::from([("app".to_string(), "damas-pod-abc".to_string())]),
            protocol: "TCP".into(),
            port: 8080,
            target_port: 8080,
        };
        let manifest = service_manifest(&spec);
        assert_eq!(manifest["spec"]["type"], "NodePort");
        assert_eq!(manifest["spec"]["selector"]["app"], "damas-pod-abc");
        assert_eq!(manifest["spec"]["ports"][0]["targetPort"], 8080);
        assert!(manifest["spec"]["ports"][0].get("nodePort").is_none());
    }

    #[test]
    fn test_decode_running_pod_event() {
        let line = br#"{"type":"MODIFIED","object":{"metadata":{"name":"p1","labels":{"app":"p1"}},"status":{"phase":"Running","podIP":"10.1.0.7"}}}"#;
        let event = decode_watch_line(line).unwrap().unwrap();
        assert_eq!(event.event_type, WatchEventType::Modified);
        assert_eq!(event.object.name, "p1");
        assert_eq!(event.object.phase, WorkloadPhase::Running);
        assert_eq!(event.object.pod_ip.as_deref(), Some("10.1.0.7"));
        assert_eq!(event.object.labels["app"], "p1");
    }

    #[test]
    fn test_decode_pod_without_status_is_pending() {
        let line = br#"{"type":"ADDED","object":{"metadata":{"name":"p2"}}}"#;
        let event = decode_watch_line(line).unwrap().unwrap();
        assert_eq!(event.object.phase, WorkloadPhase::Pending);
        assert!(event.object.pod_ip.is_none());
    }

    #[test]
    fn test_decode_error_event() {
        let line = br#"{"type":"ERROR","object":{"kind":"Status","code":410,"message":"too old resource version"}}"#;
        match decode_watch_line(line) {
            Err(ClusterError::Api { status, body }) => {
                assert_eq!(status, 410);
                assert_eq!(body, "too old resource version");
            }
            other => panic!("expected api error, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_garbage_is_decode_error() {
        assert!(matches!(
            decode_watch_line(b"not json"),
            Err(ClusterError::Decode(_))
        ));
    }

    #[test]
    fn test_service_list_conversion() {
        let body = r#"{"items":[
            {"metadata":{"name":"kubernetes"},"spec":{"ports":[{"port":443}]}},
            {"metadata":{"name":"game-service-p1"},"spec":{"selector":{"app":"p1"},"ports":[{"port":8080,"nodePort":31234}]}}
        ]}"#;
        let list: ObjectList<ServiceObject> = serde_json::from_str(body).unwrap();
        let endpoints: Vec<Endpoint> = list.items.into_iter().map(Endpoint::from).collect();
        assert_eq!(endpoints[0].node_port, None);
        assert_eq!(endpoints[1].name, "game-service-p1");
        assert_eq!(endpoints[1].node_port, Some(31234));
        assert_eq!(endpoints[1].selector["app"], "p1");
    }

    #[test]
    fn test_url_building() {
        let cluster = KubeCluster::new("http://127.0.0.1:8001/", "games").unwrap();
        assert_eq!(
            cluster.url("pods"),
            "http://127.0.0.1:8001/api/v1/namespaces/games/pods"
        );
    }

    fn kube_config(ca_cert: Option<std::path::PathBuf>) -> KubeConfig {
        KubeConfig {
            api_url: "https://10.96.0.1:443".into(),
            token: Some("sa-token".into()),
            namespace: "games".into(),
            insecure_tls: false,
            ca_cert,
        }
    }

    #[test]
    fn test_from_config_loads_ca_bundle() {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/test-ca.pem");
        let cluster = KubeCluster::from_config(&kube_config(Some(path))).unwrap();
        assert_eq!(cluster.token.as_deref(), Some("sa-token"));
        assert_eq!(cluster.url("pods"), "https://10.96.0.1:443/api/v1/namespaces/games/pods");
    }

    #[test]
    fn test_from_config_missing_ca_is_error() {
        let path = std::env::temp_dir().join("matchserver-no-such-ca.pem");
        assert!(matches!(
            KubeCluster::from_config(&kube_config(Some(path))),
            Err(ClusterError::Config(_))
        ));
    }

    #[test]
    fn test_from_config_rejects_file_without_certificates() {
        let path = std::env::temp_dir().join(format!("matchserver-ca-{}.pem", uuid::Uuid::new_v4()));
        std::fs::write(&path, "not a certificate\n").unwrap();
        let result = KubeCluster::from_config(&kube_config(Some(path.clone())));
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(result, Err(ClusterError::Config(_))));
    }
}

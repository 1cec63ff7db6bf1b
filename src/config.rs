use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
pub enum ClusterBackend {
    Kubernetes,
    Memory,
}

impl ClusterBackend {
    pub fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "memory" | "in-memory" | "local" => ClusterBackend::Memory,
            _ => ClusterBackend::Kubernetes,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterBackend::Kubernetes => "kubernetes",
            ClusterBackend::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone)]
pub struct KubeConfig {
    pub api_url: String,
    pub token: Option<String>,
    pub namespace: String,
    pub insecure_tls: bool,
    /// PEM bundle trusted in addition to the system roots.
    pub ca_cert: Option<PathBuf>,
}

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

fn read_trimmed(path: &Path) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

impl KubeConfig {
    /// Explicit `KUBE_*` settings first. When running inside a pod, the API server
    /// address comes from `KUBERNETES_SERVICE_HOST`/`_PORT` and the token, CA and
    /// namespace from the mounted service account.
    fn from_env() -> Self {
        let in_cluster = match (
            std::env::var("KUBERNETES_SERVICE_HOST"),
            std::env::var("KUBERNETES_SERVICE_PORT"),
        ) {
            (Ok(host), Ok(port)) if !host.is_empty() && !port.is_empty() => {
                // IPv6 service hosts need brackets in a URL.
                let host = if host.contains(':') {
                    format!("[{host}]")
                } else {
                    host
                };
                Some(format!("https://{host}:{port}"))
            }
            _ => None,
        };
        let sa_dir = PathBuf::from(env_or("KUBE_SERVICE_ACCOUNT_DIR", SERVICE_ACCOUNT_DIR));

        let api_url = std::env::var("KUBE_API_URL")
            .ok()
            .or_else(|| in_cluster.clone())
            .unwrap_or_else(|| "http://127.0.0.1:8001".to_string());

        let mut token = std::env::var("KUBE_TOKEN").ok().filter(|t| !t.is_empty());
        let mut ca_cert = std::env::var("KUBE_CA_CERT")
            .ok()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);
        let mut namespace = std::env::var("KUBE_NAMESPACE").ok().filter(|n| !n.is_empty());

        if in_cluster.is_some() {
            token = token.or_else(|| read_trimmed(&sa_dir.join("token")));
            ca_cert = ca_cert.or_else(|| {
                let path = sa_dir.join("ca.crt");
                path.is_file().then_some(path)
            });
            namespace = namespace.or_else(|| read_trimmed(&sa_dir.join("namespace")));
        }

        Self {
            api_url,
            token,
            namespace: namespace.unwrap_or_else(|| "default".to_string()),
            insecure_tls: std::env::var("KUBE_INSECURE_TLS")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            ca_cert,
        }
    }
}

/// How each per-match game workload is built and exposed.
#[derive(Debug, Clone)]
pub struct GameConfig {
    pub image: String,
    pub container_port: u16,
    pub workload_prefix: String,
    pub endpoint_prefix: String,
    pub ready_timeout_secs: u64,
}

pub struct Config {
    pub port: u16,
    pub backend: ClusterBackend,
    pub kube: KubeConfig,
    pub game: GameConfig,
    /// Host part of the address handed to players.
    pub node_host: String,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Config {
    pub fn from_env() -> Self {
        let backend = ClusterBackend::parse(&env_or("CLUSTER_BACKEND", "kubernetes"));

        let kube = KubeConfig::from_env();

        let game = GameConfig {
            image: env_or("GAME_IMAGE", "igormendonca/damas-pod"),
            container_port: env_parse("GAME_PORT", 8080),
            workload_prefix: env_or("WORKLOAD_PREFIX", "damas-pod"),
            endpoint_prefix: env_or("ENDPOINT_PREFIX", "game-service-"),
            ready_timeout_secs: env_parse("READY_TIMEOUT_SECS", 60),
        };

        // Explicit override first, then minikube, then Docker Desktop's loopback.
        let node_host = std::env::var("NODE_HOST")
            .or_else(|_| std::env::var("MINIKUBE_IP"))
            .unwrap_or_else(|_| "localhost".to_string());

        Self {
            port: env_parse("PORT", 3000),
            backend,
            kube,
            game,
            node_host,
        }
    }
}

use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

/// Opaque handle for a live client connection. Unique for the lifetime of the process.
pub fn connection_id() -> String {
    let n = NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed);
    format!("conn-{n}")
}

/// Cluster object name for a new game workload, e.g. `damas-pod-3f2a...`.
///
/// The random part is a v4 uuid in simple (hyphenless) form so the result stays a
/// valid DNS-1123 label as long as the prefix is one.
pub fn workload_name(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4().simple())
}

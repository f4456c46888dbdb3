use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use log::{info, warn};
use serde::{Deserialize, Serialize};

/// Pod label carrying the owner tag; absent means anonymous.
pub const USER_LABEL: &str = "user";
/// Pod label carrying the user-set priority; the higher the more important.
pub const PRIORITY_LABEL: &str = "priority";
/// Container resource limit counting requested GPU devices.
pub const GPU_RESOURCE: &str = "nvidia.com/gpu";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    Running,
    Pending,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    /// Anything the API reports outside the documented phases is Unknown;
    /// every phase other than Running is treated uniformly as not running.
    pub fn parse(phase: Option<&str>) -> Self {
        match phase {
            Some("Running") => PodPhase::Running,
            Some("Pending") => PodPhase::Pending,
            Some("Succeeded") => PodPhase::Succeeded,
            Some("Failed") => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }
}

/// Immutable value extracted from one pod snapshot: identity, owner, run
/// state, GPU request, priority, timestamps. Extraction is total; fields
/// that cannot be recovered fall back to their documented defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodDescriptor {
    pub name: String,
    pub user: Option<String>,
    pub status: PodPhase,
    pub date_created: DateTime<Utc>,
    pub date_started: DateTime<Utc>,
    /// Number of GPUs requested; 0 denotes a CPU-only workload.
    pub num_gpu: u32,
    pub user_priority: i64,
}

impl PodDescriptor {
    pub fn from_pod(pod: &Pod) -> Self {
        let name = pod.metadata.name.clone().unwrap_or_default();
        let labels = pod.metadata.labels.clone().unwrap_or_default();

        let user = labels.get(USER_LABEL).cloned();
        let user_priority = extract_priority(&labels, &name);
        let num_gpu = extract_num_gpu(pod, &name);

        let date_created = pod
            .metadata
            .creation_timestamp
            .as_ref()
            .map(|t| t.0)
            .unwrap_or_else(Utc::now);
        let date_started = extract_started_at(pod).unwrap_or(date_created);

        let status = PodPhase::parse(
            pod.status
                .as_ref()
                .and_then(|s| s.phase.as_deref()),
        );

        Self {
            name,
            user,
            status,
            date_created,
            date_started,
            num_gpu,
            user_priority,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == PodPhase::Running
    }

    pub fn user_or_anonymous(&self) -> &str {
        self.user.as_deref().unwrap_or("anonymous")
    }
}

fn extract_priority(
    labels: &std::collections::BTreeMap<String, String>,
    pod_name: &str,
) -> i64 {
    match labels.get(PRIORITY_LABEL) {
        None => 0,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            info!(
                "Non-numeric value for labels|{}: {} in pod {}",
                PRIORITY_LABEL, raw, pod_name
            );
            0
        }),
    }
}

fn extract_num_gpu(pod: &Pod, pod_name: &str) -> u32 {
    let mut num_gpu = 0;
    let containers = pod.spec.as_ref().map(|s| s.containers.as_slice()).unwrap_or(&[]);
    for container in containers {
        let limit = container
            .resources
            .as_ref()
            .and_then(|r| r.limits.as_ref())
            .and_then(|l| l.get(GPU_RESOURCE));
        if let Some(quantity) = limit {
            match quantity.0.trim().parse::<u32>() {
                Ok(n) => num_gpu += n,
                Err(_) => warn!(
                    "Unexpected value for limits|{}: {} in pod {}",
                    GPU_RESOURCE, quantity.0, pod_name
                ),
            }
        }
    }
    num_gpu
}

fn extract_started_at(pod: &Pod) -> Option<DateTime<Utc>> {
    let statuses = pod
        .status
        .as_ref()
        .and_then(|s| s.container_statuses.as_deref())
        .unwrap_or(&[]);
    let mut started_at = None;
    for status in statuses {
        if let Some(running) = status.state.as_ref().and_then(|s| s.running.as_ref()) {
            // TODO take the earliest start across containers
            started_at = running.started_at.as_ref().map(|t| t.0);
        }
    }
    started_at
}

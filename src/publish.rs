//! Read-side snapshot publisher: on every state change, recompute the fair
//! ordering, merge the latest utilization per pod, and cache the serialized
//! result for the web layer.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use log::error;
use serde::Serialize;

use crate::fairness::{calculate_order, OrderedPod};
use crate::pods::supervisor::{Listener, SharedDetails};

/// One entry of the published queue snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct QueueEntry {
    #[serde(flatten)]
    pub pod: OrderedPod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utilization_mem: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utilization_compute: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utilization_date: Option<DateTime<Utc>>,
}

pub struct SnapshotPublisher {
    snapshot: Arc<RwLock<String>>,
    details: SharedDetails,
}

impl SnapshotPublisher {
    pub fn new(details: SharedDetails) -> Self {
        Self {
            snapshot: Arc::new(RwLock::new("[]".to_string())),
            details,
        }
    }

    /// Shared handle to the cached JSON snapshot.
    pub fn snapshot(&self) -> Arc<RwLock<String>> {
        Arc::clone(&self.snapshot)
    }

    /// The listener to register with the supervisor.
    pub fn listener(&self) -> Listener {
        let snapshot = Arc::clone(&self.snapshot);
        let details = Arc::clone(&self.details);
        Box::new(move |pods| {
            let ordered = calculate_order(pods);
            let entries: Vec<QueueEntry> = {
                let details = details.read().unwrap();
                ordered
                    .into_iter()
                    .map(|pod| {
                        let utilization = details
                            .get(&pod.pod.name)
                            .and_then(|d| d.utilization.clone());
                        QueueEntry {
                            utilization_mem: utilization.as_ref().and_then(|u| u.memory),
                            utilization_compute: utilization.as_ref().and_then(|u| u.compute),
                            utilization_date: utilization.as_ref().map(|u| u.date),
                            pod,
                        }
                    })
                    .collect()
            };
            match serde_json::to_string(&entries) {
                Ok(json) => *snapshot.write().unwrap() = json,
                Err(e) => error!("failed to serialize queue snapshot: {}", e),
            }
        })
    }
}

//! Event source adapter: wraps the Kubernetes pod watch into a normalized
//! event stream, reconnecting on any terminal condition.

use std::time::Duration;

use anyhow::Result;
use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams, WatchEvent, WatchParams};
use log::{debug, info, warn};
use tokio::sync::mpsc;

/// Fixed backoff between reconnection attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodEventKind {
    Added,
    Modified,
    Deleted,
}

/// Normalized pod event: kind, name, and the raw snapshot it came with.
#[derive(Debug, Clone)]
pub struct PodEvent {
    pub kind: PodEventKind,
    pub pod_name: String,
    pub pod: Pod,
}

/// Runs the watch indefinitely, delivering events in arrival order. Stream
/// errors never reach the caller; every end or failure relists the
/// namespace after a fixed backoff. Returns only when the event sink is
/// gone (the supervisor shut down).
pub async fn run_pod_watch(pods: Api<Pod>, events: mpsc::Sender<PodEvent>) {
    loop {
        info!("Kubernetes pod watch starting");
        match watch_once(&pods, &events).await {
            Ok(()) => warn!(
                "Kubernetes watch has run out of events, restarting in {}s",
                RECONNECT_DELAY.as_secs()
            ),
            Err(e) => warn!(
                "Kubernetes pod watch failed: {:#}, restarting in {}s",
                e,
                RECONNECT_DELAY.as_secs()
            ),
        }
        if events.is_closed() {
            return;
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

/// One list-then-watch cycle. Current pods are replayed as ADDED, then the
/// watch continues from the list's resource version.
async fn watch_once(pods: &Api<Pod>, events: &mpsc::Sender<PodEvent>) -> Result<()> {
    let initial = pods.list(&ListParams::default()).await?;
    let resource_version = initial.metadata.resource_version.clone().unwrap_or_default();

    for pod in initial.items {
        if !forward(events, PodEventKind::Added, pod).await {
            return Ok(());
        }
    }

    let mut stream = pods
        .watch(&WatchParams::default(), &resource_version)
        .await?
        .boxed();
    while let Some(event) = stream.try_next().await? {
        let delivered = match event {
            WatchEvent::Added(pod) => forward(events, PodEventKind::Added, pod).await,
            WatchEvent::Modified(pod) => forward(events, PodEventKind::Modified, pod).await,
            WatchEvent::Deleted(pod) => forward(events, PodEventKind::Deleted, pod).await,
            WatchEvent::Bookmark(_) => {
                debug!("dropping bookmark event from pod watch");
                true
            }
            WatchEvent::Error(e) => {
                // An error frame (e.g. expired resource version) invalidates
                // the watch window; relist and start over.
                warn!("error event from pod watch: {}", e);
                return Ok(());
            }
        };
        if !delivered {
            return Ok(());
        }
    }
    Ok(())
}

/// Normalizes one pod into an event and hands it to the sink. Pods without
/// a name are logged and dropped. Returns false when the sink is gone.
async fn forward(events: &mpsc::Sender<PodEvent>, kind: PodEventKind, pod: Pod) -> bool {
    let pod_name = match pod.metadata.name.clone() {
        Some(name) => name,
        None => {
            warn!("dropping {:?} event for a pod without a name", kind);
            return true;
        }
    };
    debug!("Event: {:?} {}", kind, pod_name);
    events
        .send(PodEvent {
            kind,
            pod_name,
            pod,
        })
        .await
        .is_ok()
}

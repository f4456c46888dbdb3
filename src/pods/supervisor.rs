//! Pod list supervisor: one serializing task that owns the pod records,
//! applies watch events, routes sampler reports, and fans state changes
//! out to listeners.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};

use k8s_openapi::api::core::v1::Pod;
use log::{debug, error, info};
use tokio::sync::{mpsc, watch};

use crate::k8s::K8sClient;
use crate::pods::descriptor::PodDescriptor;
use crate::pods::record::PodRecord;
use crate::pods::watch::{run_pod_watch, PodEvent, PodEventKind};
use crate::sampler::{PodExec, SamplerReport, UtilizationReport};

const EVENT_CHANNEL_CAPACITY: usize = 64;
const REPORT_CHANNEL_CAPACITY: usize = 64;

/// Notification sink invoked with the current descriptor list (sorted by
/// name) on every state change.
pub type Listener = Box<dyn Fn(&[PodDescriptor]) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(usize);

/// Read view of one record, published for the detail page.
#[derive(Clone)]
pub struct PodDetail {
    pub descriptor: PodDescriptor,
    pub utilization: Option<UtilizationReport>,
    pub pod: Pod,
}

/// Latest descriptor list, sorted by name. Written only by the supervisor.
pub type SharedPods = Arc<RwLock<Vec<PodDescriptor>>>;
/// Latest per-pod detail, keyed by name. Written only by the supervisor.
pub type SharedDetails = Arc<RwLock<HashMap<String, PodDetail>>>;

pub struct PodListSupervisor {
    namespace: String,
    exec: Arc<dyn PodExec>,
    records: HashMap<String, PodRecord>,
    listeners: Vec<(ListenerId, Listener)>,
    next_listener_id: usize,
    published: SharedPods,
    details: SharedDetails,
    report_tx: mpsc::Sender<SamplerReport>,
    report_rx: Option<mpsc::Receiver<SamplerReport>>,
}

impl PodListSupervisor {
    pub fn new(namespace: &str, exec: Arc<dyn PodExec>) -> Self {
        let (report_tx, report_rx) = mpsc::channel(REPORT_CHANNEL_CAPACITY);
        Self {
            namespace: namespace.to_string(),
            exec,
            records: HashMap::new(),
            listeners: Vec::new(),
            next_listener_id: 0,
            published: Arc::new(RwLock::new(Vec::new())),
            details: Arc::new(RwLock::new(HashMap::new())),
            report_tx,
            report_rx: Some(report_rx),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Current descriptors, sorted by name ascending.
    pub fn get_pods(&self) -> Vec<PodDescriptor> {
        let mut pods: Vec<PodDescriptor> =
            self.records.values().map(|r| r.descriptor().clone()).collect();
        pods.sort_by(|a, b| a.name.cmp(&b.name));
        pods
    }

    /// Shared handle to the published descriptor list; stays valid after
    /// the supervisor is moved into its run task.
    pub fn pods_handle(&self) -> SharedPods {
        Arc::clone(&self.published)
    }

    /// Shared handle to the published per-pod detail map.
    pub fn details_handle(&self) -> SharedDetails {
        Arc::clone(&self.details)
    }

    pub fn add_listener(&mut self, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_listener_id);
        self.next_listener_id += 1;
        self.listeners.push((id, listener));
        id
    }

    pub fn remove_listener(&mut self, id: ListenerId) {
        self.listeners.retain(|(lid, _)| *lid != id);
    }

    /// Runs the event loop: applies watch events and sampler reports until
    /// the shutdown signal fires, then stops the event source and disposes
    /// every record (stopping all samplers) before returning.
    pub async fn run(mut self, client: K8sClient, mut shutdown: watch::Receiver<bool>) {
        let mut report_rx = match self.report_rx.take() {
            Some(rx) => rx,
            None => {
                error!("pod list supervisor started twice");
                return;
            }
        };

        let (event_tx, mut event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let watcher = tokio::spawn(run_pod_watch(client.pods(&self.namespace), event_tx));
        info!("pod list supervisor running for namespace {}", self.namespace);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                Some(event) = event_rx.recv() => self.apply_event(event).await,
                Some(report) = report_rx.recv() => self.handle_report(report),
                else => break,
            }
        }

        watcher.abort();
        let _ = watcher.await;
        for (_, mut record) in self.records.drain() {
            record.dispose().await;
        }
        info!("pod list supervisor stopped");
    }

    /// Applies one normalized watch event and signals the state change.
    pub(crate) async fn apply_event(&mut self, event: PodEvent) {
        match event.kind {
            PodEventKind::Added | PodEventKind::Modified => {
                self.upsert(event.pod_name, &event.pod).await;
            }
            PodEventKind::Deleted => {
                if let Some(mut record) = self.records.remove(&event.pod_name) {
                    record.dispose().await;
                }
            }
        }
        self.on_state_change();
    }

    /// Routes one sampler report into its record; reports for deleted pods
    /// or stopped samplers are discarded. Signals a state change only when
    /// the measurement differs from the stored one.
    pub(crate) fn handle_report(&mut self, report: SamplerReport) {
        let changed = match self.records.get_mut(&report.pod_name) {
            Some(record) if record.is_sampling() => record.update_utilization(report.report),
            _ => {
                debug!(
                    "discarding utilization report for unknown or stopped pod {}",
                    report.pod_name
                );
                false
            }
        };
        if changed {
            self.on_state_change();
        }
    }

    async fn upsert(&mut self, pod_name: String, pod: &Pod) {
        match self.records.get_mut(&pod_name) {
            Some(record) => {
                record
                    .update_descriptor(pod, &self.namespace, &self.exec, &self.report_tx)
                    .await;
            }
            None => {
                let record =
                    PodRecord::new(pod, &self.namespace, &self.exec, &self.report_tx).await;
                self.records.insert(pod_name, record);
            }
        }
    }

    /// Publishes the fresh read views and notifies every listener. A
    /// panicking listener is logged and does not affect the others.
    fn on_state_change(&mut self) {
        let pods = self.get_pods();

        *self.published.write().unwrap() = pods.clone();
        {
            let mut details = self.details.write().unwrap();
            details.clear();
            for record in self.records.values() {
                details.insert(
                    record.name().to_string(),
                    PodDetail {
                        descriptor: record.descriptor().clone(),
                        utilization: record.utilization().cloned(),
                        pod: record.pod().clone(),
                    },
                );
            }
        }

        for (id, listener) in &self.listeners {
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| listener(&pods)));
            if outcome.is_err() {
                error!("listener {:?} panicked during state notification", id);
            }
        }
    }
}

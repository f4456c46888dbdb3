use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use tokio::sync::mpsc;

use crate::pods::descriptor::PodDescriptor;
use crate::sampler::{GpuSampler, PodExec, SamplerReport, UtilizationReport};

/// Mutable per-pod aggregate owned by the supervisor: latest descriptor,
/// latest utilization report, and the sampler handle.
///
/// Invariant: a sampler is held exactly while the descriptor is Running.
pub struct PodRecord {
    name: String,
    descriptor: PodDescriptor,
    pod: Pod,
    utilization: Option<UtilizationReport>,
    sampler: Option<GpuSampler>,
}

impl PodRecord {
    pub async fn new(
        pod: &Pod,
        namespace: &str,
        exec: &Arc<dyn PodExec>,
        reports: &mpsc::Sender<SamplerReport>,
    ) -> Self {
        let descriptor = PodDescriptor::from_pod(pod);
        let mut record = Self {
            name: descriptor.name.clone(),
            descriptor,
            pod: pod.clone(),
            utilization: None,
            sampler: None,
        };
        record.sync_sampler(namespace, exec, reports).await;
        record
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &PodDescriptor {
        &self.descriptor
    }

    pub fn pod(&self) -> &Pod {
        &self.pod
    }

    pub fn utilization(&self) -> Option<&UtilizationReport> {
        self.utilization.as_ref()
    }

    pub fn is_sampling(&self) -> bool {
        self.sampler.is_some()
    }

    /// Extracts a fresh descriptor from the snapshot, then brings the
    /// sampler in line with the new run state.
    pub async fn update_descriptor(
        &mut self,
        pod: &Pod,
        namespace: &str,
        exec: &Arc<dyn PodExec>,
        reports: &mpsc::Sender<SamplerReport>,
    ) {
        self.descriptor = PodDescriptor::from_pod(pod);
        self.pod = pod.clone();
        self.sync_sampler(namespace, exec, reports).await;
    }

    /// Stores the report. Answers whether the measurement actually changed;
    /// an unchanged re-sample is not a state change.
    pub fn update_utilization(&mut self, report: UtilizationReport) -> bool {
        let changed = self
            .utilization
            .as_ref()
            .map_or(true, |previous| !previous.same_measurement(&report));
        self.utilization = Some(report);
        changed
    }

    /// Stops the sampler if one is running. Called exactly once, on DELETED
    /// or supervisor shutdown; awaits sampler termination before the record
    /// is dropped.
    pub async fn dispose(&mut self) {
        if let Some(mut sampler) = self.sampler.take() {
            sampler.stop().await;
        }
    }

    async fn sync_sampler(
        &mut self,
        namespace: &str,
        exec: &Arc<dyn PodExec>,
        reports: &mpsc::Sender<SamplerReport>,
    ) {
        let is_running = self.descriptor.is_running();
        let is_measuring = self.sampler.is_some();

        if is_running && !is_measuring {
            let mut sampler = GpuSampler::new(
                self.name.clone(),
                namespace.to_string(),
                Arc::clone(exec),
            );
            sampler.start(reports.clone()).await;
            self.sampler = Some(sampler);
        }

        if !is_running && is_measuring {
            if let Some(mut sampler) = self.sampler.take() {
                sampler.stop().await;
            }
        }
    }
}

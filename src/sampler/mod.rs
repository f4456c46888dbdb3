//! Per-pod GPU utilization sampling: run nvidia-smi inside the pod on a
//! cadence, parse its CSV output, and push reports to the supervisor.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// How long nvidia-smi keeps sampling inside the pod, per measurement.
pub const MEASUREMENT_DURATION_SECS: u64 = 21;
/// Interval between nvidia-smi samples within one measurement.
pub const LOOP_INTERVAL_SECS: u64 = 3;
/// Hard cap on one measurement; must exceed the in-pod duration so the
/// remote `timeout` gets a chance to fire first.
pub const MEASUREMENT_TIMEOUT: Duration = Duration::from_secs(5 + 2 * MEASUREMENT_DURATION_SECS);
/// Pause between consecutive measurements of the same pod.
pub const MEASUREMENT_COOLDOWN: Duration = Duration::from_secs(90);

const QUERY_FIELDS: &[&str] = &["index", "utilization.gpu", "memory.used", "memory.total"];

fn query_command() -> Vec<String> {
    vec![
        "/usr/bin/timeout".to_string(),
        MEASUREMENT_DURATION_SECS.to_string(),
        "/usr/bin/nvidia-smi".to_string(),
        "--format=csv".to_string(),
        format!("--loop={}", LOOP_INTERVAL_SECS),
        format!("--query-gpu={}", QUERY_FIELDS.join(",")),
    ]
}

/// The measurement channel: execute a command inside a named pod and
/// capture its stdout. One shared implementation serves all samplers and
/// must tolerate concurrent exec sessions.
#[async_trait]
pub trait PodExec: Send + Sync {
    async fn exec_capture(
        &self,
        namespace: &str,
        pod_name: &str,
        command: &[String],
    ) -> Result<String>;
}

#[derive(Debug, Error)]
pub enum SampleError {
    #[error("no samples in nvidia-smi output")]
    Empty,
    #[error("malformed nvidia-smi row: {0}")]
    Malformed(String),
}

/// Outcome of one measurement. Either memory and compute are populated
/// (success) or error is (failure); never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtilizationReport {
    /// Time-averaged fraction of GPU memory in use, in [0, 1].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<f64>,
    /// Time-averaged fraction of GPU compute in use, in [0, 1].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compute: Option<f64>,
    pub date: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UtilizationReport {
    pub fn success(memory: f64, compute: f64) -> Self {
        Self {
            memory: Some(memory),
            compute: Some(compute),
            date: Utc::now(),
            error: None,
        }
    }

    pub fn failure(error: String) -> Self {
        Self {
            memory: None,
            compute: None,
            date: Utc::now(),
            error: Some(error),
        }
    }

    /// Whether two reports carry the same measurement. The sample timestamp
    /// is excluded: a fresh sample with unchanged numbers is not new state.
    pub fn same_measurement(&self, other: &Self) -> bool {
        self.memory == other.memory && self.compute == other.compute && self.error == other.error
    }
}

/// One utilization report routed back to the supervisor.
#[derive(Debug, Clone)]
pub struct SamplerReport {
    pub pod_name: String,
    pub report: UtilizationReport,
}

/// Measures the GPU utilization of one pod in a loop until stopped.
pub struct GpuSampler {
    pod_name: String,
    namespace: String,
    exec: Arc<dyn PodExec>,
    task: Option<JoinHandle<()>>,
}

impl GpuSampler {
    pub fn new(pod_name: String, namespace: String, exec: Arc<dyn PodExec>) -> Self {
        Self {
            pod_name,
            namespace,
            exec,
            task: None,
        }
    }

    /// Starts the measurement loop, stopping any previous one first.
    pub async fn start(&mut self, reports: mpsc::Sender<SamplerReport>) {
        self.stop().await;
        let exec = Arc::clone(&self.exec);
        let namespace = self.namespace.clone();
        let pod_name = self.pod_name.clone();
        self.task = Some(tokio::spawn(measurement_loop(
            exec, namespace, pod_name, reports,
        )));
    }

    /// Stops the loop, cancelling any in-flight measurement and discarding
    /// its result. Idempotent; no reports are delivered after it returns.
    pub async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }
}

async fn measurement_loop(
    exec: Arc<dyn PodExec>,
    namespace: String,
    pod_name: String,
    reports: mpsc::Sender<SamplerReport>,
) {
    info!("GPU utilization sampler starting for {}", pod_name);
    loop {
        let report = measure(exec.as_ref(), &namespace, &pod_name).await;
        match &report.error {
            Some(err) => warn!("nvidia-smi measurement failed for {}: {}", pod_name, err),
            None => debug!("nvidia-smi result for {}", pod_name),
        }
        let delivery = reports.send(SamplerReport {
            pod_name: pod_name.clone(),
            report,
        });
        if delivery.await.is_err() {
            debug!("report channel closed, sampler for {} exiting", pod_name);
            return;
        }
        tokio::time::sleep(MEASUREMENT_COOLDOWN).await;
    }
}

/// Runs one measurement inside the pod. Never fails: timeouts and exec or
/// parse errors all come back as failed reports.
pub async fn measure(exec: &dyn PodExec, namespace: &str, pod_name: &str) -> UtilizationReport {
    let command = query_command();
    let capture = exec.exec_capture(namespace, pod_name, &command);
    let output = match tokio::time::timeout(MEASUREMENT_TIMEOUT, capture).await {
        Err(_) => {
            return UtilizationReport::failure(format!("timeout at {}", Utc::now().to_rfc3339()))
        }
        Ok(Err(e)) => return UtilizationReport::failure(format!("{:#}", e)),
        Ok(Ok(output)) => output,
    };
    match parse_smi_csv(&output) {
        Ok((memory, compute)) => UtilizationReport::success(memory, compute),
        Err(e) => UtilizationReport::failure(e.to_string()),
    }
}

/// Parses nvidia-smi CSV rows of (index, utilization.gpu, memory.used,
/// memory.total) into time-averaged (memory, compute) fractions, each
/// rounded to two decimals. Header lines are skipped; utilization comes as
/// a raw percent and is divided by 100.
pub fn parse_smi_csv(output: &str) -> Result<(f64, f64), SampleError> {
    let mut mem_fractions = Vec::new();
    let mut gpu_utils = Vec::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("index") {
            continue;
        }
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() != QUERY_FIELDS.len() {
            return Err(SampleError::Malformed(line.to_string()));
        }
        let gpu_util = parse_leading_number(fields[1])?;
        let mem_used = parse_leading_number(fields[2])?;
        let mem_total = parse_leading_number(fields[3])?;
        if mem_total == 0.0 {
            return Err(SampleError::Malformed(line.to_string()));
        }
        gpu_utils.push(gpu_util * 0.01);
        mem_fractions.push(mem_used / mem_total);
    }

    if mem_fractions.is_empty() {
        return Err(SampleError::Empty);
    }

    Ok((round2(mean(&mem_fractions)), round2(mean(&gpu_utils))))
}

/// First whitespace-separated token as a number, e.g. "85 %" or "11178 MiB".
fn parse_leading_number(field: &str) -> Result<f64, SampleError> {
    field
        .split_whitespace()
        .next()
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| SampleError::Malformed(field.to_string()))
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, AttachParams};
use kube::{Client, Config};
use tokio::io::AsyncReadExt;

use crate::sampler::PodExec;

#[derive(Clone)]
pub struct K8sClient {
    client: Client,
}

impl K8sClient {
    pub async fn new(config_file: Option<&str>) -> Result<Self> {
        if let Some(path) = config_file {
            std::env::set_var("KUBECONFIG", path);
        }
        let config = Config::infer().await?;
        let client = Client::try_from(config)?;
        Ok(Self { client })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl PodExec for K8sClient {
    /// Runs the command inside the pod over a websocket exec session and
    /// captures its stdout. The remote exit status is not treated as a
    /// failure while output was produced: the measurement command is killed
    /// by its own in-pod `timeout` and exits non-zero on every normal run.
    async fn exec_capture(
        &self,
        namespace: &str,
        pod_name: &str,
        command: &[String],
    ) -> Result<String> {
        let attach_params = AttachParams::default()
            .stdin(false)
            .stdout(true)
            .stderr(true);
        let mut attached = self
            .pods(namespace)
            .exec(pod_name, command.to_vec(), &attach_params)
            .await
            .with_context(|| format!("exec into pod {}", pod_name))?;

        let mut output = String::new();
        if let Some(mut stdout) = attached.stdout() {
            stdout
                .read_to_string(&mut output)
                .await
                .context("reading exec stdout")?;
        }

        let status = attached.take_status();
        attached.join().await.context("exec session")?;

        if output.is_empty() {
            if let Some(status) = status {
                if let Some(status) = status.await {
                    if status.status.as_deref() == Some("Failure") {
                        anyhow::bail!(
                            "exec failed: {}",
                            status.message.unwrap_or_else(|| "unknown error".to_string())
                        );
                    }
                }
            }
        }
        Ok(output)
    }
}

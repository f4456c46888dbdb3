//! Web interface: the queue page, the JSON state endpoint, and the per-pod
//! detail view.

use std::sync::{Arc, RwLock};

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use log::info;
use tokio::sync::watch;

use crate::pods::supervisor::{PodDetail, SharedDetails};

pub struct WebState {
    pub snapshot: Arc<RwLock<String>>,
    pub details: SharedDetails,
}

pub async fn serve(
    port: u16,
    state: WebState,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let app = Router::new()
        .route("/", get(index))
        .route("/api/state", get(api_state))
        .route("/describe/{pod_name}", get(describe_pod))
        .with_state(Arc::new(state));

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("web interface listening on port {}", port);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;
    Ok(())
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn api_state(State(state): State<Arc<WebState>>) -> impl IntoResponse {
    let json = state.snapshot.read().unwrap().clone();
    ([(header::CONTENT_TYPE, "application/json")], json)
}

async fn describe_pod(
    Path(pod_name): Path<String>,
    State(state): State<Arc<WebState>>,
) -> Response {
    let detail = state.details.read().unwrap().get(&pod_name).cloned();
    match detail {
        None => (StatusCode::NOT_FOUND, format!("No pod {}", pod_name)).into_response(),
        Some(detail) => Html(render_describe(&pod_name, &detail)).into_response(),
    }
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn render_describe(pod_name: &str, detail: &PodDetail) -> String {
    let mut page = format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8"/>
<title>Pod {name}</title>
<style>
body {{ font-family: sans-serif; margin: 2em; }}
pre {{ background: #f5f5f5; padding: 1em; overflow-x: auto; }}
</style>
</head>
<body>
<h1>Pod {name}</h1>
<p><strong>User</strong>: {user} | <strong>GPUs</strong>: {gpus}</p>
"#,
        name = escape_html(pod_name),
        user = escape_html(detail.descriptor.user_or_anonymous()),
        gpus = detail.descriptor.num_gpu,
    );

    match &detail.utilization {
        Some(report) => {
            page.push_str(&format!(
                "<h2>GPU utilization</h2>\n<p><strong>Sampled</strong>: {}</p>\n",
                report.date.format("%Y-%m-%d %H:%M:%S UTC")
            ));
            match &report.error {
                Some(error) => page.push_str(&format!(
                    "<pre>{}</pre>\n",
                    escape_html(error)
                )),
                None => page.push_str(&format!(
                    "<p>memory: {:.0}% | compute: {:.0}%</p>\n",
                    report.memory.unwrap_or(0.0) * 100.0,
                    report.compute.unwrap_or(0.0) * 100.0
                )),
            }
        }
        None => page.push_str("<h2>GPU utilization</h2>\n<p>No measurement yet.</p>\n"),
    }

    let manifest = serde_yaml::to_string(&detail.pod)
        .unwrap_or_else(|e| format!("failed to render manifest: {}", e));
    page.push_str(&format!(
        "<h2>Manifest</h2>\n<pre>{}</pre>\n<p><em>Accessed {}</em></p>\n</body></html>\n",
        escape_html(&manifest),
        Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    ));
    page
}

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8"/>
<title>GPU queue</title>
<style>
body { font-family: sans-serif; margin: 2em; }
table { border-collapse: collapse; margin: 1em 0; }
th, td { border: 1px solid #ccc; padding: 6px 10px; text-align: left; }
th { background: #f5f5f5; }
</style>
</head>
<body>
<h1>GPU queue</h1>
<table id="queue">
<tr><th>q</th><th>name</th><th>user</th><th>prio</th><th>gpu</th><th>mem</th><th>compute</th></tr>
</table>
<script>
async function refresh() {
  const pods = await (await fetch('/api/state')).json();
  const table = document.getElementById('queue');
  while (table.rows.length > 1) table.deleteRow(1);
  for (const pod of pods) {
    const row = table.insertRow();
    const pct = (v) => v === undefined ? '' : Math.round(v * 100) + '%';
    const link = document.createElement('a');
    link.href = '/describe/' + encodeURIComponent(pod.name);
    link.textContent = pod.name;
    row.insertCell().textContent = pod.global_ordinal;
    row.insertCell().appendChild(link);
    row.insertCell().textContent = pod.user ?? 'anonymous';
    row.insertCell().textContent = pod.user_priority;
    row.insertCell().textContent = pod.num_gpu;
    row.insertCell().textContent = pct(pod.utilization_mem);
    row.insertCell().textContent = pct(pod.utilization_compute);
  }
}
refresh();
setInterval(refresh, 10000);
</script>
</body>
</html>
"#;

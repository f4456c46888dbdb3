use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use log::info;
use tokio::sync::watch;

use kube_watchdog::cli::{Args, Commands};
use kube_watchdog::fairness;
use kube_watchdog::k8s::K8sClient;
use kube_watchdog::pods::supervisor::{Listener, PodListSupervisor};
use kube_watchdog::publish::SnapshotPublisher;
use kube_watchdog::sampler::PodExec;
use kube_watchdog::web::{self, WebState};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();

    match args.command {
        Commands::Console {
            namespace,
            config_file,
        } => run_console(namespace, config_file).await,
        Commands::Serve {
            namespace,
            port,
            config_file,
        } => run_serve(namespace, port, config_file).await,
    }
}

async fn connect(config_file: Option<&str>) -> Result<K8sClient> {
    print!("🔗 Connecting to cluster... ");
    match K8sClient::new(config_file).await {
        Ok(client) => {
            println!("{}", "✅ Success".bright_green());
            Ok(client)
        }
        Err(e) => {
            println!("{}", "❌ Failed".bright_red());
            eprintln!("Error: {}", e);
            Err(e)
        }
    }
}

async fn run_console(namespace: String, config_file: Option<String>) -> Result<()> {
    println!("{}", "👀 kube-watchdog - GPU queue monitor".bright_cyan().bold());
    println!("   Namespace: {}", namespace.bright_green());

    let client = connect(config_file.as_deref()).await?;
    let mut supervisor = PodListSupervisor::new(&namespace, Arc::new(client.clone()) as Arc<dyn PodExec>);
    supervisor.add_listener(queue_listener());

    run_until_interrupted(supervisor, client, None).await
}

async fn run_serve(namespace: String, port: u16, config_file: Option<String>) -> Result<()> {
    println!("{}", "👀 kube-watchdog - GPU queue monitor".bright_cyan().bold());
    println!("   Namespace: {}", namespace.bright_green());
    println!("   Web interface: {}", format!("http://0.0.0.0:{}", port).bright_green());

    let client = connect(config_file.as_deref()).await?;
    let mut supervisor = PodListSupervisor::new(&namespace, Arc::new(client.clone()) as Arc<dyn PodExec>);

    let publisher = SnapshotPublisher::new(supervisor.details_handle());
    supervisor.add_listener(publisher.listener());

    let web_state = WebState {
        snapshot: publisher.snapshot(),
        details: supervisor.details_handle(),
    };

    run_until_interrupted(supervisor, client, Some((port, web_state))).await
}

/// Runs the supervisor (and the web server, if any) until Ctrl-C, then
/// shuts both down and waits for samplers to stop.
async fn run_until_interrupted(
    supervisor: PodListSupervisor,
    client: K8sClient,
    web: Option<(u16, WebState)>,
) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let supervisor_task = tokio::spawn(supervisor.run(client, shutdown_rx.clone()));
    let web_task = web.map(|(port, state)| tokio::spawn(web::serve(port, state, shutdown_rx)));

    tokio::signal::ctrl_c().await?;
    info!("interrupt received, shutting down");
    let _ = shutdown_tx.send(true);

    supervisor_task.await?;
    if let Some(task) = web_task {
        task.await??;
    }
    Ok(())
}

/// Logs the ordered queue as a table on every state change.
fn queue_listener() -> Listener {
    Box::new(|pods| {
        let hierarchy = fairness::calculate_order(pods);
        let mut lines = vec![format!(
            "\n{:<5} {:<30} {:<10} {:<5} {:<5} {:<5}",
            "q", "name", "user", "prio", "uo", "gpu"
        )];
        for pod in &hierarchy {
            let prio = if pod.pod.user_priority != 0 {
                pod.pod.user_priority.to_string()
            } else {
                "auto".to_string()
            };
            lines.push(format!(
                "{:<5} {:<30} {:<10} {:<5} {:<5} {:<5}",
                pod.global_ordinal,
                pod.pod.name,
                pod.pod.user_or_anonymous(),
                prio,
                pod.user_ordinal,
                pod.pod.num_gpu
            ));
        }
        info!("{}", lines.join("\n"));
    })
}

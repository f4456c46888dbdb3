use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about = "GPU workload queue monitor for a Kubernetes namespace", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Display the fair queue in the console
    Console {
        /// Kubernetes namespace to monitor
        #[arg(short, long, value_name = "NAMESPACE")]
        namespace: String,

        /// Kubernetes config file path
        #[arg(short, long)]
        config_file: Option<String>,
    },
    /// Host the web interface
    Serve {
        /// Kubernetes namespace to monitor
        #[arg(short, long, value_name = "NAMESPACE")]
        namespace: String,

        /// Port for the web interface
        #[arg(short, long, default_value_t = 8000)]
        port: u16,

        /// Kubernetes config file path
        #[arg(short, long)]
        config_file: Option<String>,
    },
}

use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "releasedeck",
    version,
    about = "Live terminal view of Helm releases and preview deployments."
)]
pub struct CliArgs {
    /// Project id the view is scoped to
    #[arg(long, default_value_t = 1)]
    pub project: u64,

    /// Cluster id the view is scoped to
    #[arg(long, default_value_t = 1)]
    pub cluster: u64,

    /// kubeconfig context to connect with
    #[arg(long)]
    pub context: Option<String>,

    /// Start in a specific namespace
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Start with all namespaces selected
    #[arg(short = 'A', long)]
    pub all_namespaces: bool,

    /// Run against the built-in simulated preview platform
    #[arg(long)]
    pub demo: bool,

    /// Fetch deadline in milliseconds
    #[arg(long)]
    pub fetch_timeout_ms: Option<u64>,

    /// Poll interval in milliseconds (0 disables polling)
    #[arg(long)]
    pub poll_ms: Option<u64>,

    /// tracing filter (for example: info,debug,trace)
    #[arg(long, default_value = "info")]
    pub log_filter: String,

    /// Write logs to this file instead of discarding them
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

//! CLI definition using clap derive.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "exactgate", version, about = "Exact synthetic-image detector gateway")]
pub struct Cli {
    /// UDS socket path (default: $XDG_RUNTIME_DIR/exactgate/exactgate.sock)
    #[arg(long, short = 's', global = true, env = "EXACTGATE_SOCKET")]
    pub socket_path: Option<String>,

    #[command(flatten)]
    pub worker: WorkerOpts,

    #[command(subcommand)]
    pub command: Command,
}

/// How the detector worker is started.
#[derive(clap::Args, Debug, Clone)]
pub struct WorkerOpts {
    /// Worker script run by the resolved interpreter
    #[arg(
        long,
        global = true,
        env = "EXACTGATE_WORKER_SCRIPT",
        default_value = "exact_detector_worker.py"
    )]
    pub worker_script: PathBuf,

    /// Interpreter tried before python3 and the usual install locations
    #[arg(long, global = true, env = "EXACTGATE_PYTHON")]
    pub python: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long, global = true, env = "EXACTGATE_TIMEOUT_SECS", default_value_t = 300)]
    pub timeout_secs: u64,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one exact detector on an image (JSON to stdout)
    Detect(DetectOpts),
    /// Run the hybrid detector (three-member vote) on an image
    Evaluate(EvaluateOpts),
    /// Check that an interpreter with the detector stack is available
    Probe,
    /// List mapped, unavailable, and ensemble models
    Models,
    /// Serve detection requests over a Unix domain socket
    Serve,
}

#[derive(clap::Args, Debug)]
pub struct DetectOpts {
    /// Model id, or `hybrid-detector` for the ensemble
    #[arg(long, short = 'm')]
    pub model: String,

    /// Image file to classify
    #[arg(long, short = 'i')]
    pub image: PathBuf,

    /// Send the request to a running `exactgate serve`
    #[arg(long)]
    pub remote: bool,
}

#[derive(clap::Args, Debug)]
pub struct EvaluateOpts {
    /// Image file to classify
    #[arg(long, short = 'i')]
    pub image: PathBuf,

    /// Send the request to a running `exactgate serve`
    #[arg(long)]
    pub remote: bool,
}

/// Default socket path using $USER for per-user isolation.
pub fn default_socket_path() -> String {
    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
        return format!("{dir}/exactgate/exactgate.sock");
    }
    let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    format!("/tmp/exactgate-{user}/exactgate.sock")
}

//! exactgate: exact synthetic-image detector gateway binary.
//! One long-lived detector worker per process, shared by every request.

use std::sync::Arc;

use clap::Parser;

mod cli;
mod client;
mod cmd_detect;
mod cmd_models;
mod cmd_probe;
mod context;
mod server;

fn init_tracing() {
    let filter = std::env::var("EXACTGATE_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();
    init_tracing();

    let socket_path = args.socket_path.unwrap_or_else(cli::default_socket_path);

    let exit_code = match args.command {
        cli::Command::Detect(opts) => {
            cmd_detect::cmd_detect(&args.worker, &socket_path, &opts).await?
        }
        cli::Command::Evaluate(opts) => {
            cmd_detect::cmd_evaluate(&args.worker, &socket_path, &opts).await?
        }
        cli::Command::Probe => cmd_probe::cmd_probe(&args.worker).await,
        cli::Command::Models => {
            cmd_models::cmd_models()?;
            0
        }
        cli::Command::Serve => {
            tracing::info!("exactgate server starting");
            let ctx = Arc::new(context::Context::from_opts(&args.worker));
            server::run_server(&socket_path, ctx).await?;
            0
        }
    };

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}

//! Notebook kernel serving the `calc` expression language.
//!
//! Run with: cargo run -p kernel-server-demo -- --connection-file kernel.json
//!
//! The connection file is the JSON descriptor a notebook front-end writes
//! when it launches a kernel.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use notebook_kernel_core::ConnectionConfig;
use notebook_kernel_engine::ExpressionEngine;
use notebook_kernel_session::Kernel;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Notebook kernel for the calc expression language
#[derive(Parser, Debug)]
#[command(name = "kernel-server")]
#[command(about = "Serve a notebook kernel over the channels of a connection file")]
struct Args {
    /// Path to the kernel connection file
    #[arg(short = 'f', long)]
    connection_file: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();

    let config = ConnectionConfig::from_file(&args.connection_file).with_context(|| {
        format!("Failed to load connection file {}", args.connection_file.display())
    })?;
    tracing::info!(
        transport = %config.transport,
        ip = %config.ip,
        scheme = config.signature_scheme.as_str(),
        "Loaded connection file"
    );

    let kernel = Kernel::bind(&config, ExpressionEngine::new())
        .await
        .context("Failed to open kernel channels")?;

    let shutdown = kernel.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, shutting down");
            shutdown.shutdown();
        }
    });

    kernel.run().await;
    Ok(())
}

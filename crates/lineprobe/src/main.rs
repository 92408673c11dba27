mod cli;

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use lineprobe::{Controller, ProbeConfig};

use crate::cli::Cli;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    info!("Starting lineprobe");
    if let Err(err) = run(cli) {
        eprintln!("lineprobe error: {err:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = match &cli.config {
        Some(path) => ProbeConfig::load(path)?,
        None => ProbeConfig::default(),
    }
    .with_env_overrides()?;
    if let Some(url) = cli.inspector {
        config = config.with_inspector_url(url)?;
    }
    if let Some(ms) = cli.timeout_ms {
        config.request_timeout = (ms > 0).then(|| Duration::from_millis(ms));
    }
    if let Some(max_locals) = cli.max_locals.filter(|limit| *limit > 0) {
        config.capture.max_locals = max_locals;
    }
    if let Some(depth) = cli.max_reference_depth {
        config.capture.max_reference_depth = usize::from(depth);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    let reply = runtime.block_on(async {
        let controller = Controller::from_config(&config)?;
        info!(file = %cli.file, line = cli.line, batch = %controller.batch_id(), "activating probe");
        controller.activate(cli.file, cli.line).await
    })?;
    let text = serde_json::to_string_pretty(&reply).context("failed to encode snapshot")?;
    println!("{text}");
    Ok(())
}

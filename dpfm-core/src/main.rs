//! Headless engine entry point: command line, configuration, single
//! instance, then the request loop until a termination signal.

use std::{process::ExitCode, sync::Arc, time::SystemTime};

use anyhow::Context;
use tracing::{error, info, warn};

use dpfm_core::{
    cache::disk_cache::DiskCache,
    cli::{parse_args, CliOptions},
    config::Config,
    engine::{Engine, EngineParams},
    idle::dispatcher::ActivationRequest,
    instance::{post_activation, AcquireOutcome, InstanceGuard},
    logging::Logger,
    panel::state::PanelSide,
};

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = match parse_args(args) {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("dpfm: {e}");
            return ExitCode::from(1);
        }
    };

    let _logger = match Logger::init() {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!("dpfm: logging unavailable: {e}");
            return ExitCode::from(1);
        }
    };

    // Post-install hook: open the file and exit.
    if let Some(file) = &cli.run_notepad {
        let status = std::process::Command::new("notepad").arg(file).spawn();
        if let Err(e) = status {
            warn!(error = %e, "notepad not started");
        }
        return ExitCode::SUCCESS;
    }

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "startup failed");
            ExitCode::from(1)
        }
    }
}

#[tokio::main]
async fn run(cli: CliOptions) -> anyhow::Result<ExitCode> {
    let config = match &cli.config_file {
        Some(file) => Config::load_file(file)
            .await
            .with_context(|| format!("loading configuration from {}", file.display()))?,
        None => Config::load().await.context("loading configuration")?,
    };

    let dirs = directories::ProjectDirs::from("", "", "dpfm")
        .context("no usable configuration directory")?;
    let runtime_dir = dirs.data_local_dir().to_path_buf();

    // Single-instance channel: hand our parameters to a running instance
    // and leave.
    let mut guard = None;
    if config.single_instance || cli.force_single_instance {
        let (outcome, acquired) = InstanceGuard::acquire(&runtime_dir)?;
        match outcome {
            AcquireOutcome::Acquired => guard = acquired,
            AcquireOutcome::AlreadyRunning => {
                let request = ActivationRequest {
                    left: cli.left.clone(),
                    right: cli.right.clone(),
                    active: cli.active.clone(),
                    active_hot: cli.active_hot.clone(),
                    active_panel: match cli.activate_panel {
                        Some(1) => Some(PanelSide::Left),
                        Some(2) => Some(PanelSide::Right),
                        _ => None,
                    },
                    stamp: SystemTime::now(),
                };
                post_activation(&runtime_dir, &request)?;
                info!("parameters handed to the running instance");
                return Ok(ExitCode::SUCCESS);
            }
        }
    }

    // Downloaded-copy cache, scrubbed of orphans at first-instance startup.
    let workspace = config
        .cache
        .workspace
        .clone()
        .unwrap_or_else(|| std::env::temp_dir().join("dpfm-cache"));
    let cache = Arc::new(DiskCache::new(workspace, config.cache.ceiling_bytes)?);
    if let Err(e) = cache.purge_orphan_workspace() {
        warn!(error = %e, "cache workspace scrub failed");
    }

    let (mut engine, handle) = Engine::new(EngineParams {
        config,
        activation_dir: guard.is_some().then(|| runtime_dir.clone()),
        cache: Some(cache),
        watch: true,
        ..Default::default()
    });
    engine.apply_cli(&cli);

    let signal_handle = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("termination signal, shutting down");
            signal_handle.shutdown(false);
        }
    });

    let engine = engine.run().await;
    drop(engine);
    drop(guard);
    Ok(ExitCode::SUCCESS)
}

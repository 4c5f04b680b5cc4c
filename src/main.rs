use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use pedal_monitor::alerts::speaker_from_command;
use pedal_monitor::cli::CliArgs;
use pedal_monitor::config::MonitorConfig;
use pedal_monitor::device::default_api;
use pedal_monitor::pipeline::TickEngine;
use pedal_monitor::telemetry::TelemetryServer;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    if args.print_default_config {
        print!("{}", MonitorConfig::default().to_toml_string()?);
        return Ok(());
    }

    setup(args.verbose)?;

    let config = MonitorConfig::load(&args)?;
    let cancel = CancellationToken::new();

    let engine = TickEngine::create(
        config.clone(),
        default_api(),
        speaker_from_command(&config.alerts.command),
        cancel.clone(),
    )?;
    let handle = engine.distributor();
    let engine = engine.start()?;

    let server_task = if config.telemetry.enabled {
        match TelemetryServer::bind(&config.telemetry, handle, cancel.clone()).await {
            Ok(server) => Some(tokio::spawn(server.serve())),
            Err(e) => {
                error!("Unable to start telemetry server: {}", e);
                tokio::task::spawn_blocking(move || engine.shutdown())
                    .await
                    .map_err(|e| eyre!("Shutdown task failed: {}", e))??;
                return Err(e.into());
            }
        }
    } else {
        info!("Telemetry disabled");
        None
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            match result {
                Ok(()) => info!("Ctrl-C received, shutting down"),
                Err(e) => error!("Unable to listen for Ctrl-C: {}", e),
            }
        }
        _ = cancel.cancelled() => info!("Shutdown requested"),
    }
    cancel.cancel();

    let stopped = tokio::task::spawn_blocking(move || engine.shutdown())
        .await
        .map_err(|e| eyre!("Shutdown task failed: {}", e))??;

    if let Some(task) = server_task {
        match task.await {
            Ok(Ok(())) => info!("Telemetry server stopped"),
            Ok(Err(e)) => error!("Telemetry server failed: {}", e),
            Err(e) => error!("Telemetry server task failed: {}", e),
        }
    }

    let summary = stopped.summary();
    info!(
        "Monitored {} ticks ({} missed, {} poll failures)",
        summary.ticks, summary.missed_ticks, summary.poll_failures
    );
    Ok(())
}

fn setup(verbose: bool) -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env(verbose);
    Ok(())
}

fn setup_logging_env(verbose: bool) {
    FmtSubscriber::builder()
        .with_max_level(if verbose { Level::DEBUG } else { Level::INFO })
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}

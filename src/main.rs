//! recvnc - Main entry point
//!
//! Runs the recording proxy and the HTTP control surface, or converts one
//! recorded session and exits.

use clap::Parser;
use log::{error, info, warn};
use recvnc::args::{Args, Command};
use recvnc::capture::x11_factory;
use recvnc::config::Config;
use recvnc::proxy::{ProxyOptions, ReconnectDebounce, VncProxy};
use recvnc::recorder::{Recorder, RecorderHooks, StopReason};
use recvnc::runtime_settings::RuntimeSettings;
use recvnc::schedule::Scheduler;
use recvnc::serialize::{serialize, SerializeOptions};
use recvnc::web::{self, SharedState};
use recvnc::writer::EventWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tokio::task;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let args = Args::parse();

    // The log level may come from the file, so read it before logging starts
    let loaded = args.load_config();
    let log_level = if args.verbose {
        "debug".to_string()
    } else {
        loaded
            .as_ref()
            .map(|cfg| cfg.logging.level.clone())
            .unwrap_or_else(|_| "info".to_string())
    };
    env_logger::Builder::new()
        .parse_filters(&std::env::var("RECVNC_LOG").unwrap_or(log_level))
        .init();

    info!("recvnc v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match loaded {
        Ok(cfg) => {
            info!("Loaded configuration from {:?}", args.config);
            cfg
        }
        Err(e) => {
            warn!("Failed to load config: {}, using defaults", e);
            Config::default()
        }
    };
    args.apply_overrides(&mut config);

    // Validate configuration
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return Err(e);
    }

    if let Some(Command::Convert {
        session_dir,
        output_dir,
        ..
    }) = &args.command
    {
        return convert(&config, session_dir, output_dir.clone()).await;
    }

    run_recorder(config, &args).await
}

async fn convert(
    config: &Config,
    session_dir: &Path,
    output_dir: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let output_dir = match output_dir {
        Some(dir) => dir,
        None => {
            let name = session_dir
                .file_name()
                .ok_or_else(|| format!("{:?} does not name a session directory", session_dir))?;
            config.serializer.converted_dir.join(name)
        }
    };

    let options = SerializeOptions::from(&config.serializer);
    let session_dir = session_dir.to_path_buf();
    info!("Converting {:?} into {:?}", session_dir, output_dir);
    let summary = task::spawn_blocking(move || serialize(&session_dir, &output_dir, &options)).await??;
    info!(
        "Wrote {} frames of {}x{} to {:?}",
        summary.frames, summary.image_size.0, summary.image_size.1, summary.output_dir
    );
    Ok(())
}

async fn run_recorder(config: Config, args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    info!("Display: {}", config.capture.display);
    info!("Records directory: {:?}", config.capture.records_dir);
    info!(
        "Screenshot interval: {}s, JPEG quality: {}",
        config.capture.screenshot_interval, config.capture.jpeg_quality
    );
    if !args.config.exists() {
        info!("No configuration file at {:?}, running with defaults", args.config);
    }

    let writer = Arc::new(EventWriter::new());
    let settings = Arc::new(RuntimeSettings::new(&config));
    let scheduler = Scheduler::new();

    let recorder = Arc::new(Recorder::new(
        config.capture.records_dir.clone(),
        writer.clone(),
        settings.clone(),
        x11_factory(config.capture.display.clone()),
        scheduler.clone(),
    ));

    let debounce = Arc::new(ReconnectDebounce::new(
        scheduler,
        config.reconnect_tolerance(),
        Arc::new(RecorderHooks::new(recorder.clone())),
    ));

    let proxy = Arc::new(VncProxy::new(
        ProxyOptions {
            listen_addr: format!("{}:{}", config.proxy.listen_host, config.proxy.listen_port),
            upstream_host: config.proxy.upstream_host.clone(),
            upstream_port: config.proxy.upstream_port,
        },
        writer.clone(),
        settings.clone(),
        debounce,
    ));

    let http_host = config.http.host.clone();
    let http_port = config.http.port;
    let state = Arc::new(SharedState::new(config, recorder.clone(), writer, settings));

    let mut proxy_handle = task::spawn(async move { proxy.run().await.map_err(|e| e.to_string()) });
    let mut http_handle = task::spawn(async move {
        web::run_http_server(&http_host, http_port, state)
            .await
            .map_err(|e| e.to_string())
    });

    // Wait for shutdown signal
    let shutdown = async {
        let _ = signal::ctrl_c().await;
        info!("Shutdown signal received");
    };

    tokio::select! {
        _ = shutdown => {
            info!("Initiating graceful shutdown...");
        }
        result = &mut proxy_handle => {
            log_task_result("VNC proxy", result);
        }
        result = &mut http_handle => {
            log_task_result("HTTP server", result);
        }
    }

    info!("Stopping all tasks...");

    // A running session gets its stop event before the process exits
    if recorder.stop(StopReason::Manual) {
        info!("Finishing recording {:?}", recorder.current_session());
    }
    recorder.join().await;

    for handle in [proxy_handle, http_handle] {
        if !handle.is_finished() {
            handle.abort();
            let _ = handle.await;
        }
    }

    info!("recvnc stopped");
    Ok(())
}

fn log_task_result(name: &str, result: Result<Result<(), String>, task::JoinError>) {
    match result {
        Ok(Ok(())) => warn!("{} exited", name),
        Ok(Err(e)) => error!("{} failed: {}", name, e),
        Err(e) => error!("{} task panicked: {}", name, e),
    }
}

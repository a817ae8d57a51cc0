//! HTTP control surface
//!
//! Plain GET endpoints answering with short text tokens, meant to be hit from
//! scripts or a browser address bar.

use crate::event::{ControlArgs, EventKind};
use crate::recorder::{validate_session_name, StartOptions, StopReason};
use crate::serialize::serialize;
use crate::web::shared::SharedState;
use axum::{
    extract::{Path, Query, State},
    routing::get,
    Router,
};
use log::{error, info, warn};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Bind `host:port` and serve the control surface until the task is dropped
pub async fn run_http_server(
    host: &str,
    port: u16,
    state: Arc<SharedState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr).await?;
    info!("HTTP control surface listening on http://{}", addr);

    axum::serve(listener, router(state)).await?;
    Ok(())
}

pub fn router(state: Arc<SharedState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/grab/start", get(grab_start_handler))
        .route("/grab/stop", get(grab_stop_handler))
        .route("/task/{cmd}", get(task_handler))
        .route("/reload", get(reload_handler))
        .route("/convert", get(convert_handler))
        .with_state(state)
}

/// Health check handler
async fn health_handler(State(state): State<Arc<SharedState>>) -> String {
    json!({
        "status": "healthy",
        "uptime_seconds": (state.uptime().as_secs_f64() * 100.0).round() / 100.0,
        "recording": state.recorder.is_recording(),
        "session": state.recorder.current_session(),
        "version": env!("CARGO_PKG_VERSION"),
    })
    .to_string()
}

/// Query values arrive as text so a malformed number maps to the failure token
#[derive(Debug, Default, Deserialize)]
struct GrabStartParams {
    interval: Option<String>,
    prefix: Option<String>,
    duration: Option<String>,
}

fn parse_seconds(value: Option<&str>) -> Result<Option<f64>, String> {
    value
        .map(|v| v.trim().parse::<f64>().map_err(|_| format!("not a number: {:?}", v)))
        .transpose()
}

async fn grab_start_handler(
    State(state): State<Arc<SharedState>>,
    Query(params): Query<GrabStartParams>,
) -> &'static str {
    let interval = parse_seconds(params.interval.as_deref());
    let duration = parse_seconds(params.duration.as_deref());
    let (interval, duration) = match (interval, duration) {
        (Ok(i), Ok(d)) => (i, d),
        (Err(e), _) | (_, Err(e)) => {
            warn!("Rejected /grab/start: {}", e);
            return "failed to start";
        }
    };

    let options = StartOptions {
        interval,
        duration,
        prefix: params.prefix,
        after_auto_stop: Some(Box::new(|| info!("Recording reached its duration"))),
    };
    match state.recorder.start(options) {
        Ok(_) => "started",
        Err(e) => {
            warn!("Cannot start recording: {}", e);
            "failed to start"
        }
    }
}

async fn grab_stop_handler(State(state): State<Arc<SharedState>>) -> &'static str {
    state.recorder.stop(StopReason::Manual);
    "stopped"
}

/// Appends a `task` event `[cmd, url?, reward?, detail?]` to the running session
async fn task_handler(
    State(state): State<Arc<SharedState>>,
    Path(cmd): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> &'static str {
    let mut task_args = vec![Value::from(cmd.clone())];
    if let Some(url) = params.get("url") {
        task_args.push(Value::from(url.clone()));
    }
    if let Some(reward) = params.get("reward") {
        task_args.push(
            reward
                .parse::<f64>()
                .map(Value::from)
                .unwrap_or_else(|_| Value::from(reward.clone())),
        );
    }
    if let Some(detail) = params.get("detail") {
        match serde_json::from_str::<Value>(detail) {
            Ok(value) => task_args.push(value),
            Err(e) => {
                warn!("Task {} has malformed detail: {}", cmd, e);
                return "failed";
            }
        }
    }

    let args = ControlArgs {
        task_args: Some(task_args),
        ..Default::default()
    };
    match state
        .writer
        .record(EventKind::Task, vec![Value::Object(args.to_object())])
    {
        Ok(true) => "done",
        Ok(false) => {
            info!("Task {} received while not recording", cmd);
            "done"
        }
        Err(e) => {
            error!("Cannot record task {}: {}", cmd, e);
            "failed"
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ReloadParams {
    config: Option<String>,
}

async fn reload_handler(
    State(state): State<Arc<SharedState>>,
    Query(params): Query<ReloadParams>,
) -> &'static str {
    match params.config.filter(|c| !c.trim().is_empty()) {
        None => "config is missing",
        Some(json) => {
            if state.runtime_settings.apply_settings_json(&json) {
                info!(
                    "Settings reloaded: interval={}s quality={} cursor={}",
                    state.runtime_settings.screenshot_interval(),
                    state.runtime_settings.jpeg_quality(),
                    state.runtime_settings.report_cursor()
                );
                "done"
            } else {
                warn!("Rejected settings {:?}", json);
                "failed"
            }
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConvertParams {
    name: Option<String>,
}

async fn convert_handler(
    State(state): State<Arc<SharedState>>,
    Query(params): Query<ConvertParams>,
) -> &'static str {
    let Some(name) = params.name.filter(|n| validate_session_name(n).is_ok()) else {
        return "record not found";
    };
    let record_path = state.records_dir().join(&name);
    if !record_path.is_dir() {
        return "record not found";
    }

    let output_path = state.converted_path(&name);
    let options = state.serialize_options();
    let result = tokio::task::spawn_blocking(move || serialize(&record_path, &output_path, &options)).await;
    match result {
        Ok(Ok(summary)) => {
            info!("Converted {} into {} frames", name, summary.frames);
            "done"
        }
        Ok(Err(e)) => {
            error!("Conversion of {} failed: {}", name, e);
            "failed"
        }
        Err(e) => {
            error!("Conversion task for {} panicked: {}", name, e);
            "failed"
        }
    }
}

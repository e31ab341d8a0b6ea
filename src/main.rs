//! # Call Bridge Backend - Main Application Entry Point
//!
//! One binary, two modes:
//! - **server** (default): Actix-web HTTP server hosting the telephony WebSocket
//!   bridge, the extraction queue poller and the inspection API
//! - **extract `<transcript>`**: The extraction worker. Prints one JSON result on
//!   stdout and exits non-zero on failure; logs go to stderr
//!
//! ## Application Architecture:
//! - **config**: Layered configuration (defaults, `config.toml`, `APP_*` environment)
//! - **state**: Shared state and pipeline metrics
//! - **audio**: Codec, resampling, noise suppression, inbound buffering
//! - **engine**: Voice engine seam and its realtime WebSocket client
//! - **telephony**: Vendor protocol, per-call session actor, session registry
//! - **records**: Call records, transcripts and the flat-file data directory
//! - **queue**: Transcript extraction queue, worker process and poller
//! - **extraction**: Built-in rule-based field extraction (worker mode)
//! - **outcome**: Routing, dropoff and language analysis, webhook payloads
//! - **webhook**: Outcome delivery with retry
//! - **health** / **handlers**: HTTP endpoints
//! - **error**: HTTP error type

mod audio;
mod config;
mod engine;
mod error;
mod extraction;
mod handlers;
mod health;
mod outcome;
mod queue;
mod records;
mod state;
mod telephony;
mod webhook;

use actix::Actor;
use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use crate::config::AppConfig;
use crate::engine::{RealtimeEngine, VoiceEngine};
use crate::extraction::{run_extraction, WorkerOutput};
use crate::queue::worker::EXTRACT_SUBCOMMAND;
use crate::queue::QueueProcessor;
use crate::state::{AppState, SharedMetrics};
use crate::telephony::SessionRegistry;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set by the signal handler task; polled by the server and the queue poller.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

const DEFAULT_LOG_FILTER: &str = "call_bridge_backend=debug,actix_web=info";

fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    if args.get(1).map(String::as_str) == Some(EXTRACT_SUBCOMMAND) {
        return run_worker(args.get(2).map(String::as_str));
    }

    actix_web::rt::System::new().block_on(run_server())
}

/// Worker mode: stdout carries exactly one JSON object.
fn run_worker(transcript: Option<&str>) -> Result<()> {
    init_tracing(true)?;

    let output = match transcript {
        Some(path) => run_extraction(Path::new(path)).unwrap_or_else(|e| {
            error!(error = %format!("{:#}", e), "Extraction failed");
            WorkerOutput::failure(format!("{:#}", e))
        }),
        None => WorkerOutput::failure("usage: extract <transcript.json>"),
    };

    println!("{}", serde_json::to_string(&output)?);
    if !output.success {
        std::process::exit(1);
    }
    Ok(())
}

/// Server mode.
///
/// ## Startup Order:
/// 1. Tracing, configuration, validation
/// 2. Session registry actor and voice engine client
/// 3. Data directory layout and the queue poller (skipped if another process holds the poller lock)
/// 4. HTTP server until SIGINT / SIGTERM
async fn run_server() -> Result<()> {
    init_tracing(false)?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting call-bridge-backend v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);
    if config.engine.resolved_api_key().is_none() {
        warn!("No voice engine API key configured; calls will stay unbridged");
    }

    let metrics = SharedMetrics::default();
    let registry = SessionRegistry::new(config.telephony.max_active_calls).start();
    let engine: Arc<dyn VoiceEngine> = Arc::new(RealtimeEngine::new(config.engine.clone()));
    let app_state = AppState::new(config.clone(), metrics.clone(), registry, engine);
    app_state.data.ensure_layout()?;
    info!("Data directory: {}", app_state.data.root().display());
    if app_state.guardrail.is_empty() {
        warn!("No guardrail patterns active");
    } else {
        info!(patterns = app_state.guardrail.len(), "Guardrail patterns compiled");
    }

    setup_signal_handlers();

    let queue_task = match QueueProcessor::new(&config, metrics) {
        Ok(processor) => Some(actix_web::rt::spawn(processor.run(wait_for_shutdown()))),
        Err(e) => {
            warn!(error = %e, "Queue processor disabled");
            None
        }
    };

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(TracingLogger::default())
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/queue", web::get().to(handlers::list_queue))
                    .route("/calls/active", web::get().to(handlers::list_active_calls))
                    .route("/calls/{call_id}", web::get().to(handlers::get_call_record)),
            )
            .route("/health", web::get().to(health::health_check))
            .route("/ws/telephony", web::get().to(telephony::telephony_websocket))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = actix_web::rt::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    if let Some(task) = queue_task {
        if let Err(e) = task.await {
            error!("Queue processor task error: {}", e);
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Tracing subscriber with `RUST_LOG` or the default filter.
///
/// Worker mode writes to stderr so stdout stays a clean result channel.
fn init_tracing(to_stderr: bool) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);

    if to_stderr {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()?;
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()?;
    }
    Ok(())
}

/// Flip [`SHUTDOWN_SIGNAL`] on SIGTERM or SIGINT.
fn setup_signal_handlers() {
    use tokio::signal::unix::{signal, SignalKind};

    actix_web::rt::spawn(async {
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                    _ = sigint.recv() => info!("Received SIGINT"),
                }
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "Signal handlers unavailable, waiting for Ctrl+C");
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!(error = %e, "Ctrl+C handler failed");
                    return;
                }
            }
        }
        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}

//! # Ambit Backend - Main Application Entry Point
//!
//! Voice-assistant backend: clients stream microphone audio over a WebSocket,
//! the server segments it into utterances, and each utterance runs through
//! transcription, a tool-capable completion, and speech synthesis before the
//! reply audio streams back as a data URL.
//!
//! ## Application Architecture:
//! - **audio**: Buffering, voice-activity detection, and utterance segmentation
//! - **backends**: OpenAI transcription/completion and ElevenLabs synthesis clients
//! - **turn**: Orchestration of one conversational turn
//! - **session**: Per-connection state and the live-session registry
//! - **websocket**: The connection actor and wire protocol routing
//! - **config / state / health / middleware / handlers / error**: The HTTP
//!   server plumbing around it

mod audio;
mod backends;
mod config;
mod error;
mod handlers;
mod health;
mod history;
mod middleware;
mod persona;
mod protocol;
mod session;
mod state;
mod tools;
mod turn;
mod websocket;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Result;
use config::{AppConfig, Credentials};
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Global shutdown flag set by the signal handler task.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    let credentials = Credentials::from_env();
    if credentials.openai_api_key.is_none() {
        warn!("OPENAI_API_KEY is not set; turns will fail unless clients supply a key");
    }
    if credentials.elevenlabs_api_key.is_none() {
        warn!("ELEVENLABS_API_KEY is not set; synthesis will fail unless clients supply a key");
    }

    info!("Starting ambit-backend v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration loaded: {}:{}",
        config.server.host, config.server.port
    );

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let app_state = AppState::new(config, credentials);

    setup_signal_handlers();

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
            .wrap(Logger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config)),
            )
            // Root-level conveniences: health for load balancers, the
            // WebSocket endpoint for clients
            .route("/health", web::get().to(health::health_check))
            .route("/ws", web::get().to(websocket::websocket_route))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Console logging via tracing. `RUST_LOG` overrides the default filter.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ambit_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Listen for SIGTERM/SIGINT and flip the shutdown flag.
fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
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

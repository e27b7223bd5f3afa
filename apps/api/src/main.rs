mod chat;
mod config;
mod db;
mod errors;
mod llm_client;
mod models;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::chat::engine::IntakeEngine;
use crate::chat::schema::{SchemaDocument, DEFAULT_SCHEMA_JSON};
use crate::chat::store::PgMessageStore;
use crate::chat::trigger::TriggerSet;
use crate::config::Config;
use crate::db::{create_pool, init_schema};
use crate::llm_client::GroqClient;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting intake API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL
    let db = create_pool(&config.database_url).await?;
    init_schema(&db).await?;

    // Load the target record schema (configured path or bundled default)
    let schema_json = match &config.schema_path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read schema document at '{path}'"))?,
        None => DEFAULT_SCHEMA_JSON.to_string(),
    };
    let schema = Arc::new(SchemaDocument::parse(&schema_json)?);
    info!(
        "Record schema loaded: version={} variant={:?}",
        schema.version(),
        schema.variant()
    );

    // Trigger convention
    let trigger = match &config.trigger_phrases {
        Some(phrases) => TriggerSet::new(phrases.clone()),
        None => TriggerSet::for_mode(config.trigger_mode),
    };
    info!("Trigger mode: {:?}", config.trigger_mode);

    // Initialize the generation backend
    let backend = Arc::new(GroqClient::new(
        config.groq_api_key.clone(),
        config.groq_model.clone(),
    ));
    info!("LLM client initialized (model: {})", config.groq_model);

    // Message store and engine
    let store = Arc::new(PgMessageStore::new(db.clone()));
    let engine = Arc::new(IntakeEngine::new(
        backend,
        store.clone(),
        schema,
        trigger,
    ));

    let state = AppState { store, engine };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: tighten CORS in production

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

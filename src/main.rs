//! Card Identifier - trading card recognition server.

mod analyzer;
mod catalog;
mod config;
mod error;
mod fusion;
mod ocr;
mod openrouter;
mod pipeline;
mod schema;
mod scorer;
mod search;
mod vision;

use anyhow::Context;
use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use catalog::pokemon_tcg::PokemonTcgClient;
use config::ScannerConfig;
use ocr::filename_hint::FilenameHintExtractor;
use ocr::vision_llm::VisionLlmExtractor;
use ocr::{TextExtractor, TextExtractorKind};
use openrouter::OpenRouterClient;
use pipeline::CardScanner;
use schema::{ScanReport, ScanRequest};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vision::palette::PaletteAnalyzer;

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    scanner: Arc<CardScanner>,
    config: Arc<ScannerConfig>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "card_identifier=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ScannerConfig::from_env()?;

    let extractor = build_extractor(&config)?;
    let catalog = PokemonTcgClient::from_env(config.search.request_timeout())
        .context("Failed to build Pokémon TCG client")?;
    let vision = PaletteAnalyzer::new(config.vision.clone());

    let scanner = CardScanner::new(&config, extractor, Arc::new(catalog), Arc::new(vision))
        .context("Failed to build card scanner")?;

    let state = AppState {
        scanner: Arc::new(scanner),
        config: Arc::new(config),
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/config", get(get_config))
        .route("/scan", post(scan_card))
        .layer(DefaultBodyLimit::max(20 * 1024 * 1024)) // 20MB
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Server listening on http://{}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Pick the text extractor named by `TEXT_EXTRACTOR` (default `filename_hint`).
fn build_extractor(config: &ScannerConfig) -> anyhow::Result<Arc<dyn TextExtractor>> {
    let name = std::env::var("TEXT_EXTRACTOR").unwrap_or_else(|_| "filename_hint".to_string());
    let kind = TextExtractorKind::parse(&name)
        .with_context(|| format!("Unknown TEXT_EXTRACTOR: {}", name))?;

    let extractor: Arc<dyn TextExtractor> = match kind {
        TextExtractorKind::FilenameHint => Arc::new(FilenameHintExtractor::new(
            config.vision.transcript_hints.clone(),
            config.vision.fallback_transcript.clone(),
        )),
        TextExtractorKind::VisionLlm => {
            let client = OpenRouterClient::from_env(config.search.request_timeout())?;
            info!("OpenRouter client initialized (model {})", client.model());
            Arc::new(VisionLlmExtractor::new(client))
        }
    };

    info!("Text extractor: {}", extractor.name());
    Ok(extractor)
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

/// Active scanner configuration.
async fn get_config(State(state): State<AppState>) -> Json<ScannerConfig> {
    Json(state.config.as_ref().clone())
}

/// Upload a card photo and identify it.
async fn scan_card(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ScanReport>, (StatusCode, String)> {
    let mut request = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        (StatusCode::BAD_REQUEST, format!("Multipart error: {}", e))
    })? {
        if field.name() == Some("file") {
            let filename = field.file_name().unwrap_or("card").to_string();
            let content_type = field.content_type().map(str::to_string);
            let data = field.bytes().await.map_err(|e| {
                (StatusCode::BAD_REQUEST, format!("Failed to read file: {}", e))
            })?.to_vec();

            let mut scan = ScanRequest::new(filename, data);
            if let Some(ct) = content_type {
                scan = scan.with_content_type(ct);
            }
            request = Some(scan);
            break;
        }
    }

    let request = request
        .filter(|r| !r.data.is_empty())
        .ok_or((StatusCode::BAD_REQUEST, "No file uploaded".to_string()))?;

    info!("Received {} ({} bytes)", request.filename, request.data.len());

    // Dropping the handler future (client gone) cancels the scan.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let report = state.scanner.scan(&request, &cancel).await;
    Ok(Json(report))
}

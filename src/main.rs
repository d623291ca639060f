//! Support desk - grounded customer-support answers
//!
//! Routes each customer message through a small state machine that
//! gathers knowledge-base passages and order facts before asking a
//! language model for a reply.

mod api;
mod classifier;
mod config;
mod context;
mod conversation;
mod generator;
mod llm;
mod orchestrator;
mod orders;
mod retriever;
mod state_machine;
mod tools;

use api::{create_router, AppState};
use classifier::KeywordClassifier;
use config::Config;
use generator::LlmAnswerGenerator;
use llm::{ModelRegistry, OpenAIEmbedder};
use orchestrator::Orchestrator;
use orders::HttpOrderLookup;
use retriever::{VectorIndex, VectorRetriever};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env file is fine
    let dotenv = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "support_desk=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    if let Ok(path) = dotenv {
        tracing::info!(path = %path.display(), "Loaded environment file");
    }

    let config = Config::from_env()?;

    // Initialize LLM registry
    let llm_registry = ModelRegistry::new(&config.llm);
    if !llm_registry.has_models() {
        tracing::warn!("No LLM API keys configured. Set OPENAI_API_KEY, ANTHROPIC_API_KEY or LLM_GATEWAY.");
    }
    let Some(llm) = llm_registry.default() else {
        tracing::error!(
            model = %llm_registry.default_model_id(),
            available = ?llm_registry.available_models(),
            "Configured model unavailable"
        );
        return Err(format!("model {} unavailable", llm_registry.default_model_id()).into());
    };
    tracing::info!(
        models = ?llm_registry.available_models(),
        default = %llm_registry.default_model_id(),
        "LLM registry initialized"
    );

    // Knowledge base
    let embedding_key = match (&config.llm.gateway, &config.llm.openai_api_key) {
        (Some(_), _) => "implicit".to_string(),
        (None, Some(key)) => key.clone(),
        (None, None) => return Err("OPENAI_API_KEY is required for query embeddings".into()),
    };
    let embedder = OpenAIEmbedder::new(
        embedding_key,
        config.embedding_model.clone(),
        config.llm.gateway.as_deref(),
    )?;
    tracing::info!(path = %config.kb_index_path.display(), "Opening knowledge index");
    let index = VectorIndex::open(&config.kb_index_path)?;
    match index.len() {
        Ok(0) => tracing::warn!("Knowledge index is empty; policy questions will be unanswerable"),
        Ok(passages) => tracing::info!(passages, "Knowledge index ready"),
        Err(e) => tracing::warn!(error = %e, "Could not count indexed passages"),
    }

    let orders = HttpOrderLookup::new(
        &config.order_api_base_url,
        config.orchestrator.timeouts.branch,
    )?;

    let orchestrator = Orchestrator::new(
        Arc::new(KeywordClassifier::new()?),
        VectorRetriever::new(embedder, index),
        orders,
        LlmAnswerGenerator::new(llm),
        config.orchestrator.clone(),
    );
    let state = AppState::new(Arc::new(orchestrator));

    // Create router
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(order_api = %config.order_api_base_url, "Support desk listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

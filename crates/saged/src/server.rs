//! HTTP server for saged

use crate::config::Config;
use crate::conversation::LruConversationStore;
use crate::ollama::OllamaClient;
use crate::orchestrator::Orchestrator;
use crate::pipeline::Services;
use crate::retrieval::{HttpFileExtractor, HttpRetriever, Retriever};
use crate::routes;
use crate::telemetry::TracingTelemetry;
use crate::tools::{HttpToolTransport, ToolDispatcher, ToolInvoker, ToolRegistry, ToolTransport};
use anyhow::Result;
use axum::Router;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Application state shared across handlers
pub struct AppState {
    pub orchestrator: Orchestrator,
    pub config: Arc<Config>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator, config: Arc<Config>) -> Self {
        Self {
            orchestrator,
            config,
            start_time: Instant::now(),
        }
    }
}

/// Production collaborators for `config`: Ollama, the HTTP tool service,
/// optional HTTP retrieval, HTTP file fetches and the in-memory history.
pub fn build_services(config: &Config) -> Result<Services> {
    let llm = Arc::new(OllamaClient::new(&config.llm)?);

    let transport: Arc<dyn ToolTransport> =
        Arc::new(HttpToolTransport::new(&config.tools.base_url)?);
    let registry = Arc::new(
        ToolRegistry::new(transport.clone(), config.tools.registry_ttl())
            .with_list_timeout(config.tools.list_timeout()),
    );
    let invoker = Arc::new(ToolInvoker::new(transport, &config.tools));
    let tools = Arc::new(ToolDispatcher::new(registry, invoker));

    let collab_timeout = Duration::from_millis(config.stages.rag_ms);
    let retriever = match &config.retrieval.base_url {
        Some(url) => {
            info!("  Retrieval service at {}", url);
            Some(Arc::new(HttpRetriever::new(url, collab_timeout)?) as Arc<dyn Retriever>)
        }
        None => None,
    };
    let files = Arc::new(HttpFileExtractor::new(Duration::from_millis(
        config.stages.file_extract_ms,
    ))?);

    Ok(Services {
        llm,
        tools,
        retriever,
        files,
        conversations: Arc::new(LruConversationStore::new(config.history.max_sessions)),
        telemetry: Arc::new(TracingTelemetry),
    })
}

/// Router with every route and the HTTP trace layer
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(routes::answer_routes())
        .merge(routes::health_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Run the HTTP server
pub async fn run(state: AppState, bind: &str) -> Result<()> {
    let app = build_router(Arc::new(state));

    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("  Listening on http://{}", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("  Shutting down gracefully");
        })
        .await?;
    Ok(())
}

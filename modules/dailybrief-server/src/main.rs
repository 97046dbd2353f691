use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use ai_client::OpenAiCompatible;
use dailybrief_common::Config;
use dailybrief_pipeline::{LarkClient, Messenger};
use dailybrief_qa::{
    ContextManager, EmbeddingClient, EnhancedRetriever, KnowledgeBase, QaEngine, RateLimiter,
    SnapshotIndex,
};
use dailybrief_server::{router, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("dailybrief=info".parse()?),
        )
        .init();

    let config_path = PathBuf::from(
        std::env::var("DAILYBRIEF_CONFIG").unwrap_or_else(|_| "config.json".to_string()),
    );
    let config = Config::load(Some(config_path.as_path()))?;
    config.log_redacted();

    let qa_config = &config.knowledge_qa;

    // Knowledge base + retrieval stack.
    let index = Arc::new(SnapshotIndex::open(
        &qa_config.vector.path,
        &qa_config.vector.collection_name,
    )?);
    let embedder = Arc::new(EmbeddingClient::new(&qa_config.embedding));
    let kb = Arc::new(KnowledgeBase::new(index, embedder, &qa_config.chunking)?);
    let retriever = Arc::new(EnhancedRetriever::new(kb, qa_config.retrieval.clone()));

    // Conversation + synthesis.
    let context = Arc::new(ContextManager::new(
        qa_config.retrieval.max_history_turns,
        30 * 60,
    ));
    let agent = OpenAiCompatible::with_timeout(
        &config.ai.api_key,
        &config.ai.model,
        Duration::from_secs(config.ai.timeout_secs),
    )
    .with_base_url(&config.ai.api_base);
    let qa = Arc::new(QaEngine::new(
        retriever,
        context,
        Arc::new(agent),
        qa_config.qa_engine.clone(),
    ));

    let limiter = Arc::new(RateLimiter::new(&qa_config.rate_limit));
    let messenger: Arc<dyn Messenger> = Arc::new(LarkClient::new(&config.lark));

    let state = Arc::new(AppState::new(
        qa_config.event_server.clone(),
        qa,
        limiter,
        messenger,
    ));

    let addr = format!(
        "{}:{}",
        qa_config.event_server.host, qa_config.event_server.port
    );
    info!(addr, "Event server listening");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    axum::serve(listener, router(state)).await?;

    Ok(())
}

//! DeepForge Research CLI
//!
//! Runs one research session and prints every event as a JSON line.

use anyhow::{bail, Context};
use deepforge_common::cache::open_store;
use deepforge_common::embeddings::{create_embedder, CachedEmbedder, Embedder};
use deepforge_common::{config::AppConfig, metrics, VERSION};
use deepforge_research::backends::{HttpKnowledgeBase, HttpKnowledgeGraph, TavilyWebSearch};
use deepforge_research::llm::OpenAiChat;
use deepforge_research::{DeepResearcher, EventStatus, RetrievalGateway};
use futures::StreamExt;
use std::io::Write;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));

    // stdout carries the events
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    if config.observability.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn build_gateway(config: &AppConfig) -> anyhow::Result<RetrievalGateway> {
    let timeout = config.research.backend_timeout();
    let mut gateway = RetrievalGateway::new(&config.research);

    if let Some(endpoint) = &config.knowledge_base.endpoint {
        info!(endpoint = %endpoint, "Knowledge base enabled");
        gateway = gateway.with_knowledge_base(Arc::new(HttpKnowledgeBase::new(
            endpoint.clone(),
            config.knowledge_base.top_k,
            timeout,
        )?));
    }

    if let Some(web) = TavilyWebSearch::from_config(&config.web, timeout)? {
        info!(endpoint = %config.web.endpoint, "Web search enabled");
        gateway = gateway.with_web_search(Arc::new(web));
    }

    if let Some(endpoint) = &config.knowledge_graph.endpoint {
        info!(endpoint = %endpoint, "Knowledge graph enabled");
        gateway = gateway.with_knowledge_graph(Arc::new(HttpKnowledgeGraph::new(endpoint.clone(), timeout)?));
    }

    Ok(gateway)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let question = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if question.trim().is_empty() {
        bail!("usage: research \"<question>\"");
    }

    let config = AppConfig::load().context("Failed to load configuration")?;
    init_tracing(&config);
    config.validate()?;
    metrics::register_metrics();

    info!("Starting DeepForge Research v{}", VERSION);

    let generator = Arc::new(OpenAiChat::new(&config.llm)?);
    let mut researcher = DeepResearcher::new(generator, build_gateway(&config)?, &config);

    if let Some(embedder) = create_embedder(&config.embedding)? {
        info!(provider = %config.embedding.provider, model = %embedder.model_name(), "Embedding scorer enabled");
        let store = open_store(&config.cache).await;
        researcher = researcher.with_embedder(Arc::new(CachedEmbedder::new(embedder, store)));
    }
    let researcher = Arc::new(researcher);

    let mut events = Box::pin(researcher.stream(question));
    let stdout = std::io::stdout();
    let mut failed = false;

    while let Some(event) = events.next().await {
        failed = event.status == EventStatus::Error;
        let mut out = stdout.lock();
        serde_json::to_writer(&mut out, &event)?;
        out.write_all(b"\n")?;
        out.flush()?;
    }

    if failed {
        std::process::exit(1);
    }
    Ok(())
}

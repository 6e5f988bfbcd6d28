//! Orchestrator - the reason/search/extract loop
//!
//! Each step asks the generator to continue its reasoning, runs the queries
//! it emits through retrieval and extraction, and feeds the findings back as
//! evidence for the next step. Progress streams out as `ResearchEvent`s over
//! a bounded channel; a dropped receiver cancels the session at the next
//! emission.

use crate::context::{ContextBuilder, ContextBuilderConfig};
use crate::event::{EventStatus, ResearchEvent};
use crate::extractor::{Extraction, Extractor, NO_INFO};
use crate::llm::{estimate_tokens, strip_think, GenConf, Generator, THINK_CLOSE};
use crate::merger;
use crate::prompts::Prompts;
use crate::query::{QueryFilter, ValidatedQuery};
use crate::retrieval::RetrievalGateway;
use crate::session::Session;
use crate::tags::TagSet;
use crate::types::{ChatMessage, ChunkInfo, ReasoningStep, Role, SearchResult, StepStatus};
use deepforge_common::config::{AppConfig, ResearchConfig};
use deepforge_common::embeddings::Embedder;
use deepforge_common::metrics;
use futures::{FutureExt, Stream, StreamExt};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Events buffered between the session task and its consumer
pub const EVENT_BUFFER: usize = 64;

const THINK_OPEN: &str = "<think>";
const CONTINUE_PROMPT: &str = "Continue reasoning with the new information.";
const TRUNCATION_NOTE: &str = "\n\n[Reasoning truncated for length]";
const LIMIT_NOTE: &str = "\nMaximum search limit reached. Answer with the information gathered so far.\n";
const CACHED_NOTE: &str = "Using cached result for this query.";

/// The event consumer went away
#[derive(Debug)]
struct Cancelled;

pub struct DeepResearcher {
    generator: Arc<dyn Generator>,
    gateway: Arc<RetrievalGateway>,
    config: ResearchConfig,
    tags: TagSet,
    prompts: Arc<Prompts>,
    filter: QueryFilter,
    context: ContextBuilder,
    extractor: Extractor,
    conf: GenConf,
    embedder: Option<Arc<dyn Embedder>>,
}

impl DeepResearcher {
    pub fn new(generator: Arc<dyn Generator>, gateway: RetrievalGateway, config: &AppConfig) -> Self {
        let prompts = Arc::new(Prompts::default());
        let conf = GenConf::from_config(&config.llm);
        Self {
            extractor: Extractor::new(generator.clone(), prompts.clone(), conf.clone(), &config.research),
            generator,
            gateway: Arc::new(gateway),
            config: config.research.clone(),
            tags: TagSet::from_config(&config.tags),
            prompts,
            filter: QueryFilter::from_config(&config.research),
            context: ContextBuilder::new(ContextBuilderConfig::from_config(&config.research)),
            conf,
            embedder: None,
        }
    }

    /// Score result confidence by embedding similarity instead of token overlap
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Replace the prompt templates
    pub fn with_prompts(mut self, prompts: Prompts) -> Self {
        self.prompts = Arc::new(prompts);
        self.extractor = Extractor::new(
            self.generator.clone(),
            self.prompts.clone(),
            self.conf.clone(),
            &self.config,
        );
        self
    }

    /// Spawn a session and stream its events
    pub fn stream(self: Arc<Self>, question: impl Into<String>) -> impl Stream<Item = ResearchEvent> + Send + 'static {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let question = question.into();
        tokio::spawn(async move {
            self.run_session(&question, tx).await;
        });

        futures::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|event| (event, rx)) })
    }

    /// Drive one session to its terminal event and return the final state
    pub async fn run_session(&self, question: &str, tx: mpsc::Sender<ResearchEvent>) -> Session {
        let mut session = Session::new(question);
        let span = info_span!("research_session", session_id = %session.id);

        async move {
            info!(question = %question, "Research session started");
            let mut think = String::from(THINK_OPEN);

            let outcome = AssertUnwindSafe(self.research(&mut session, &mut think, &tx))
                .catch_unwind()
                .await;

            match outcome {
                Ok(Ok(())) => {
                    session.finalize();
                    think.push_str(THINK_CLOSE);
                    let event = ResearchEvent::completed(think, &session);
                    if tx.send(event).await.is_err() {
                        debug!("Consumer gone before the completed event");
                    }
                    metrics::record_session("completed");
                    info!(
                        steps = session.reasoning_history.len(),
                        total_queries = session.metrics.total_queries,
                        cache_hits = session.metrics.cache_hits,
                        failed_retrievals = session.metrics.failed_retrievals,
                        "Research session completed"
                    );
                }
                Ok(Err(Cancelled)) => {
                    metrics::record_session("cancelled");
                    info!(steps = session.reasoning_history.len(), "Research session cancelled by consumer");
                }
                Err(payload) => {
                    let message = panic_message(payload);
                    error!(error = %message, "Research session failed");
                    let event = ResearchEvent::error(think, &session.chunk_info, message);
                    if tx.send(event).await.is_err() {
                        debug!("Consumer gone before the error event");
                    }
                    metrics::record_session("error");
                }
            }

            session
        }
        .instrument(span)
        .await
    }

    async fn emit(&self, tx: &mpsc::Sender<ResearchEvent>, event: ResearchEvent) -> Result<(), Cancelled> {
        tx.send(event).await.map_err(|_| Cancelled)
    }

    async fn research(
        &self,
        session: &mut Session,
        think: &mut String,
        tx: &mpsc::Sender<ResearchEvent>,
    ) -> Result<(), Cancelled> {
        let system = self.prompts.reasoning(&self.tags, self.filter.max_per_step);

        for step_index in 0..self.config.max_steps {
            if step_index + 1 >= self.config.max_search_limit {
                info!(step = step_index + 1, limit = self.config.max_search_limit, "Maximum search limit reached");
                think.push_str(&self.tags.wrap_result(LIMIT_NOTE));
                break;
            }

            let started = Instant::now();
            let step_id = session.next_step_id();
            if step_index > 0 {
                continue_turn(&mut session.message_history);
            }

            let reasoning = self.reason(session, think, tx, &system).await?;
            let mut step = ReasoningStep::new(step_id, reasoning.clone());

            let mut candidates = self.tags.extract_queries(&reasoning);
            if candidates.is_empty() && step_index == 0 {
                debug!("No queries in the opening step, seeding with the question");
                candidates.push(session.question.clone());
            }
            think.push_str(&self.tags.strip_queries(&reasoning));

            let queries = self.filter.select(&candidates, &session.executed_queries);
            if queries.is_empty() {
                info!(step = step_id, "No new queries, finishing");
                step.status = StepStatus::Completed;
                session.push_step(step);
                metrics::record_step(started.elapsed().as_secs_f64(), "completed");
                break;
            }

            step.queries = queries.iter().map(|q| q.canonical.clone()).collect();
            let mut backend_failed = false;

            for (q_idx, query) in queries.iter().enumerate() {
                step.status = StepStatus::Searching;
                session.message_history.push(ChatMessage::assistant(query.text.clone()));
                think.push_str(&format!("\n\n> {}.{} {}\n\n", step_id, q_idx + 1, query.text));
                self.emit(tx, progress(EventStatus::Searching, think, "", &session.chunk_info)).await?;

                let result = match session.query_cache.get(&query.canonical).cloned() {
                    Some(cached) => {
                        debug!(query = %query.canonical, "Replaying cached result");
                        session.metrics.cache_hits += 1;
                        metrics::record_result_cache_hit();
                        think.push_str(&self.tags.wrap_result(CACHED_NOTE));
                        cached
                    }
                    None => {
                        step.status = StepStatus::Extracting;
                        let (result, failed) = self.search(session, query, step_index, think, tx).await?;
                        backend_failed |= failed;
                        result
                    }
                };

                session.message_history.push(ChatMessage::user(format!(
                    "\n\n{}\n\n",
                    self.tags.wrap_result(&result.summary)
                )));
                think.push_str("\n\n");
                think.push_str(&self.tags.strip_results(&result.summary));
                step.results.push(result);
            }

            if backend_failed {
                session.metrics.failed_retrievals += 1;
                metrics::record_failed_retrieval();
            }

            step.status = StepStatus::Completed;
            info!(step = step_id, queries = step.queries.len(), "Step completed");
            session.push_step(step);
            metrics::record_step(started.elapsed().as_secs_f64(), "completed");
        }

        Ok(())
    }

    /// Stream one reasoning continuation; returns its text without chain-of-thought
    async fn reason(
        &self,
        session: &Session,
        think: &str,
        tx: &mpsc::Sender<ResearchEvent>,
        system: &str,
    ) -> Result<String, Cancelled> {
        let mut partials = match self
            .generator
            .chat_streamly(system, &session.message_history, &self.conf)
            .await
        {
            Ok(partials) => partials,
            Err(e) => {
                warn!(error = %e, "Reasoning call failed, using fallback text");
                return Ok(self.prompts.reasoning_fallback.clone());
            }
        };

        let mut text = String::new();
        while let Some(item) = partials.next().await {
            match item {
                Ok(partial) => {
                    let cleaned = strip_think(&partial);
                    if cleaned.trim().is_empty() {
                        continue;
                    }
                    text = cleaned.to_string();

                    let over_budget = estimate_tokens(&text) > self.config.reasoning_token_budget;
                    if over_budget {
                        text.push_str(TRUNCATION_NOTE);
                    }
                    let shown = self.tags.strip_queries(&text);
                    self.emit(tx, progress(EventStatus::Reasoning, think, &shown, &session.chunk_info))
                        .await?;
                    if over_budget {
                        warn!(budget = self.config.reasoning_token_budget, "Reasoning truncated");
                        break;
                    }
                }
                Err(e) if text.is_empty() => {
                    warn!(error = %e, "Reasoning failed before any output, using fallback text");
                    text = self.prompts.reasoning_fallback.clone();
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Reasoning stream broke off, keeping partial output");
                    break;
                }
            }
        }

        Ok(text)
    }

    /// Retrieve, merge and extract for a query seen for the first time
    async fn search(
        &self,
        session: &mut Session,
        query: &ValidatedQuery,
        step_index: usize,
        think: &str,
        tx: &mpsc::Sender<ResearchEvent>,
    ) -> Result<(SearchResult, bool), Cancelled> {
        session.executed_queries.insert(query.canonical.clone());
        session.metrics.total_queries += 1;

        let retrieval = self.gateway.retrieve(&query.text).await;
        let backend_failed = retrieval.failed();
        metrics::record_query(retrieval.backends);
        merger::merge(&mut session.chunk_info, retrieval.info.clone(), &query.canonical);

        let prev_context = self.context.build(&session.reasoning_history);
        let extraction = self
            .extract(&prev_context, query, &retrieval.info, &session.chunk_info, think, tx)
            .await?;

        let confidence = if extraction.failed {
            0.0
        } else {
            self.confidence(&extraction.text, &query.canonical).await
        };
        metrics::record_confidence(confidence);

        let result = SearchResult {
            query: query.canonical.clone(),
            sources: retrieval.info.chunks.into_iter().take(self.config.max_sources).collect(),
            summary: extraction.text,
            confidence,
            step_index,
        };
        session.query_cache.insert(query.canonical.clone(), result.clone());

        Ok((result, backend_failed))
    }

    /// Relevance of a summary to its query, in [0, 1]
    async fn confidence(&self, summary: &str, query: &str) -> f64 {
        let Some(embedder) = &self.embedder else {
            return merger::relevance(summary, query);
        };
        match merger::semantic_relevance(embedder.as_ref(), summary, query).await {
            Ok(score) => score,
            Err(e) => {
                warn!(query = %query, error = %e, "Embedding scoring failed, using token overlap");
                merger::relevance(summary, query)
            }
        }
    }

    async fn extract(
        &self,
        prev_context: &str,
        query: &ValidatedQuery,
        retrieved: &ChunkInfo,
        reference: &ChunkInfo,
        think: &str,
        tx: &mpsc::Sender<ResearchEvent>,
    ) -> Result<Extraction, Cancelled> {
        let mut partials = self.extractor.stream_extract(prev_context, &query.text, retrieved).await;

        let mut last = Extraction {
            text: String::new(),
            failed: false,
        };
        while let Some(partial) = partials.next().await {
            let shown = format!("\n\n{}", self.tags.strip_results(&partial.text));
            self.emit(tx, progress(EventStatus::Extracting, think, &shown, reference)).await?;
            last = partial;
        }

        if last.text.trim().is_empty() {
            last.text = NO_INFO.to_string();
        }
        Ok(last)
    }
}

fn progress(status: EventStatus, think: &str, tail: &str, reference: &ChunkInfo) -> ResearchEvent {
    ResearchEvent::progress(status, format!("{}{}{}", think, tail, THINK_CLOSE), reference)
}

/// Ask for the next turn, folding into a trailing user message
fn continue_turn(history: &mut Vec<ChatMessage>) {
    match history.last_mut() {
        Some(last) if last.role == Role::User => {
            last.content.push_str(CONTINUE_PROMPT);
        }
        _ => history.push(ChatMessage::user(CONTINUE_PROMPT)),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return s.to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "research session panicked".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{chunk, ExtractionTurn, MockKb, MockKg, MockWeb, ReasoningTurn, ScriptedGenerator};
    use async_trait::async_trait;
    use deepforge_common::cache::MemoryStore;
    use deepforge_common::embeddings::{CachedEmbedder, MockEmbedder};
    use deepforge_common::errors::AppError;
    use std::collections::HashSet;

    fn q(text: &str) -> String {
        let tags = TagSet::default();
        format!("{}{}{}", tags.begin_query, text, tags.end_query)
    }

    fn turn(text: String) -> ReasoningTurn {
        ReasoningTurn::Text(text)
    }

    fn tides_kb() -> MockKb {
        MockKb::default()
            .respond(
                "tidal forces moon",
                vec![
                    chunk("t1", "d1", "The moon's gravity pulls the near ocean.").with_confidence(0.9),
                    chunk("t2", "d2", "Tidal forces stretch the earth.").with_confidence(0.6),
                ],
            )
            .respond(
                "ocean tides sun",
                vec![
                    chunk("o1", "d3", "The sun adds a smaller tidal bulge.").with_confidence(0.9),
                    chunk("o2", "d4", "Spring tides align sun and moon.").with_confidence(0.6),
                ],
            )
    }

    fn researcher(generator: Arc<ScriptedGenerator>, gateway: RetrievalGateway, config: AppConfig) -> DeepResearcher {
        DeepResearcher::new(generator, gateway, &config)
    }

    async fn run(researcher: &DeepResearcher, question: &str) -> (Vec<ResearchEvent>, Session) {
        let (tx, mut rx) = mpsc::channel(1024);
        let session = researcher.run_session(question, tx).await;
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (events, session)
    }

    fn assert_session_invariants(events: &[ResearchEvent], session: &Session) {
        let terminal: Vec<_> = events.iter().filter(|e| e.status.is_terminal()).collect();
        assert_eq!(terminal.len(), 1);
        assert!(events.last().unwrap().status.is_terminal());
        for event in events {
            assert!(event.answer.starts_with("<think>"));
        }

        assert_eq!(session.executed_queries.len(), session.query_cache.len());
        for query in &session.executed_queries {
            assert!(session.query_cache.contains(query));
        }

        let chunk_ids: HashSet<&str> = session.chunk_info.chunks.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(chunk_ids.len(), session.chunk_info.chunks.len());
        let doc_ids: HashSet<&str> = session.chunk_info.doc_aggs.iter().map(|d| d.doc_id.as_str()).collect();
        assert_eq!(doc_ids.len(), session.chunk_info.doc_aggs.len());

        for (i, step) in session.reasoning_history.iter().enumerate() {
            assert_eq!(step.step_id, i + 1);
        }
    }

    #[tokio::test]
    async fn test_two_step_happy_path() {
        let generator = Arc::new(ScriptedGenerator::new(
            vec![
                turn(format!("I need the physics. {} {}", q("tidal forces moon"), q("ocean tides sun"))),
                turn(format!("Checking once more. {}", q("tidal forces moon"))),
            ],
            vec![],
        ));
        let gateway = RetrievalGateway::default().with_knowledge_base(Arc::new(tides_kb()));
        let researcher = researcher(generator.clone(), gateway, AppConfig::default());

        let (events, session) = run(&researcher, "What causes tides?").await;
        assert_session_invariants(&events, &session);

        assert_eq!(session.reasoning_history.len(), 2);
        let expected: HashSet<String> = ["tidal forces moon", "ocean tides sun"].iter().map(|s| s.to_string()).collect();
        assert_eq!(session.executed_queries, expected);
        assert_eq!(session.metrics.total_queries, 2);
        assert_eq!(session.metrics.cache_hits, 0);
        assert_eq!(session.chunk_info.chunks.len(), 4);

        let last = events.last().unwrap();
        assert_eq!(last.status, EventStatus::Completed);
        assert!(last.answer.ends_with("</think>"));
        let metadata = last.metadata.as_ref().unwrap();
        assert_eq!(metadata.reasoning_steps, 2);
        assert_eq!(metadata.total_queries, 2);

        let first = &session.reasoning_history[0];
        assert_eq!(first.queries, vec!["tidal forces moon".to_string(), "ocean tides sun".to_string()]);
        assert_eq!(first.results[0].step_index, 0);
        assert_eq!(first.results[0].sources.len(), 2);
        assert!(session.reasoning_history[1].queries.is_empty());
        assert_eq!(generator.extraction_calls(), 2);
    }

    struct UnavailableEmbedder;

    #[async_trait]
    impl Embedder for UnavailableEmbedder {
        async fn encode(&self, _texts: &[String]) -> deepforge_common::errors::Result<(Vec<Vec<f32>>, usize)> {
            Err(AppError::EmbeddingError {
                message: "service unavailable".to_string(),
            })
        }

        fn model_name(&self) -> &str {
            "unavailable"
        }

        fn dimension(&self) -> usize {
            16
        }
    }

    fn one_query_session(embedder: Arc<dyn Embedder>) -> DeepResearcher {
        let generator = Arc::new(ScriptedGenerator::new(
            vec![turn(format!("Look it up. {}", q("tidal forces moon")))],
            vec![ExtractionTurn::Text("The moon's gravity raises the near ocean.".to_string())],
        ));
        let gateway = RetrievalGateway::default().with_knowledge_base(Arc::new(tides_kb()));
        researcher(generator, gateway, AppConfig::default()).with_embedder(embedder)
    }

    #[tokio::test]
    async fn test_cached_embedder_scores_confidence() {
        let store = Arc::new(MemoryStore::new());
        let embedder = Arc::new(CachedEmbedder::new(Arc::new(MockEmbedder::new(16)), store.clone()));
        let researcher = one_query_session(embedder);

        let (events, session) = run(&researcher, "What causes tides?").await;
        assert_session_invariants(&events, &session);

        let result = &session.reasoning_history[0].results[0];
        let expected = merger::semantic_relevance(&MockEmbedder::new(16), &result.summary, "tidal forces moon")
            .await
            .unwrap();
        assert!((result.confidence - expected).abs() < 1e-9);
        assert!((0.0..=1.0).contains(&result.confidence));
        assert_eq!(store.len().await, 2);
        assert!((session.metrics.avg_confidence - expected).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_embedder_failure_falls_back_to_token_overlap() {
        let researcher = one_query_session(Arc::new(UnavailableEmbedder));
        let (events, session) = run(&researcher, "What causes tides?").await;

        assert_eq!(events.last().unwrap().status, EventStatus::Completed);
        let result = &session.reasoning_history[0].results[0];
        assert_eq!(result.confidence, merger::relevance(&result.summary, "tidal forces moon"));
    }

    #[tokio::test]
    async fn test_events_follow_causal_order() {
        let generator = Arc::new(ScriptedGenerator::new(
            vec![turn(format!("Look it up. {}", q("tidal forces moon")))],
            vec![],
        ));
        let gateway = RetrievalGateway::default().with_knowledge_base(Arc::new(tides_kb()));
        let (events, _) = run(&researcher(generator, gateway, AppConfig::default()), "What causes tides?").await;

        let rank = |s: EventStatus| match s {
            EventStatus::Reasoning => 0,
            EventStatus::Searching => 1,
            EventStatus::Extracting => 2,
            EventStatus::Completed | EventStatus::Error => 3,
        };
        let statuses: Vec<EventStatus> = events.iter().map(|e| e.status).collect();
        let first_step_end = statuses.iter().position(|s| *s == EventStatus::Extracting).unwrap();
        assert!(statuses[..first_step_end].windows(2).all(|w| rank(w[0]) <= rank(w[1])));
        assert_eq!(statuses.last(), Some(&EventStatus::Completed));

        let searching = events.iter().find(|e| e.status == EventStatus::Searching).unwrap();
        assert!(searching.answer.contains("> 1.1 tidal forces moon"));
        assert!(!searching.answer.contains(&TagSet::default().begin_query));
    }

    #[tokio::test]
    async fn test_canonical_duplicate_is_filtered_not_replayed() {
        let generator = Arc::new(ScriptedGenerator::new(
            vec![
                turn(format!("Start. {} {}", q("tidal forces moon"), q("ocean tides sun"))),
                turn(format!("Again. {}", q("TIDAL  FORCES MOON"))),
            ],
            vec![],
        ));
        let gateway = RetrievalGateway::default().with_knowledge_base(Arc::new(tides_kb()));
        let (events, session) = run(&researcher(generator, gateway, AppConfig::default()), "What causes tides?").await;

        assert_session_invariants(&events, &session);
        assert_eq!(session.metrics.cache_hits, 0);
        assert_eq!(session.metrics.total_queries, 2);
    }

    #[tokio::test]
    async fn test_cache_replay_returns_identical_result() {
        let generator = Arc::new(ScriptedGenerator::new(
            vec![
                turn(format!("Start. {}", q("tidal forces moon"))),
                turn(format!("Again. {}", q("Tidal Forces Moon"))),
            ],
            vec![],
        ));
        let kb = Arc::new(tides_kb());
        let gateway = RetrievalGateway::default().with_knowledge_base(kb.clone());
        let mut config = AppConfig::default();
        config.research.redundancy_threshold = 1.0;

        let (events, session) = run(&researcher(generator.clone(), gateway, config), "What causes tides?").await;
        assert_session_invariants(&events, &session);

        assert_eq!(session.metrics.cache_hits, 1);
        assert_eq!(session.metrics.total_queries, 1);
        assert_eq!(kb.calls(), 1);
        assert_eq!(generator.extraction_calls(), 1);
        assert_eq!(session.reasoning_history[0].results[0], session.reasoning_history[1].results[0]);
        assert!(events.last().unwrap().answer.contains("Using cached result"));
    }

    #[tokio::test]
    async fn test_web_fallback_when_kb_fails() {
        let generator = Arc::new(ScriptedGenerator::new(vec![turn(q("ocean tides sun"))], vec![]));
        let kb = Arc::new(MockKb::failing());
        let gateway = RetrievalGateway::default()
            .with_knowledge_base(kb.clone())
            .with_web_search(Arc::new(MockWeb::new(vec![chunk("w1", "web-doc", "The sun also raises tides.")])));

        let (events, session) = run(&researcher(generator, gateway, AppConfig::default()), "What causes tides?").await;
        assert_session_invariants(&events, &session);

        assert_eq!(session.metrics.failed_retrievals, 1);
        assert_eq!(session.chunk_info.chunks.len(), 1);
        assert_eq!(kb.calls(), 2);
        assert_eq!(events.last().unwrap().status, EventStatus::Completed);
    }

    #[tokio::test]
    async fn test_all_backends_fail() {
        let generator = Arc::new(ScriptedGenerator::new(vec![turn(q("ocean tides sun"))], vec![]));
        let gateway = RetrievalGateway::default()
            .with_knowledge_base(Arc::new(MockKb::failing()))
            .with_web_search(Arc::new(MockWeb::failing()));

        let (events, session) = run(&researcher(generator.clone(), gateway, AppConfig::default()), "What causes tides?").await;
        assert_session_invariants(&events, &session);

        let result = &session.reasoning_history[0].results[0];
        assert_eq!(result.summary, NO_INFO);
        assert!(result.sources.is_empty());
        assert_eq!(generator.extraction_calls(), 0);
        assert_eq!(session.metrics.failed_retrievals, 1);
    }

    #[tokio::test]
    async fn test_max_search_limit_terminates() {
        let generator = Arc::new(ScriptedGenerator::new(
            vec![
                turn(q("tidal forces moon")),
                turn(q("ocean tides sun")),
                turn(q("spring neap tides")),
            ],
            vec![],
        ));
        let gateway = RetrievalGateway::default().with_knowledge_base(Arc::new(tides_kb()));
        let mut config = AppConfig::default();
        config.research.max_search_limit = 2;

        let (events, session) = run(&researcher(generator.clone(), gateway, config), "What causes tides?").await;
        assert_session_invariants(&events, &session);

        let last = events.last().unwrap();
        assert_eq!(last.status, EventStatus::Completed);
        assert!(last.answer.contains("Maximum search limit reached"));
        assert_eq!(generator.reasoning_calls(), 1);
        assert_eq!(session.reasoning_history.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_question() {
        let generator = Arc::new(ScriptedGenerator::new(vec![], vec![]));
        let (events, session) = run(
            &researcher(generator, RetrievalGateway::default(), AppConfig::default()),
            "",
        )
        .await;
        assert_session_invariants(&events, &session);

        assert_eq!(session.reasoning_history.len(), 1);
        assert!(session.reasoning_history[0].queries.is_empty());
        assert_eq!(session.reasoning_history[0].status, StepStatus::Completed);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, EventStatus::Completed);
    }

    #[tokio::test]
    async fn test_extraction_failure_scores_zero() {
        let generator = Arc::new(ScriptedGenerator::new(
            vec![turn(q("tidal forces moon"))],
            vec![ExtractionTurn::FailAfter("The moon".to_string())],
        ));
        let gateway = RetrievalGateway::default().with_knowledge_base(Arc::new(tides_kb()));
        let (events, session) = run(&researcher(generator, gateway, AppConfig::default()), "What causes tides?").await;
        assert_session_invariants(&events, &session);

        let result = &session.reasoning_history[0].results[0];
        assert_eq!(result.confidence, 0.0);
        assert!(result.summary.starts_with("Error extracting information"));
        assert_eq!(events.last().unwrap().status, EventStatus::Completed);
    }

    #[tokio::test]
    async fn test_opening_step_seeds_question() {
        let generator = Arc::new(ScriptedGenerator::new(vec![ReasoningTurn::Fail], vec![]));
        let gateway = RetrievalGateway::default().with_knowledge_base(Arc::new(tides_kb()));
        let (events, session) = run(&researcher(generator, gateway, AppConfig::default()), "What causes tides?").await;
        assert_session_invariants(&events, &session);

        assert!(session.executed_queries.contains("what causes tides?"));
        assert!(session.reasoning_history[0].reasoning_text.contains("unable to continue reasoning"));
        assert_eq!(events.last().unwrap().status, EventStatus::Completed);
    }

    #[tokio::test]
    async fn test_reasoning_truncated_at_budget() {
        let generator = Arc::new(ScriptedGenerator::new(
            vec![turn(format!("one two three four five six seven eight {}", q("tidal forces moon")))],
            vec![],
        ));
        let mut config = AppConfig::default();
        config.research.reasoning_token_budget = 5;
        let (events, session) = run(
            &researcher(generator, RetrievalGateway::default(), config),
            "What causes tides?",
        )
        .await;

        let reasoning: Vec<_> = events.iter().filter(|e| e.status == EventStatus::Reasoning).collect();
        assert_eq!(reasoning.len(), 6);
        assert!(reasoning[5].answer.contains("[Reasoning truncated for length]"));
        assert!(session.reasoning_history[0].reasoning_text.ends_with("[Reasoning truncated for length]"));
        assert!(!session.executed_queries.contains("tidal forces moon"));
    }

    #[tokio::test]
    async fn test_graph_chunk_leads_reference() {
        let generator = Arc::new(ScriptedGenerator::new(vec![turn(q("tidal forces moon"))], vec![]));
        let gateway = RetrievalGateway::default()
            .with_knowledge_base(Arc::new(tides_kb()))
            .with_knowledge_graph(Arc::new(MockKg::new(Some(chunk("kg-1", "", "Moon --gravity--> Ocean")))));

        let (events, session) = run(&researcher(generator, gateway, AppConfig::default()), "What causes tides?").await;
        assert_session_invariants(&events, &session);
        assert_eq!(session.chunk_info.chunks[0].chunk_id, "kg-1");
        assert_eq!(events.last().unwrap().reference.chunks[0].chunk_id, "kg-1");
    }

    #[tokio::test]
    async fn test_evidence_fed_back_to_generator() {
        let generator = Arc::new(ScriptedGenerator::new(
            vec![turn(q("tidal forces moon"))],
            vec![ExtractionTurn::Text("The moon pulls the ocean.".to_string())],
        ));
        let gateway = RetrievalGateway::default().with_knowledge_base(Arc::new(tides_kb()));
        let (_, session) = run(&researcher(generator, gateway, AppConfig::default()), "What causes tides?").await;

        let tags = TagSet::default();
        let history = &session.message_history;
        assert_eq!(history[1], ChatMessage::assistant("tidal forces moon"));
        assert_eq!(history[2].role, Role::User);
        assert!(history[2]
            .content
            .starts_with(&format!("\n\n{}The moon pulls the ocean.{}", tags.begin_result, tags.end_result)));
        assert!(history[2].content.ends_with(CONTINUE_PROMPT));
    }

    #[tokio::test]
    async fn test_dropped_consumer_cancels_session() {
        let words: Vec<String> = (0..40).map(|i| format!("word{}", i)).collect();
        let generator = Arc::new(ScriptedGenerator::new(
            vec![turn(format!("{} {}", words.join(" "), q("tidal forces moon")))],
            vec![],
        ));
        let researcher = Arc::new(researcher(generator.clone(), RetrievalGateway::default(), AppConfig::default()));

        let (tx, mut rx) = mpsc::channel(1);
        let task = {
            let researcher = researcher.clone();
            tokio::spawn(async move { researcher.run_session("What causes tides?", tx).await })
        };

        let first = rx.recv().await.unwrap();
        assert_eq!(first.status, EventStatus::Reasoning);
        drop(rx);

        let session = task.await.unwrap();
        assert!(session.reasoning_history.is_empty());
        assert!(session.executed_queries.is_empty());
        assert_eq!(generator.reasoning_calls(), 1);
        assert_eq!(generator.extraction_calls(), 0);
    }

    #[tokio::test]
    async fn test_panic_becomes_single_error_event() {
        let generator = Arc::new(ScriptedGenerator::new(vec![ReasoningTurn::Panic], vec![]));
        let (events, session) = run(
            &researcher(generator, RetrievalGateway::default(), AppConfig::default()),
            "What causes tides?",
        )
        .await;

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, EventStatus::Error);
        assert!(events[0].error.as_deref().unwrap().contains("scripted generator panic"));
        assert!(events[0].metadata.is_none());
        assert!(session.reasoning_history.is_empty());
    }

    #[tokio::test]
    async fn test_stream_yields_until_terminal() {
        let generator = Arc::new(ScriptedGenerator::new(vec![turn(q("tidal forces moon"))], vec![]));
        let gateway = RetrievalGateway::default().with_knowledge_base(Arc::new(tides_kb()));
        let researcher = Arc::new(researcher(generator, gateway, AppConfig::default()));

        let events: Vec<ResearchEvent> = researcher.stream("What causes tides?").collect().await;
        assert!(events.len() > 2);
        assert_eq!(events.last().unwrap().status, EventStatus::Completed);
        assert_eq!(events.iter().filter(|e| e.status.is_terminal()).count(), 1);
    }
}

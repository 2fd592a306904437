//! Retrieval-augmented chat orchestration
//!
//! `ChatService` drives one query through embedding, filtered retrieval, prompt
//! assembly and generation. Stages run strictly in sequence and any stage failure
//! aborts the request; no partial answer is ever returned.

pub mod errors;
pub mod models;
pub mod prompt;
pub mod timing;


use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};
use uuid::Uuid;

use crate::RagError;
use crate::clock::{Clock, MonotonicClock};
use crate::config::{ChatConfig, Config};
use crate::config::settings::{MAX_OUTPUT_TOKENS, MAX_TEMPERATURE, MAX_TOP_K};
use crate::database::{ChromaStore, MetadataFilter, QueryMatch, VectorStore};
use crate::embeddings::{Embedder, GeminiEmbedder};
use crate::generation::{GeminiGenerator, GenerationParams, Generator};

pub use errors::{ChatError, ChatErrorKind, RetrievalCause, Stage, ValidationError};
pub use models::{ChatAnswer, ChatParametersOverride, ChatQueryRequest, UsageMetrics};
pub use prompt::{DEFAULT_SYSTEM_PROMPT, DISTANCE_PLACEHOLDER, build_prompt};
use timing::TimingTracker;

/// Query orchestrator over injected embedding, retrieval and generation capabilities
pub struct ChatService {
    settings: ChatConfig,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    generator: Arc<dyn Generator>,
    clock: Arc<dyn Clock>,
    system_prompt: String,
}

/// What the stages produce before the answer record is assembled
struct StageOutput {
    answer: String,
    sources: Vec<QueryMatch>,
    total_tokens: Option<u32>,
}

/// Stage currently in flight, read when a request is cancelled
#[derive(Debug)]
struct StageCursor(Mutex<Stage>);

impl StageCursor {
    fn new() -> Self {
        Self(Mutex::new(Stage::Embedding))
    }

    fn enter(&self, stage: Stage) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = stage;
    }

    fn current(&self) -> Stage {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ChatService {
    /// Build a service from its collaborators.
    ///
    /// The system prompt is read from `settings.system_prompt_path` when set.
    #[inline]
    pub fn new(
        settings: ChatConfig,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        let system_prompt =
            prompt::load_system_prompt(settings.expanded_system_prompt_path().as_deref());

        Self {
            settings,
            embedder,
            store,
            generator,
            clock: Arc::new(MonotonicClock::new()),
            system_prompt,
        }
    }

    /// Wire up the Gemini and Chroma clients described by `config`
    #[inline]
    pub async fn from_config(config: &Config) -> Result<Self, RagError> {
        let embedder = GeminiEmbedder::new(&config.gemini)?;
        let generator = GeminiGenerator::new(&config.gemini, &config.chat.model)?;
        let store = ChromaStore::connect(
            &config.chroma,
            &config.chat.allowed_metadata_keys,
            config.gemini.request_timeout(),
        )
        .await?;

        info!(
            "Chat service ready (embedding: {}, chat: {}, collection: {})",
            embedder.model_name(),
            generator.model_name(),
            store.collection_name()
        );

        Ok(Self::new(
            config.chat.clone(),
            Arc::new(embedder),
            Arc::new(store),
            Arc::new(generator),
        ))
    }

    #[inline]
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    #[inline]
    pub fn settings(&self) -> &ChatConfig {
        &self.settings
    }

    #[inline]
    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Answer a query. Dropping the returned future abandons the pipeline.
    #[inline]
    pub async fn answer(&self, request: &ChatQueryRequest) -> Result<ChatAnswer, ChatError> {
        self.run(request, &StageCursor::new()).await
    }

    /// Answer a query unless `cancelled` resolves first.
    ///
    /// An invalid request fails validation even if `cancelled` has already
    /// resolved. Once cancellation is observed no further stage result is used
    /// and the request fails with [`ChatError::Cancelled`] naming the stage in flight.
    #[inline]
    pub async fn answer_until<F>(
        &self,
        request: &ChatQueryRequest,
        cancelled: F,
    ) -> Result<ChatAnswer, ChatError>
    where
        F: Future<Output = ()> + Send,
    {
        if let Err(error) = self.validate_request(request) {
            let error = ChatError::from(error);
            error.log(&Uuid::new_v4().to_string());
            return Err(error);
        }

        let cursor = StageCursor::new();
        tokio::select! {
            biased;
            () = cancelled => {
                let stage = cursor.current();
                info!("Chat request cancelled during {} stage", stage);
                Err(ChatError::Cancelled { stage })
            }
            result = self.run(request, &cursor) => result,
        }
    }

    /// Merge overrides over the configured defaults and check every value's domain
    #[inline]
    pub fn resolve_parameters(
        &self,
        overrides: Option<&ChatParametersOverride>,
    ) -> Result<GenerationParams, ValidationError> {
        let overrides = overrides.copied().unwrap_or_default();
        let params = GenerationParams {
            temperature: overrides.temperature.unwrap_or(self.settings.temperature),
            top_k: overrides.top_k.unwrap_or(self.settings.top_k),
            max_output_tokens: overrides
                .max_output_tokens
                .unwrap_or(self.settings.max_output_tokens),
        };

        if !params.temperature.is_finite() || !(0.0..=MAX_TEMPERATURE).contains(&params.temperature)
        {
            return Err(ValidationError::Temperature {
                value: params.temperature,
                max: MAX_TEMPERATURE,
            });
        }
        if !(1..=MAX_TOP_K).contains(&params.top_k) {
            return Err(ValidationError::TopK {
                value: params.top_k,
                max: MAX_TOP_K,
            });
        }
        if !(1..=MAX_OUTPUT_TOKENS).contains(&params.max_output_tokens) {
            return Err(ValidationError::MaxOutputTokens {
                value: params.max_output_tokens,
                max: MAX_OUTPUT_TOKENS,
            });
        }

        Ok(params)
    }

    fn validate_request(
        &self,
        request: &ChatQueryRequest,
    ) -> Result<(MetadataFilter, GenerationParams), ValidationError> {
        if request.query.trim().is_empty() {
            return Err(ValidationError::EmptyQuery);
        }

        let filter = request.metadata_filters.clone().unwrap_or_default();
        filter.validate(&self.settings.allowed_metadata_keys)?;

        let params = self.resolve_parameters(request.overrides.as_ref())?;
        Ok((filter, params))
    }

    async fn run(
        &self,
        request: &ChatQueryRequest,
        cursor: &StageCursor,
    ) -> Result<ChatAnswer, ChatError> {
        let request_id = Uuid::new_v4().to_string();
        let mut timings = TimingTracker::new(self.clock.as_ref());

        let result = self
            .run_stages(request, &request_id, cursor, &mut timings)
            .await;

        match result {
            Ok(StageOutput {
                answer,
                sources,
                total_tokens,
            }) => {
                let usage = UsageMetrics {
                    embedding_ms: timings.split_ms(Stage::Embedding),
                    retrieval_ms: timings.split_ms(Stage::Retrieval),
                    generation_ms: timings.split_ms(Stage::Generation),
                    total_ms: timings.total_ms(),
                    total_tokens,
                };

                info!(
                    "[{}] Answered with {} sources (embedding {:.1}ms, retrieval {:.1}ms, generation {:.1}ms, total {:.1}ms)",
                    request_id,
                    sources.len(),
                    usage.embedding_ms,
                    usage.retrieval_ms,
                    usage.generation_ms,
                    usage.total_ms
                );

                Ok(ChatAnswer {
                    conversation_id: Uuid::new_v4().to_string(),
                    answer,
                    sources,
                    usage,
                    request_id,
                })
            }
            Err(error) => {
                error.log(&request_id);
                Err(error)
            }
        }
    }

    async fn run_stages(
        &self,
        request: &ChatQueryRequest,
        request_id: &str,
        cursor: &StageCursor,
        timings: &mut TimingTracker<'_>,
    ) -> Result<StageOutput, ChatError> {
        let (filter, params) = self.validate_request(request)?;
        let query = request.query.trim();

        debug!(
            "[{}] Chat query (length: {}, filter keys: {}, temperature: {}, top_k: {}, max tokens: {})",
            request_id,
            query.len(),
            filter.len(),
            params.temperature,
            params.top_k,
            params.max_output_tokens
        );

        cursor.enter(Stage::Embedding);
        timings.mark(Stage::Embedding);
        let embedded = self.embedder.embed(query).await;
        timings.stop(Stage::Embedding);
        let vector = embedded.map_err(ChatError::embedding)?;
        if vector.is_empty() {
            return Err(ChatError::Retrieval {
                stage: Stage::Embedding,
                source: RetrievalCause::EmptyEmbedding,
            });
        }

        let max_context = self.settings.max_context_documents as usize;
        let k = (params.top_k as usize).min(max_context).max(1);

        cursor.enter(Stage::Retrieval);
        timings.mark(Stage::Retrieval);
        let retrieved = self.store.query(&vector, k, &filter).await;
        timings.stop(Stage::Retrieval);
        let mut matches = retrieved.map_err(ChatError::store)?;
        if matches.len() > max_context {
            debug!(
                "[{}] Store returned {} matches, keeping {}",
                request_id,
                matches.len(),
                max_context
            );
            matches.truncate(max_context);
        }

        let prompt = build_prompt(&self.system_prompt, query, &matches);

        cursor.enter(Stage::Generation);
        timings.mark(Stage::Generation);
        let generated = self.generator.generate(&prompt, &params).await;
        timings.stop(Stage::Generation);
        let generation = generated.map_err(ChatError::Generation)?;

        Ok(StageOutput {
            answer: generation.text,
            sources: matches,
            total_tokens: generation.total_tokens,
        })
    }
}

//! Application state
//!
//! Builds and shares the engine and its collaborators. External-service
//! clients, rate gates, and the prompt registry are initialized once here
//! and torn down on shutdown; there is no hot reconfiguration.

use std::sync::Arc;
use std::time::Duration;

use sodam_agents::{
    AdvisoryEngine, Evaluator, EngineDeps, FollowUpCondenser, Generator, Router,
};
use sodam_config::{PromptRegistry, RouterLexicon, Settings};
use sodam_core::{ExchangeArchive, NullArchive};
use sodam_llm::{
    ChatBackend, Embedder, EmbeddingConfig, HttpEmbedder, JudgeClient, OpenAiBackend,
    OpenAiConfig, RateGates,
};
use sodam_rag::{
    HybridRetriever, InMemoryStore, MultiDomainRetriever, QdrantStore, QdrantStoreConfig,
    QueryRewriter, RetrievalGate, VectorStore,
};

use crate::session::SessionManager;
use crate::ServerError;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub engine: Arc<AdvisoryEngine>,
    pub sessions: Arc<SessionManager>,
    pub store: Arc<dyn VectorStore>,
}

impl AppState {
    /// Wire the engine against the external services named in `settings`.
    pub async fn build(settings: Settings) -> Result<Self, ServerError> {
        let embedder: Arc<dyn Embedder> = Arc::new(
            HttpEmbedder::new(EmbeddingConfig {
                endpoint: settings.embedding.endpoint.clone(),
                api_key: settings.embedding.api_key.clone(),
                model: settings.embedding.model.clone(),
                dimension: settings.embedding.dimension,
                timeout: Duration::from_secs(settings.embedding.timeout_s),
            })
            .map_err(|e| ServerError::Init(e.to_string()))?,
        );

        let store: Arc<dyn VectorStore> = Arc::new(
            QdrantStore::new(
                QdrantStoreConfig {
                    endpoint: settings.vector_store.endpoint.clone(),
                    api_key: settings.vector_store.api_key.clone(),
                    vector_dim: settings.embedding.dimension,
                    sparse_index_dir: None,
                },
                Arc::clone(&embedder),
            )
            .await
            .map_err(|e| ServerError::Init(e.to_string()))?,
        );

        Self::build_with(settings, store, embedder, Arc::new(NullArchive))
    }

    /// Development profile: no external vector store or embedding service.
    pub fn build_in_memory(settings: Settings) -> Result<Self, ServerError> {
        let embedder: Arc<dyn Embedder> = Arc::new(sodam_rag::HashEmbedder);
        let store: Arc<dyn VectorStore> = InMemoryStore::shared();
        Self::build_with(settings, store, embedder, Arc::new(NullArchive))
    }

    /// Wire the engine with explicit store/embedder/archive collaborators.
    pub fn build_with(
        settings: Settings,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        archive: Arc<dyn ExchangeArchive>,
    ) -> Result<Self, ServerError> {
        let registry = Arc::new(PromptRegistry::default());
        let gates = RateGates::new(&settings.rate_limits);

        let llm_timeout = Duration::from_secs(settings.llm.timeout_s);
        let generation: Arc<dyn ChatBackend> = Arc::new(
            OpenAiBackend::new(OpenAiConfig {
                timeout: llm_timeout,
                ..OpenAiConfig::new(
                    settings.llm.endpoint.clone(),
                    settings.llm.api_key.clone(),
                    settings.llm.model.clone(),
                )
                .with_temperature(settings.llm.temperature)
                .with_max_tokens(settings.llm.max_tokens)
            })
            .map_err(|e| ServerError::Init(e.to_string()))?,
        );

        // The judge shares the endpoint but runs deterministic.
        let judge_backend: Arc<dyn ChatBackend> = Arc::new(
            OpenAiBackend::new(OpenAiConfig {
                timeout: llm_timeout,
                ..OpenAiConfig::new(
                    settings.llm.endpoint.clone(),
                    settings.llm.api_key.clone(),
                    settings.llm.judge_model.clone(),
                )
                .with_temperature(0.0)
            })
            .map_err(|e| ServerError::Init(e.to_string()))?,
        );

        let retriever = MultiDomainRetriever::new(
            HybridRetriever::new(
                Arc::clone(&store),
                Arc::clone(&embedder),
                gates.embedding.clone(),
                settings.retrieval.clone(),
            ),
            settings.domains.clone(),
        );

        let deps = EngineDeps {
            router: Router::new(
                RouterLexicon::default(),
                settings.router.clone(),
                settings.domains.priority.clone(),
                JudgeClient::new(Arc::clone(&judge_backend), gates.judge.clone()),
                Arc::clone(&registry),
            ),
            retriever,
            rewriter: QueryRewriter::new(
                Arc::clone(&generation),
                gates.generation.clone(),
                Arc::clone(&registry),
            ),
            gate: RetrievalGate::new(&settings.retrieval),
            generator: Generator::new(
                Arc::clone(&generation),
                gates.generation.clone(),
                Arc::clone(&registry),
            ),
            evaluator: Evaluator::new(
                JudgeClient::new(judge_backend, gates.judge.clone()),
                Arc::clone(&embedder),
                gates.embedding.clone(),
                Arc::clone(&registry),
                settings.evaluation.clone(),
            ),
            condenser: FollowUpCondenser::new(generation, gates.generation.clone(), registry),
            archive,
            config: settings.engine.clone(),
            k_context: settings.retrieval.k_context,
        };

        let sessions = Arc::new(SessionManager::new(&settings.session));

        Ok(Self {
            settings: Arc::new(settings),
            engine: Arc::new(AdvisoryEngine::new(deps)),
            sessions,
            store,
        })
    }
}

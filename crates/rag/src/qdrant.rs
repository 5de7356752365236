//! Qdrant-backed vector store
//!
//! Dense search goes to Qdrant; lexical search goes to a per-collection
//! tantivy index kept alongside. Transport failures get one transparent
//! retry, then surface as `BackendUnavailable`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use qdrant_client::{
    qdrant::{
        value::Kind, CreateCollectionBuilder, Distance, PointStruct, SearchPointsBuilder,
        UpsertPointsBuilder, VectorParamsBuilder,
    },
    Qdrant,
};

use async_trait::async_trait;
use sodam_core::{Chunk, DomainTag, SourceDescriptor};
use sodam_llm::Embedder;

use crate::sparse::{SparseConfig, SparseIndex};
use crate::store::{LexicalHit, SearchFilter, VectorHit, VectorStore};
use crate::RagError;

/// Qdrant store configuration
#[derive(Debug, Clone)]
pub struct QdrantStoreConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub vector_dim: usize,
    /// Base directory for tantivy indexes; RAM indexes when None.
    pub sparse_index_dir: Option<String>,
}

impl Default for QdrantStoreConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:6334".to_string(),
            api_key: None,
            vector_dim: 1536,
            sparse_index_dir: None,
        }
    }
}

/// Vector store backed by Qdrant plus per-collection BM25 indexes.
pub struct QdrantStore {
    client: Qdrant,
    config: QdrantStoreConfig,
    embedder: Arc<dyn Embedder>,
    sparse: RwLock<HashMap<String, Arc<SparseIndex>>>,
}

impl QdrantStore {
    pub async fn new(
        config: QdrantStoreConfig,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, RagError> {
        let mut builder = Qdrant::from_url(&config.endpoint);
        if let Some(ref api_key) = config.api_key {
            builder = builder.api_key(api_key.clone());
        }

        let client = builder
            .build()
            .map_err(|e| RagError::BackendUnavailable(e.to_string()))?;

        Ok(Self {
            client,
            config,
            embedder,
            sparse: RwLock::new(HashMap::new()),
        })
    }

    /// Create the collection if missing and open its lexical index.
    pub async fn ensure_collection(&self, collection: &str) -> Result<(), RagError> {
        let exists = self
            .client
            .collection_exists(collection)
            .await
            .map_err(|e| RagError::BackendUnavailable(e.to_string()))?;

        if !exists {
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(collection).vectors_config(
                        VectorParamsBuilder::new(self.config.vector_dim as u64, Distance::Cosine),
                    ),
                )
                .await
                .map_err(|e| RagError::BackendUnavailable(e.to_string()))?;
        }

        self.sparse_index(collection)?;
        Ok(())
    }

    fn sparse_index(&self, collection: &str) -> Result<Arc<SparseIndex>, RagError> {
        if let Some(index) = self.sparse.read().get(collection) {
            return Ok(Arc::clone(index));
        }

        let config = SparseConfig {
            index_path: self
                .config
                .sparse_index_dir
                .as_ref()
                .map(|dir| format!("{dir}/{collection}")),
        };
        let index = Arc::new(SparseIndex::new(config)?);
        self.sparse
            .write()
            .insert(collection.to_string(), Arc::clone(&index));
        Ok(index)
    }

    fn build_payload(chunk: &Chunk) -> HashMap<String, qdrant_client::qdrant::Value> {
        let mut payload: HashMap<String, qdrant_client::qdrant::Value> = HashMap::new();
        payload.insert("title".to_string(), chunk.title.clone().into());
        payload.insert("text".to_string(), chunk.text.clone().into());
        payload.insert("domain".to_string(), chunk.domain.as_str().to_string().into());
        payload.insert("origin".to_string(), chunk.source.origin.clone().into());
        if let Some(ref url) = chunk.source.url {
            payload.insert("url".to_string(), url.clone().into());
        }
        if let Some(ref path) = chunk.source.article_path {
            payload.insert("article_path".to_string(), path.clone().into());
        }
        if let Some(collected_at) = chunk.source.collected_at {
            payload.insert("collected_at".to_string(), collected_at.to_rfc3339().into());
        }
        payload
    }

    fn payload_str(
        payload: &HashMap<String, qdrant_client::qdrant::Value>,
        key: &str,
    ) -> Option<String> {
        payload.get(key).and_then(|v| match &v.kind {
            Some(Kind::StringValue(s)) => Some(s.clone()),
            _ => None,
        })
    }

    fn chunk_from_payload(
        id: String,
        payload: &HashMap<String, qdrant_client::qdrant::Value>,
    ) -> Chunk {
        let domain = Self::payload_str(payload, "domain")
            .and_then(|s| DomainTag::parse(&s))
            .unwrap_or(DomainTag::LawCommon);

        Chunk {
            id,
            domain,
            title: Self::payload_str(payload, "title").unwrap_or_default(),
            text: Self::payload_str(payload, "text").unwrap_or_default(),
            source: SourceDescriptor {
                origin: Self::payload_str(payload, "origin").unwrap_or_default(),
                url: Self::payload_str(payload, "url"),
                collected_at: Self::payload_str(payload, "collected_at")
                    .and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok())
                    .map(|dt| dt.with_timezone(&chrono::Utc)),
                article_path: Self::payload_str(payload, "article_path"),
            },
        }
    }

    /// Run a Qdrant call with one transparent retry on transport failure.
    async fn with_retry<T, F, Fut>(&self, op: F) -> Result<T, RagError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, qdrant_client::QdrantError>>,
    {
        match op().await {
            Ok(value) => Ok(value),
            Err(first) => {
                tracing::warn!(error = %first, "qdrant call failed, reconnecting once");
                op().await
                    .map_err(|e| RagError::BackendUnavailable(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn upsert(&self, collection: &str, chunks: &[Chunk]) -> Result<(), RagError> {
        if chunks.is_empty() {
            return Ok(());
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embedder.embed(&texts).await?;

        let points: Vec<PointStruct> = chunks
            .iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| {
                PointStruct::new(chunk.id.clone(), embedding, Self::build_payload(chunk))
            })
            .collect();

        self.with_retry(|| {
            let points = points.clone();
            async move {
                self.client
                    .upsert_points(UpsertPointsBuilder::new(collection, points))
                    .await
            }
        })
        .await?;

        // Keep the lexical side in step with the dense side.
        let index = self.sparse_index(collection)?;
        let owned: Vec<Chunk> = chunks.to_vec();
        tokio::task::spawn_blocking(move || index.add_chunks(&owned))
            .await
            .map_err(|e| RagError::Index(format!("index task failed: {e}")))??;

        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        query_vector: &[f32],
        k: usize,
        filter: Option<SearchFilter>,
    ) -> Result<Vec<VectorHit>, RagError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let response = self
            .with_retry(|| {
                let mut builder =
                    SearchPointsBuilder::new(collection, query_vector.to_vec(), k as u64)
                        .with_payload(true);
                if let Some(ref f) = filter {
                    if let Some(ref origin) = f.origin {
                        builder = builder.filter(qdrant_client::qdrant::Filter::must([
                            qdrant_client::qdrant::Condition::matches(
                                "origin",
                                origin.to_string(),
                            ),
                        ]));
                    }
                }
                self.client.search_points(builder)
            })
            .await?;

        let hits = response
            .result
            .into_iter()
            .map(|point| {
                let id = point
                    .id
                    .and_then(|pid| pid.point_id_options)
                    .map(|options| match options {
                        qdrant_client::qdrant::point_id::PointIdOptions::Uuid(u) => u,
                        qdrant_client::qdrant::point_id::PointIdOptions::Num(n) => n.to_string(),
                    })
                    .unwrap_or_default();
                VectorHit {
                    chunk: Self::chunk_from_payload(id, &point.payload),
                    score: point.score,
                }
            })
            .collect();

        Ok(hits)
    }

    async fn lexical_query(
        &self,
        collection: &str,
        text: &str,
        k: usize,
    ) -> Result<Vec<LexicalHit>, RagError> {
        let index = self.sparse_index(collection)?;
        let query = text.to_string();

        let results = tokio::task::spawn_blocking(move || index.search(&query, k))
            .await
            .map_err(|e| RagError::Search(format!("search task failed: {e}")))??;

        Ok(results
            .into_iter()
            .map(|(chunk, score)| LexicalHit { chunk, score })
            .collect())
    }

    async fn count(&self, collection: &str) -> Result<u64, RagError> {
        let info = self
            .with_retry(|| self.client.collection_info(collection))
            .await?;

        Ok(info
            .result
            .and_then(|r| r.points_count)
            .unwrap_or_default())
    }
}

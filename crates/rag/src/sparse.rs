//! Lexical search using Tantivy (BM25)
//!
//! One index per collection, over the same chunks the dense side stores.
//! Korean text is tokenized by unicode word boundaries; no stemmer is
//! applied. Search runs under `spawn_blocking` in the caller.

use parking_lot::Mutex;
use std::path::Path;
use tantivy::{
    collector::TopDocs,
    query::QueryParser,
    schema::{Field, OwnedValue, Schema, TextFieldIndexing, TextOptions, STORED},
    tokenizer::{LowerCaser, RemoveLongFilter, SimpleTokenizer, TextAnalyzer},
    Index, IndexReader, IndexWriter, TantivyDocument,
};

use sodam_core::Chunk;

use crate::RagError;

const TOKENIZER_NAME: &str = "ko_simple";
const WRITER_HEAP_BYTES: usize = 32_000_000;

/// Sparse index configuration
#[derive(Debug, Clone)]
pub struct SparseConfig {
    /// Index directory; RAM index when None.
    pub index_path: Option<String>,
}

impl Default for SparseConfig {
    fn default() -> Self {
        Self { index_path: None }
    }
}

/// BM25 index over one collection.
pub struct SparseIndex {
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    title_field: Field,
    text_field: Field,
    chunk_field: Field,
}

impl SparseIndex {
    pub fn new(config: SparseConfig) -> Result<Self, RagError> {
        let mut schema_builder = Schema::builder();

        let indexing = TextFieldIndexing::default()
            .set_tokenizer(TOKENIZER_NAME)
            .set_index_option(tantivy::schema::IndexRecordOption::WithFreqsAndPositions);
        let text_options = TextOptions::default().set_indexing_options(indexing);

        let title_field = schema_builder.add_text_field("title", text_options.clone());
        let text_field = schema_builder.add_text_field("text", text_options);
        // Serialized chunk payload; stored only, never searched.
        let chunk_field = schema_builder.add_text_field("chunk", STORED);

        let schema = schema_builder.build();

        let index = match &config.index_path {
            Some(path) => {
                let dir = Path::new(path);
                std::fs::create_dir_all(dir)
                    .map_err(|e| RagError::Index(format!("create index dir: {e}")))?;
                Index::open_or_create(
                    tantivy::directory::MmapDirectory::open(dir)
                        .map_err(|e| RagError::Index(e.to_string()))?,
                    schema,
                )
                .map_err(|e| RagError::Index(e.to_string()))?
            }
            None => Index::create_in_ram(schema),
        };

        let analyzer = TextAnalyzer::builder(SimpleTokenizer::default())
            .filter(RemoveLongFilter::limit(40))
            .filter(LowerCaser)
            .build();
        index.tokenizers().register(TOKENIZER_NAME, analyzer);

        let writer = index
            .writer(WRITER_HEAP_BYTES)
            .map_err(|e| RagError::Index(e.to_string()))?;

        let reader = index
            .reader()
            .map_err(|e| RagError::Index(e.to_string()))?;

        Ok(Self {
            index,
            reader,
            writer: Mutex::new(writer),
            title_field,
            text_field,
            chunk_field,
        })
    }

    /// Add chunks and commit.
    pub fn add_chunks(&self, chunks: &[Chunk]) -> Result<(), RagError> {
        {
            let mut writer = self.writer.lock();
            for chunk in chunks {
                let payload = serde_json::to_string(chunk)
                    .map_err(|e| RagError::Index(format!("serialize chunk: {e}")))?;
                let mut doc = TantivyDocument::default();
                doc.add_text(self.title_field, &chunk.title);
                doc.add_text(self.text_field, &chunk.text);
                doc.add_text(self.chunk_field, &payload);
                writer
                    .add_document(doc)
                    .map_err(|e| RagError::Index(e.to_string()))?;
            }
            writer.commit().map_err(|e| RagError::Index(e.to_string()))?;
        }
        self.reader.reload().map_err(|e| RagError::Index(e.to_string()))?;
        Ok(())
    }

    /// BM25 search over title and body.
    pub fn search(&self, query: &str, k: usize) -> Result<Vec<(Chunk, f32)>, RagError> {
        if query.trim().is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let searcher = self.reader.searcher();
        let parser = QueryParser::for_index(&self.index, vec![self.title_field, self.text_field]);
        // Lenient parsing: user text may contain query-syntax characters.
        let (parsed, _errors) = parser.parse_query_lenient(query);

        let top_docs = searcher
            .search(&parsed, &TopDocs::with_limit(k))
            .map_err(|e| RagError::Search(e.to_string()))?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let doc: TantivyDocument = searcher
                .doc(address)
                .map_err(|e| RagError::Search(e.to_string()))?;
            let Some(OwnedValue::Str(payload)) = doc.get_first(self.chunk_field) else {
                continue;
            };
            let chunk: Chunk = serde_json::from_str(payload)
                .map_err(|e| RagError::Search(format!("deserialize chunk: {e}")))?;
            results.push((chunk, score));
        }

        Ok(results)
    }

    pub fn num_docs(&self) -> u64 {
        self.reader.searcher().num_docs()
    }
}

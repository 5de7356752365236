//! Context assembly
//!
//! Builds the provenance-tagged block handed to the Generator. Every
//! citable sentence must trace back to exactly one chunk present here; the
//! bundle therefore retains the ordered chunk list alongside the rendered
//! text.

use sodam_core::{Chunk, ScoredChunk, SourceReference};

const SEPARATOR: &str = "\n---\n";

/// The assembled Generator context.
#[derive(Debug, Clone)]
pub struct ContextBundle {
    chunks: Vec<Chunk>,
    rendered: String,
}

impl ContextBundle {
    /// Take the top `k_context` chunks, in merged order, and render them
    /// with `[근거 N]` provenance markers.
    pub fn assemble(merged: &[ScoredChunk], k_context: usize) -> Self {
        let chunks: Vec<Chunk> = merged
            .iter()
            .take(k_context)
            .map(|c| c.chunk.clone())
            .collect();

        let rendered = chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| {
                let mut header = format!("[근거 {}] {}", i + 1, chunk.title);
                if !chunk.source.origin.is_empty() {
                    header.push_str(&format!(" ({})", chunk.source.origin));
                }
                if let Some(ref path) = chunk.source.article_path {
                    header.push_str(&format!(" - {path}"));
                }
                format!("{header}\n{}", chunk.text)
            })
            .collect::<Vec<_>>()
            .join(SEPARATOR);

        Self { chunks, rendered }
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn rendered(&self) -> &str {
        &self.rendered
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Ordered ids, as recorded in `EvaluationRecord.retrieved_chunk_ids`.
    pub fn chunk_ids(&self) -> Vec<String> {
        self.chunks.iter().map(|c| c.id.clone()).collect()
    }

    /// Resolve a 1-based `[근거 N]` marker to its chunk.
    pub fn chunk_by_marker(&self, n: usize) -> Option<&Chunk> {
        if n == 0 {
            return None;
        }
        self.chunks.get(n - 1)
    }

    /// Source reference for a 1-based marker.
    pub fn source_by_marker(&self, n: usize) -> Option<SourceReference> {
        self.chunk_by_marker(n).map(|chunk| SourceReference {
            chunk_id: chunk.id.clone(),
            title: chunk.title.clone(),
            url: chunk.source.url.clone(),
            origin: chunk.source.origin.clone(),
        })
    }
}

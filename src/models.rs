//! Core data models used throughout the pipeline.
//!
//! These types represent the pages, chunks, and scored results that flow
//! through ingestion and retrieval.

use serde::Serialize;

use crate::tenant::TenantId;

/// Metadata carried from a source page onto every chunk cut from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageMetadata {
    pub page_number: u32,
    pub tenant_id: TenantId,
}

/// Text extracted from one page of an uploaded document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRecord {
    /// 1-based page number in source order.
    pub page_number: u32,
    pub text: String,
    pub tenant_id: TenantId,
}

impl PageRecord {
    pub fn metadata(&self) -> PageMetadata {
        PageMetadata {
            page_number: self.page_number,
            tenant_id: self.tenant_id.clone(),
        }
    }
}

/// A retrievable slice of one page's text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRecord {
    pub text: String,
    /// Character offset of `text` within the page text.
    pub start_offset: usize,
    pub metadata: PageMetadata,
}

/// A chunk returned from a similarity query.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub text: String,
    pub page_number: u32,
    pub start_offset: usize,
    /// Relevance of the chunk to the query, at most `1.0`; see
    /// [`crate::embedding::relevance_score`].
    pub score: f32,
}

/// Outcome of a successful upload.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub tenant_id: TenantId,
    pub filename: String,
    pub pages: usize,
    pub chunks: usize,
}

/// A grounded answer and the chunks it was generated from.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    /// Grounding context exactly as it was given to the generator.
    pub context: String,
    pub sources: Vec<ScoredChunk>,
}

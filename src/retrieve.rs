//! Similarity retrieval with a relevance gate.
//!
//! The gate only looks at the best-ranked result: if it scores below the
//! configured threshold, is not a finite number, or there are no results at
//! all, the query is a miss. Lower-ranked results are passed through unfiltered.

use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::error::{RagError, Result};
use crate::models::ScoredChunk;
use crate::store::TenantIndexStore;
use crate::tenant::TenantId;

/// Separator placed between chunk texts in the grounding context.
pub const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// Accepted retrieval output.
#[derive(Debug, Clone)]
pub struct Retrieved {
    pub context: String,
    pub chunks: Vec<ScoredChunk>,
}

pub struct Retriever {
    store: Arc<TenantIndexStore>,
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(store: Arc<TenantIndexStore>, config: RetrievalConfig) -> Self {
        Self { store, config }
    }

    pub async fn retrieve(&self, tenant: &TenantId, question: &str) -> Result<Retrieved> {
        let results = self.store.query(tenant, question, self.config.k).await?;
        let accepted = accept(results, self.config.relevance_threshold);
        if let Err(RagError::RetrievalMiss { best_score }) = &accepted {
            tracing::info!(tenant = %tenant, best_score = ?best_score, "no relevant chunks");
        }
        accepted
    }
}

/// Apply the relevance gate to ranked results and build the context.
pub fn accept(results: Vec<ScoredChunk>, threshold: f32) -> Result<Retrieved> {
    match results.first() {
        None => return Err(RagError::RetrievalMiss { best_score: None }),
        Some(top) if !top.score.is_finite() || top.score < threshold => {
            return Err(RagError::RetrievalMiss {
                best_score: Some(top.score),
            })
        }
        Some(_) => {}
    }

    let context = results
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR);

    Ok(Retrieved {
        context,
        chunks: results,
    })
}

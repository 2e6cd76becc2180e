//! Error taxonomy for the ingestion and query pipeline.
//!
//! Every failure of an external collaborator (document parser, embedding
//! model, index storage, generation model) is converted into one of the
//! [`RagError`] variants at the boundary of the operation that invoked it.
//! Callers render [`RagError::user_message`] and branch on
//! [`RagError::kind`], which keeps "no data for this tenant", "data exists
//! but does not answer the question", and "something went wrong" apart.

use thiserror::Error;

/// Result alias used by the core pipeline.
pub type Result<T, E = RagError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum RagError {
    /// The upload is not a readable document of a supported format.
    #[error("invalid document: {0}")]
    Load(String),

    /// Embedding or storage failed while rebuilding a tenant index.
    #[error("index build failed for tenant '{tenant}': {message}")]
    IndexBuild { tenant: String, message: String },

    /// The tenant has no persisted index.
    #[error("no index found for tenant '{0}'")]
    NotFound(String),

    /// The index exists but nothing cleared the relevance threshold.
    #[error("no result above relevance threshold (best score: {best_score:?})")]
    RetrievalMiss { best_score: Option<f32> },

    /// Query-side embedding or index read failed.
    #[error("retrieval failed for tenant '{tenant}': {message}")]
    Retrieval { tenant: String, message: String },

    /// Tenant storage could not be read or removed.
    #[error("storage error for tenant '{tenant}': {message}")]
    Storage { tenant: String, message: String },

    /// The text-generation call failed or timed out.
    #[error("generation failed: {0}")]
    Generation(String),

    #[error("invalid tenant id '{0}': expected 1-64 characters of [A-Za-z0-9_-]")]
    InvalidTenant(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl RagError {
    pub fn index_build(tenant: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::IndexBuild {
            tenant: tenant.into(),
            message: message.to_string(),
        }
    }

    pub fn retrieval(tenant: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Retrieval {
            tenant: tenant.into(),
            message: message.to_string(),
        }
    }

    pub fn storage(tenant: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Storage {
            tenant: tenant.into(),
            message: message.to_string(),
        }
    }

    /// Stable machine-readable code, also used as the HTTP error code.
    pub fn kind(&self) -> &'static str {
        match self {
            RagError::Load(_) => "invalid_file",
            RagError::IndexBuild { .. } => "upload_failed",
            RagError::NotFound(_) => "no_database",
            RagError::RetrievalMiss { .. } => "no_match",
            RagError::Retrieval { .. } | RagError::Generation(_) => "processing_error",
            RagError::Storage { .. } => "storage_error",
            RagError::InvalidTenant(_) => "invalid_tenant",
            RagError::InvalidRequest(_) => "invalid_request",
        }
    }

    /// Message suitable for showing to the end user of a chat integration.
    pub fn user_message(&self) -> String {
        match self {
            RagError::Load(_) => "Please upload a valid PDF file.".to_string(),
            RagError::IndexBuild { .. } => {
                "Error uploading file. The document could not be indexed; please upload it again."
                    .to_string()
            }
            RagError::NotFound(_) => "No database found for this tenant. \
                 Please upload a PDF to create a database first."
                .to_string(),
            RagError::RetrievalMiss { .. } => "Unable to find matching results.".to_string(),
            RagError::Retrieval { .. } | RagError::Generation(_) => {
                "Error processing query. Please try again later.".to_string()
            }
            RagError::Storage { .. } => {
                "Error accessing tenant data. Please try again later.".to_string()
            }
            RagError::InvalidTenant(_) | RagError::InvalidRequest(_) => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miss_and_not_found_are_distinct() {
        let miss = RagError::RetrievalMiss {
            best_score: Some(0.1),
        };
        let missing = RagError::NotFound("t1".into());
        assert_ne!(miss.kind(), missing.kind());
        assert_ne!(miss.user_message(), missing.user_message());
    }

    #[test]
    fn external_failures_share_generic_message() {
        let gen = RagError::Generation("timeout".into());
        let ret = RagError::retrieval("t1", "embedding timed out");
        assert_eq!(gen.kind(), "processing_error");
        assert_eq!(gen.user_message(), ret.user_message());
        assert!(!gen.user_message().contains("timeout"));
    }

    #[test]
    fn index_build_names_tenant() {
        let err = RagError::index_build("guild-42", "disk full");
        assert_eq!(err.kind(), "upload_failed");
        assert!(err.to_string().contains("guild-42"));
        assert!(err.to_string().contains("disk full"));
    }
}

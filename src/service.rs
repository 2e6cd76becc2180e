//! End-to-end ingestion and question answering for tenants.
//!
//! [`RagService`] wires the loader, chunker, tenant index store, retriever
//! and answer generator together. It is the single entry point used by both
//! the CLI and the HTTP server, and it is the boundary at which every
//! failure has already been converted into a [`RagError`].
//!
//! # Ingestion
//!
//! ```text
//! bytes ─► validate ─► lock tenant ─► load pages ─► chunk ─► rebuild index
//! ```
//!
//! The tenant's write lock is taken before parsing, so uploads for one
//! tenant are applied in the order they were submitted and the last one
//! submitted is the corpus that remains.
//!
//! # Asking
//!
//! ```text
//! question ─► query index ─► relevance gate ─► generate answer
//! ```
//!
//! Retrieval misses and missing indexes stop the flow before the
//! generation model is called.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::chunk::Chunker;
use crate::config::Config;
use crate::embedding::{self, EmbeddingProvider};
use crate::error::{RagError, Result};
use crate::generate::{AnswerGenerator, ChatModel, OpenAiCompatibleChat};
use crate::loader::{self, DocumentFormat};
use crate::models::{Answer, IngestReport};
use crate::retrieve::Retriever;
use crate::store::{IndexManifest, SourceDocument, TenantIndexStore};
use crate::tenant::TenantId;

/// What is stored for a tenant right now.
#[derive(Debug, Clone, Serialize)]
pub struct TenantStatus {
    pub tenant_id: TenantId,
    pub has_corpus: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<IndexManifest>,
}

pub struct RagService {
    store: Arc<TenantIndexStore>,
    chunker: Chunker,
    retriever: Retriever,
    generator: AnswerGenerator,
    max_upload_bytes: usize,
    generation_timeout: Duration,
}

impl RagService {
    /// Assemble the service from explicit collaborators.
    pub fn new(
        config: &Config,
        embedder: Arc<dyn EmbeddingProvider>,
        chat: Arc<dyn ChatModel>,
    ) -> Self {
        let store = Arc::new(TenantIndexStore::from_config(config, embedder));
        Self {
            retriever: Retriever::new(store.clone(), config.retrieval),
            store,
            chunker: Chunker::new(config.chunking),
            generator: AnswerGenerator::new(chat),
            max_upload_bytes: config.storage.max_upload_bytes,
            generation_timeout: Duration::from_secs(config.generation.timeout_secs),
        }
    }

    /// Build the configured embedding provider and chat client.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let embedder = embedding::create_provider(&config.embedding)?;
        let chat = Arc::new(OpenAiCompatibleChat::new(&config.generation)?);
        Ok(Self::new(config, embedder, chat))
    }

    pub fn store(&self) -> &TenantIndexStore {
        &self.store
    }

    /// Replace `tenant`'s corpus with the contents of an uploaded document.
    pub async fn ingest(
        &self,
        tenant: &TenantId,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<IngestReport> {
        if bytes.len() > self.max_upload_bytes {
            return Err(RagError::Load(format!(
                "file is {} bytes; the limit is {} bytes",
                bytes.len(),
                self.max_upload_bytes
            )));
        }
        if DocumentFormat::from_filename(filename).is_none() {
            return Err(RagError::Load(format!("unsupported file type: {}", filename)));
        }

        let sha256 = format!("{:x}", Sha256::digest(&bytes));
        let guard = self.store.lock(tenant).await;

        let pages = {
            let filename = filename.to_string();
            let tenant = tenant.clone();
            tokio::task::spawn_blocking(move || loader::load_pages(&bytes, &filename, &tenant))
                .await
                .map_err(|e| RagError::Load(format!("document loader failed: {}", e)))??
        };
        let chunks = self.chunker.chunk_pages(&pages);

        let source = SourceDocument {
            filename: filename.to_string(),
            sha256,
            pages: pages.len(),
        };
        let manifest = self.store.rebuild(&guard, &chunks, &source).await?;

        Ok(IngestReport {
            tenant_id: tenant.clone(),
            filename: manifest.source_filename,
            pages: manifest.pages,
            chunks: manifest.chunks,
        })
    }

    /// Answer `question` from `tenant`'s corpus.
    pub async fn ask(&self, tenant: &TenantId, question: &str) -> Result<Answer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::InvalidRequest("question must not be empty".into()));
        }

        let retrieved = self.retriever.retrieve(tenant, question).await?;

        let text = tokio::time::timeout(
            self.generation_timeout,
            self.generator.generate(&retrieved.context, question),
        )
        .await
        .map_err(|_| {
            RagError::Generation(format!(
                "timed out after {}s",
                self.generation_timeout.as_secs()
            ))
        })?
        .map_err(|e| {
            tracing::error!(tenant = %tenant, error = ?e, "answer generation failed");
            RagError::Generation(format!("{e:#}"))
        })?;

        Ok(Answer {
            text,
            context: retrieved.context,
            sources: retrieved.chunks,
        })
    }

    /// Delete everything stored for `tenant`. Safe to call repeatedly.
    pub async fn remove_tenant(&self, tenant: &TenantId) -> Result<()> {
        let guard = self.store.lock(tenant).await;
        self.store.destroy(&guard).await
    }

    pub async fn status(&self, tenant: &TenantId) -> Result<TenantStatus> {
        let index = self.store.manifest(tenant).await?;
        Ok(TenantStatus {
            tenant_id: tenant.clone(),
            has_corpus: index.is_some(),
            index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ConstantEmbedder;

    #[async_trait]
    impl EmbeddingProvider for ConstantEmbedder {
        fn model_name(&self) -> &str {
            "constant"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    struct CountingChat {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChatModel for CountingChat {
        async fn complete(&self, _prompt: &str) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("ok".into())
        }
    }

    fn service(root: &std::path::Path, max_upload_bytes: usize) -> (RagService, Arc<CountingChat>) {
        let mut config = Config::default();
        config.storage.root = root.to_path_buf();
        config.storage.max_upload_bytes = max_upload_bytes;
        let chat = Arc::new(CountingChat {
            calls: AtomicUsize::new(0),
        });
        let svc = RagService::new(&config, Arc::new(ConstantEmbedder), chat.clone());
        (svc, chat)
    }

    #[tokio::test]
    async fn oversized_upload_is_invalid_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (svc, _) = service(tmp.path(), 8);
        let t1 = TenantId::new("T1").unwrap();
        let err = svc.ingest(&t1, "doc.pdf", vec![0; 9]).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_file");
        assert!(!svc.store().exists(&t1).await);
    }

    #[tokio::test]
    async fn unsupported_extension_is_invalid_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (svc, _) = service(tmp.path(), 1024);
        let t1 = TenantId::new("T1").unwrap();
        let err = svc.ingest(&t1, "notes.txt", b"hello".to_vec()).await.unwrap_err();
        assert!(matches!(err, RagError::Load(_)));
    }

    #[tokio::test]
    async fn failed_parse_keeps_previous_state() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (svc, _) = service(tmp.path(), 1024);
        let t1 = TenantId::new("T1").unwrap();
        let err = svc.ingest(&t1, "doc.pdf", b"garbage".to_vec()).await.unwrap_err();
        assert!(matches!(err, RagError::Load(_)));
        assert!(!svc.status(&t1).await.unwrap().has_corpus);
    }

    #[tokio::test]
    async fn blank_question_is_rejected_before_retrieval() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (svc, chat) = service(tmp.path(), 1024);
        let t1 = TenantId::new("T1").unwrap();
        let err = svc.ask(&t1, "   ").await.unwrap_err();
        assert!(matches!(err, RagError::InvalidRequest(_)));
        assert_eq!(chat.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_tenant_status_and_removal() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (svc, chat) = service(tmp.path(), 1024);
        let t2 = TenantId::new("T2").unwrap();

        let status = svc.status(&t2).await.unwrap();
        assert!(!status.has_corpus);
        assert!(status.index.is_none());

        assert!(matches!(
            svc.ask(&t2, "anything?").await,
            Err(RagError::NotFound(_))
        ));
        assert_eq!(chat.calls.load(Ordering::SeqCst), 0);

        svc.remove_tenant(&t2).await.unwrap();
    }
}

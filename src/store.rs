//! Per-tenant vector index storage.
//!
//! Each tenant's corpus lives in its own SQLite file (see [`crate::tenant`]
//! for the layout). A rebuild embeds every chunk, writes a complete index
//! under a staging name, and renames it over the current index. Readers
//! therefore observe either the previous corpus or the new one in full.
//!
//! # Query
//!
//! Queries open the index read-only, embed the query text with the shared
//! provider, and score every stored vector by its relevance to the query
//! ([`relevance_score`] of the cosine similarity). Results are ranked by
//! descending score; equal scores keep corpus order.
//!
//! # Manifest
//!
//! Every index records the embedding model and dimensionality that built
//! it, alongside the source document's name, SHA-256, and counts. A query
//! against an index built by a different model is refused.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::embedding::{
    self, blob_to_vec, cosine_similarity, relevance_score, vec_to_blob, EmbeddingProvider,
};
use crate::error::{RagError, Result};
use crate::models::{ChunkRecord, ScoredChunk};
use crate::tenant::{index_path, staging_path, tenant_dir, TenantId, TenantLocks, TenantWriteGuard};

const DEFAULT_BATCH_SIZE: usize = 64;
const DEFAULT_EMBED_TIMEOUT: Duration = Duration::from_secs(60);

/// Description of the uploaded document an index is built from.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub filename: String,
    pub sha256: String,
    pub pages: usize,
}

/// Metadata persisted inside every tenant index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexManifest {
    pub tenant_id: String,
    pub model: String,
    pub dims: usize,
    pub source_filename: String,
    pub document_sha256: String,
    pub pages: usize,
    pub chunks: usize,
    pub built_at: DateTime<Utc>,
}

impl IndexManifest {
    fn entries(&self) -> Vec<(&'static str, String)> {
        vec![
            ("tenant_id", self.tenant_id.clone()),
            ("model", self.model.clone()),
            ("dims", self.dims.to_string()),
            ("source_filename", self.source_filename.clone()),
            ("document_sha256", self.document_sha256.clone()),
            ("pages", self.pages.to_string()),
            ("chunks", self.chunks.to_string()),
            ("built_at", self.built_at.to_rfc3339()),
        ]
    }

    fn from_entries(mut entries: HashMap<String, String>) -> anyhow::Result<Self> {
        let mut take = |key: &str| {
            entries
                .remove(key)
                .ok_or_else(|| anyhow!("index manifest is missing '{}'", key))
        };
        Ok(Self {
            tenant_id: take("tenant_id")?,
            model: take("model")?,
            dims: take("dims")?.parse().context("invalid manifest dims")?,
            source_filename: take("source_filename")?,
            document_sha256: take("document_sha256")?,
            pages: take("pages")?.parse().context("invalid manifest pages")?,
            chunks: take("chunks")?.parse().context("invalid manifest chunks")?,
            built_at: DateTime::parse_from_rfc3339(&take("built_at")?)
                .context("invalid manifest built_at")?
                .with_timezone(&Utc),
        })
    }
}

/// Owner of every tenant index under one storage root.
pub struct TenantIndexStore {
    root: PathBuf,
    embedder: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    embed_timeout: Duration,
    locks: TenantLocks,
}

impl TenantIndexStore {
    pub fn new(root: impl Into<PathBuf>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            root: root.into(),
            embedder,
            batch_size: DEFAULT_BATCH_SIZE,
            embed_timeout: DEFAULT_EMBED_TIMEOUT,
            locks: TenantLocks::new(),
        }
    }

    pub fn from_config(config: &Config, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self::new(config.storage.root.clone(), embedder)
            .with_batch_size(config.embedding.batch_size)
            .with_embed_timeout(Duration::from_secs(config.embedding.timeout_secs))
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Upper bound on each embedding call made by `rebuild` and `query`.
    pub fn with_embed_timeout(mut self, timeout: Duration) -> Self {
        self.embed_timeout = timeout;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn embedder(&self) -> &dyn EmbeddingProvider {
        self.embedder.as_ref()
    }

    /// Wait for exclusive write access to `tenant`. Required by
    /// [`rebuild`](Self::rebuild) and [`destroy`](Self::destroy).
    pub async fn lock(&self, tenant: &TenantId) -> TenantWriteGuard {
        self.locks.acquire(tenant).await
    }

    /// Whether `tenant` currently has a complete index.
    pub async fn exists(&self, tenant: &TenantId) -> bool {
        tokio::fs::try_exists(index_path(&self.root, tenant))
            .await
            .unwrap_or(false)
    }

    /// Replace the guarded tenant's corpus with `chunks`.
    ///
    /// On failure the previous index, if any, is left untouched.
    pub async fn rebuild(
        &self,
        guard: &TenantWriteGuard,
        chunks: &[ChunkRecord],
        source: &SourceDocument,
    ) -> Result<IndexManifest> {
        let tenant = guard.tenant();
        tracing::info!(
            tenant = %tenant,
            chunks = chunks.len(),
            filename = %source.filename,
            "rebuilding index"
        );

        let staging = staging_path(&self.root, tenant);
        let manifest = match self.build_staging(tenant, &staging, chunks, source).await {
            Ok(manifest) => manifest,
            Err(e) => {
                remove_staging(&staging).await;
                tracing::error!(tenant = %tenant, error = ?e, "index rebuild failed");
                return Err(RagError::index_build(tenant.as_str(), format!("{e:#}")));
            }
        };

        if let Err(e) = tokio::fs::rename(&staging, index_path(&self.root, tenant)).await {
            remove_staging(&staging).await;
            tracing::error!(tenant = %tenant, error = %e, "failed to publish rebuilt index");
            return Err(RagError::index_build(
                tenant.as_str(),
                format!("failed to publish index: {}", e),
            ));
        }

        tracing::info!(
            tenant = %tenant,
            chunks = manifest.chunks,
            model = %manifest.model,
            "index rebuilt"
        );
        Ok(manifest)
    }

    async fn build_staging(
        &self,
        tenant: &TenantId,
        staging: &Path,
        chunks: &[ChunkRecord],
        source: &SourceDocument,
    ) -> anyhow::Result<IndexManifest> {
        if let Some(foreign) = chunks.iter().find(|c| &c.metadata.tenant_id != tenant) {
            bail!(
                "chunk belongs to tenant '{}', not '{}'",
                foreign.metadata.tenant_id,
                tenant
            );
        }

        let vectors = self.embed_chunks(chunks).await?;
        let manifest = IndexManifest {
            tenant_id: tenant.to_string(),
            model: self.embedder.model_name().to_string(),
            dims: self.embedder.dims(),
            source_filename: source.filename.clone(),
            document_sha256: source.sha256.clone(),
            pages: source.pages,
            chunks: chunks.len(),
            built_at: Utc::now(),
        };

        let pool = db::connect_for_build(staging).await?;
        let written = write_index(&pool, chunks, &vectors, &manifest).await;
        pool.close().await;
        written?;

        Ok(manifest)
    }

    async fn embed_chunks(&self, chunks: &[ChunkRecord]) -> anyhow::Result<Vec<Vec<f32>>> {
        let dims = self.embedder.dims();
        let mut vectors = Vec::with_capacity(chunks.len());

        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let embedded = tokio::time::timeout(self.embed_timeout, self.embedder.embed(&texts))
                .await
                .map_err(|_| {
                    anyhow!(
                        "embedding timed out after {}s",
                        self.embed_timeout.as_secs_f32()
                    )
                })??;

            if embedded.len() != texts.len() {
                bail!(
                    "embedding provider returned {} vectors for {} texts",
                    embedded.len(),
                    texts.len()
                );
            }
            for vector in embedded {
                if vector.len() != dims {
                    bail!(
                        "embedding dimension mismatch: expected {}, got {}",
                        dims,
                        vector.len()
                    );
                }
                vectors.push(vector);
            }
        }

        Ok(vectors)
    }

    /// Return the `k` chunks of `tenant`'s corpus most similar to `query_text`.
    pub async fn query(
        &self,
        tenant: &TenantId,
        query_text: &str,
        k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        if !self.exists(tenant).await {
            return Err(RagError::NotFound(tenant.to_string()));
        }

        let pool = match db::connect_read_only(&index_path(&self.root, tenant)).await {
            Ok(pool) => pool,
            Err(e) => {
                // Removed between the existence check and the open.
                if !self.exists(tenant).await {
                    return Err(RagError::NotFound(tenant.to_string()));
                }
                return Err(RagError::retrieval(tenant.as_str(), format!("{e:#}")));
            }
        };

        let result = self.query_pool(&pool, query_text, k).await;
        pool.close().await;
        result.map_err(|e| RagError::retrieval(tenant.as_str(), format!("{e:#}")))
    }

    async fn query_pool(
        &self,
        pool: &SqlitePool,
        query_text: &str,
        k: usize,
    ) -> anyhow::Result<Vec<ScoredChunk>> {
        let manifest = read_manifest(pool).await?;
        if manifest.model != self.embedder.model_name() {
            bail!(
                "index was built with embedding model '{}' but '{}' is configured; upload the document again",
                manifest.model,
                self.embedder.model_name()
            );
        }

        let query_vec = tokio::time::timeout(
            self.embed_timeout,
            embedding::embed_query(self.embedder.as_ref(), query_text),
        )
        .await
        .map_err(|_| {
            anyhow!(
                "query embedding timed out after {}s",
                self.embed_timeout.as_secs_f32()
            )
        })??;

        let rows = sqlx::query(
            r#"
            SELECT chunk_index, page_number, start_offset, text, embedding
            FROM chunks
            "#,
        )
        .fetch_all(pool)
        .await?;

        let mut scored: Vec<(i64, ScoredChunk)> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let score = relevance_score(cosine_similarity(&query_vec, &blob_to_vec(&blob)));
                let chunk_index: i64 = row.get("chunk_index");
                let page_number: i64 = row.get("page_number");
                let start_offset: i64 = row.get("start_offset");
                (
                    chunk_index,
                    ScoredChunk {
                        text: row.get("text"),
                        page_number: page_number as u32,
                        start_offset: start_offset as usize,
                        score,
                    },
                )
            })
            .collect();

        scored.sort_by(|(ia, a), (ib, b)| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(ia.cmp(ib))
        });
        scored.truncate(k);

        Ok(scored.into_iter().map(|(_, chunk)| chunk).collect())
    }

    /// Remove everything stored for the guarded tenant. Succeeds when
    /// nothing exists.
    pub async fn destroy(&self, guard: &TenantWriteGuard) -> Result<()> {
        let tenant = guard.tenant();
        match tokio::fs::remove_dir_all(tenant_dir(&self.root, tenant)).await {
            Ok(()) => {
                tracing::info!(tenant = %tenant, "tenant storage removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(tenant = %tenant, "no tenant storage to remove");
                Ok(())
            }
            Err(e) => {
                tracing::error!(tenant = %tenant, error = %e, "failed to remove tenant storage");
                Err(RagError::storage(tenant.as_str(), e))
            }
        }
    }

    /// Read the manifest of `tenant`'s current index, if there is one.
    pub async fn manifest(&self, tenant: &TenantId) -> Result<Option<IndexManifest>> {
        if !self.exists(tenant).await {
            return Ok(None);
        }
        let pool = db::connect_read_only(&index_path(&self.root, tenant))
            .await
            .map_err(|e| RagError::storage(tenant.as_str(), format!("{e:#}")))?;
        let manifest = read_manifest(&pool).await;
        pool.close().await;
        manifest
            .map(Some)
            .map_err(|e| RagError::storage(tenant.as_str(), format!("{e:#}")))
    }
}

async fn write_index(
    pool: &SqlitePool,
    chunks: &[ChunkRecord],
    vectors: &[Vec<f32>],
    manifest: &IndexManifest,
) -> anyhow::Result<()> {
    db::create_schema(pool).await?;

    let mut tx = pool.begin().await?;
    for (i, (chunk, vector)) in chunks.iter().zip(vectors).enumerate() {
        let hash = format!("{:x}", Sha256::digest(chunk.text.as_bytes()));
        sqlx::query(
            r#"
            INSERT INTO chunks (id, chunk_index, page_number, start_offset, text, hash, embedding)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(i as i64)
        .bind(chunk.metadata.page_number as i64)
        .bind(chunk.start_offset as i64)
        .bind(&chunk.text)
        .bind(&hash)
        .bind(vec_to_blob(vector))
        .execute(&mut *tx)
        .await?;
    }

    for (key, value) in manifest.entries() {
        sqlx::query("INSERT INTO manifest (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(())
}

async fn read_manifest(pool: &SqlitePool) -> anyhow::Result<IndexManifest> {
    let rows = sqlx::query("SELECT key, value FROM manifest")
        .fetch_all(pool)
        .await?;
    let entries = rows
        .iter()
        .map(|row| (row.get::<String, _>("key"), row.get::<String, _>("value")))
        .collect();
    IndexManifest::from_entries(entries)
}

async fn remove_staging(staging: &Path) {
    let _ = tokio::fs::remove_file(staging).await;
    let mut journal = staging.as_os_str().to_owned();
    journal.push("-journal");
    let _ = tokio::fs::remove_file(PathBuf::from(journal)).await;
}

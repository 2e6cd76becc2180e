//! # tenant-rag
//!
//! Tenant-isolated document question answering.
//!
//! Each tenant uploads one document. The document is split into pages and
//! overlapping chunks, every chunk is embedded, and the vectors are stored
//! in an index that belongs to that tenant alone. Questions are answered by
//! retrieving the closest chunks from the asking tenant's index and handing
//! them, with the question, to a text-generation model.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────┐   ┌───────────┐   ┌──────────────────┐
//! │  Loader  │──▶│ Chunker │──▶│ Embedding │──▶│ Tenant index     │
//! │ PDF/PPTX │   │ 300/100 │   │ provider  │   │ SQLite per tenant│
//! └──────────┘   └─────────┘   └───────────┘   └────────┬─────────┘
//!                                                        │
//!                      ┌─────────────────────────────────┘
//!                      ▼
//!                ┌───────────┐   ┌──────────────────┐
//!                │ Retriever │──▶│ Answer generator │
//!                │ k=3, ≥0.3 │   │ (chat model)     │
//!                └───────────┘   └──────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! trag upload --tenant acme ./policy.pdf
//! trag ask --tenant acme "How long do refunds take?"
//! trag status --tenant acme
//! trag remove --tenant acme
//! trag serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Pipeline error taxonomy |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`models`] | Pages, chunks, and results |
//! | [`tenant`] | Tenant ids, storage layout, write locks |
//! | [`loader`] | Page-aware document extraction |
//! | [`chunk`] | Overlapping text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`db`] | Index file connections and schema |
//! | [`store`] | Per-tenant vector index |
//! | [`retrieve`] | Similarity retrieval and relevance gate |
//! | [`generate`] | Grounded answer generation |
//! | [`service`] | End-to-end pipeline |
//! | [`server`] | HTTP API |

pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod generate;
pub mod loader;
pub mod logging;
pub mod models;
pub mod retrieve;
pub mod server;
pub mod service;
pub mod store;
pub mod tenant;

pub use error::{RagError, Result};
pub use service::{RagService, TenantStatus};
pub use tenant::TenantId;

//! # tenant-rag CLI (`trag`)
//!
//! ## Usage
//!
//! ```bash
//! trag --config ./config/trag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `trag upload --tenant <id> <file>` | Replace the tenant's corpus with a PDF or PPTX |
//! | `trag ask --tenant <id> "<question>"` | Answer a question from the tenant's corpus |
//! | `trag status --tenant <id>` | Show what is indexed for the tenant |
//! | `trag remove --tenant <id>` | Delete all data stored for the tenant |
//! | `trag serve` | Start the HTTP server |

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use tenant_rag::config;
use tenant_rag::logging;
use tenant_rag::server;
use tenant_rag::{RagError, RagService, TenantId};

/// Tenant-isolated document question answering.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/trag.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "trag",
    about = "Tenant-isolated document question answering",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/trag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a document, replacing the tenant's current corpus.
    Upload {
        /// Tenant identifier.
        #[arg(long)]
        tenant: String,

        /// PDF or PPTX file to ingest.
        file: PathBuf,
    },

    /// Ask a question against the tenant's corpus.
    Ask {
        /// Tenant identifier.
        #[arg(long)]
        tenant: String,

        /// Print the retrieved chunks after the answer.
        #[arg(long)]
        sources: bool,

        /// The question.
        question: String,
    },

    /// Show whether the tenant has a corpus and how it was built.
    Status {
        /// Tenant identifier.
        #[arg(long)]
        tenant: String,
    },

    /// Delete everything stored for the tenant.
    Remove {
        /// Tenant identifier.
        #[arg(long)]
        tenant: String,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

/// Attach the user-facing message to a pipeline error.
fn user_error(err: RagError) -> anyhow::Error {
    let message = err.user_message();
    anyhow::Error::new(err).context(message)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init_logging(&cfg.logging);

    let service = Arc::new(RagService::from_config(&cfg)?);

    match cli.command {
        Commands::Upload { tenant, file } => {
            let tenant = TenantId::new(tenant).map_err(user_error)?;
            let filename = file
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_string)
                .with_context(|| format!("Invalid file path: {}", file.display()))?;
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;

            let report = service
                .ingest(&tenant, &filename, bytes)
                .await
                .map_err(user_error)?;
            println!(
                "Indexed {} for tenant {}: {} pages, {} chunks.",
                report.filename, report.tenant_id, report.pages, report.chunks
            );
        }
        Commands::Ask {
            tenant,
            sources,
            question,
        } => {
            let tenant = TenantId::new(tenant).map_err(user_error)?;
            let answer = service
                .ask(&tenant, &question)
                .await
                .map_err(user_error)?;
            println!("{}", answer.text);
            if sources {
                println!();
                for (i, chunk) in answer.sources.iter().enumerate() {
                    println!(
                        "{}. [page {}, offset {}] score={:.3}",
                        i + 1,
                        chunk.page_number,
                        chunk.start_offset,
                        chunk.score
                    );
                    println!("   {}", chunk.text.replace('\n', " "));
                }
            }
        }
        Commands::Status { tenant } => {
            let tenant = TenantId::new(tenant).map_err(user_error)?;
            let status = service.status(&tenant).await.map_err(user_error)?;
            match status.index {
                None => println!("Tenant {}: no corpus.", status.tenant_id),
                Some(index) => {
                    println!("Tenant {}: corpus present.", status.tenant_id);
                    println!("  document:  {}", index.source_filename);
                    println!("  sha256:    {}", index.document_sha256);
                    println!("  pages:     {}", index.pages);
                    println!("  chunks:    {}", index.chunks);
                    println!("  model:     {} ({} dims)", index.model, index.dims);
                    println!("  built at:  {}", index.built_at.to_rfc3339());
                }
            }
        }
        Commands::Remove { tenant } => {
            let tenant = TenantId::new(tenant).map_err(user_error)?;
            service.remove_tenant(&tenant).await.map_err(user_error)?;
            println!("Removed all data for tenant {}.", tenant);
        }
        Commands::Serve => {
            server::run_server(&cfg, service).await?;
        }
    }

    Ok(())
}

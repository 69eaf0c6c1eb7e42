//! # Issue Triage CLI (`triage`)
//!
//! The `triage` binary drives the full pipeline: corpus initialization,
//! comment ingestion into the hybrid vector index, similar-issue search, and
//! the guardrail-gated triage workflow for a new issue.
//!
//! ## Usage
//!
//! ```bash
//! triage --config ./config/triage.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `triage init` | Create the corpus database and the vector collection |
//! | `triage collect --owner ... --repo ...` | Fetch issues/comments from GitHub |
//! | `triage ingest` | Index all issue comments from the corpus |
//! | `triage search "<query>"` | Hybrid similar-issue search |
//! | `triage triage --title ... --body ...` | Run the five-stage workflow |
//! | `triage drop-collection` | Delete the vector collection |

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use issue_triage::config::{self, Config};
use issue_triage::guard::{GuardrailValidator, HttpSafetyModel};
use issue_triage::index::memory::MemoryIndex;
use issue_triage::index::sqlite::SqliteIndex;
use issue_triage::index::VectorIndex;
use issue_triage::llm::OpenAiChatModel;
use issue_triage::store::VectorStore;
use issue_triage::workflow::{IssueWorkflow, Services};
use issue_triage::{collect, db, embedding, ingest, migrate};

/// Issue Triage CLI — hybrid retrieval and guardrail-gated triage for
/// GitHub issues.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/triage.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "triage",
    about = "Issue Triage — hybrid retrieval and guardrail-gated triage for GitHub issues",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/triage.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the corpus database and the vector collection.
    ///
    /// Creates the SQLite corpus tables (issues, comments) and the
    /// environment-namespaced vector collection with its payload indexes.
    /// Idempotent — running it multiple times is safe.
    Init,

    /// Fetch issues and comments from the GitHub API into the corpus.
    ///
    /// Pull requests are skipped, and issues or comments unchanged since
    /// the last collection are not rewritten. Reads `GITHUB_TOKEN` from the
    /// environment if set (unauthenticated rate limits are low).
    Collect {
        /// Repository owner (user or organization).
        #[arg(long)]
        owner: String,

        /// Repository name.
        #[arg(long)]
        repo: String,

        /// Issue state filter: `open`, `closed`, or `all`.
        #[arg(long, default_value = "all")]
        state: String,

        /// Maximum number of issue pages to fetch (100 issues per page).
        #[arg(long, default_value_t = 5)]
        max_pages: usize,
    },

    /// Ingest all issue comments from the corpus into the vector index.
    ///
    /// Skips comments that already have indexed chunks, so re-running after
    /// new comments arrive only indexes the new ones.
    Ingest,

    /// Hybrid similar-issue search.
    ///
    /// Embeds the query into both vector spaces, fuses the dense and sparse
    /// rankings, and prints the top hits with their fused scores.
    Search {
        /// The search query string.
        query: String,

        /// Maximum number of results to return.
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },

    /// Run the triage workflow for a new issue.
    ///
    /// Prints the full resulting state as JSON, including the blocked
    /// verdict, classification, and recommendation.
    Triage {
        /// Issue title.
        #[arg(long)]
        title: String,

        /// Issue body.
        #[arg(long)]
        body: String,
    },

    /// Delete the vector collection and all of its points.
    DropCollection,
}

async fn build_store(cfg: &Config) -> Result<Arc<VectorStore>> {
    let embedder = embedding::create_embedder(&cfg.embedding)?;

    let index: Arc<dyn VectorIndex> = match cfg.index.backend.as_str() {
        "memory" => Arc::new(MemoryIndex::new()),
        _ => {
            let pool = db::connect(&cfg.db.path).await?;
            Arc::new(SqliteIndex::new(pool).await?)
        }
    };

    Ok(Arc::new(VectorStore::new(
        embedder,
        index,
        cfg.collection_name(),
    )))
}

async fn build_services(cfg: &Config) -> Result<Arc<Services>> {
    let store = build_store(cfg).await?;
    let safety_model = Arc::new(HttpSafetyModel::new(&cfg.guardrails)?);
    let validator = Arc::new(GuardrailValidator::new(
        safety_model,
        cfg.guardrails.clone(),
    ));
    let llm = Arc::new(OpenAiChatModel::new(&cfg.llm)?);

    Ok(Arc::new(Services {
        store,
        validator,
        llm,
    }))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg.db.path).await?;
            migrate::run_migrations(&pool).await?;

            let store = build_store(&cfg).await?;
            store.ensure_collection().await?;
            println!("Initialized corpus and collection '{}'.", store.collection());
        }
        Commands::Collect {
            owner,
            repo,
            state,
            max_pages,
        } => {
            let pool = db::connect(&cfg.db.path).await?;
            migrate::run_migrations(&pool).await?;

            let token = std::env::var("GITHUB_TOKEN").ok();
            let collector = collect::GithubCollector::new(token, max_pages)?;
            let report = collect::run_collect(&pool, &collector, &owner, &repo, &state).await?;
            println!(
                "Collected {} issues ({} saved, {} skipped) and {} comments from {}/{}.",
                report.issues_fetched,
                report.issues_saved,
                report.issues_skipped,
                report.comments_saved,
                owner,
                repo
            );
        }
        Commands::Ingest => {
            let pool = db::connect(&cfg.db.path).await?;
            let store = build_store(&cfg).await?;
            let report =
                ingest::run_ingest(&pool, store, &cfg.chunking, &cfg.ingest).await?;
            println!(
                "Ingested {} points from {} comments across {} issues ({} skipped).",
                report.points_ingested,
                report.comments_ingested,
                report.issues,
                report.comments_skipped
            );
        }
        Commands::Search { query, limit } => {
            let store = build_store(&cfg).await?;
            let hits = store.search_similar_issues(&query, limit).await?;

            if hits.is_empty() {
                println!("No results.");
            }
            for hit in hits {
                println!(
                    "#{} {} (score {:.4})\n  {}\n  {}",
                    hit.issue_number, hit.title, hit.score, hit.url, hit.chunk_text
                );
            }
        }
        Commands::Triage { title, body } => {
            let services = build_services(&cfg).await?;
            let workflow = IssueWorkflow::new(services);
            let state = workflow.run(&title, &body).await;
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
        Commands::DropCollection => {
            let store = build_store(&cfg).await?;
            store.drop_collection().await?;
            println!("Dropped collection '{}'.", store.collection());
        }
    }

    Ok(())
}

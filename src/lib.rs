//! # Issue Triage
//!
//! A guardrail-gated triage pipeline for GitHub issues.
//!
//! Issue Triage ingests issues and their comments from a relational corpus
//! store into a hybrid (dense + sparse) vector index, then runs each new
//! issue through a five-stage workflow: input guard, similar-issue search,
//! classification, recommendation, and output guard. Guard stages consult a
//! safety model and halt the pipeline cleanly on violations.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌─────────────┐
//! │  Corpus  │──▶│  Ingestion   │──▶│ Vector Index │
//! │  SQLite  │   │ Chunk+Embed  │   │ dense+sparse │
//! └──────────┘   └──────────────┘   └──────┬──────┘
//!                                          │
//!   new issue ──▶ InputGuard ──▶ IssueSearch ──▶ Classification
//!                                          ──▶ Recommendation ──▶ OutputGuard
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! triage init                          # create corpus database
//! triage collect --owner scikit-learn --repo scikit-learn
//! triage ingest                        # index issue comments
//! triage search "HuberRegressor bug"   # hybrid similar-issue search
//! triage triage --title "..." --body "..."
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`collect`] | GitHub issues collector |
//! | [`db`] | Corpus database connection |
//! | [`migrate`] | Corpus schema migrations |
//! | [`corpus`] | Reading issues and comments |
//! | [`chunk`] | Text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Hybrid vector index (scoring, quantization, fusion) |
//! | [`store`] | Query-side retrieval facade |
//! | [`ingest`] | Ingestion orchestrator |
//! | [`guard`] | Guardrail validator and safety model |
//! | [`llm`] | Chat model abstraction |
//! | [`prompts`] | Prompt templates |
//! | [`state`] | Workflow state and stage updates |
//! | [`workflow`] | Five-stage workflow engine |
//! | [`stages`] | Stage implementations |

pub mod chunk;
pub mod collect;
pub mod config;
pub mod corpus;
pub mod db;
pub mod embedding;
pub mod guard;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod prompts;
pub mod stages;
pub mod state;
pub mod store;
pub mod workflow;

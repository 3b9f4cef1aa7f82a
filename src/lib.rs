//! # issuelens
//!
//! **An issue-tracker analysis engine: semantic search, topic extraction,
//! time trends, and LLM-driven test-case evaluation.**
//!
//! issuelens ingests stories and bugs from a project-management tracker,
//! reshapes them for machine analysis, and exposes a small set of
//! analytical operations designed to be driven one call at a time by a
//! conversational agent.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────┐   ┌─────────────────┐
//! │ Tracker  │──▶│ Issue dataset │──▶│ Chunk + Embed   │
//! │ REST API │   │  (flat JSON)  │   │ (vector index)  │
//! └──────────┘   └──────┬────────┘   └────────┬────────┘
//!                       │                     │
//!        ┌──────────────┼─────────────┐       ▼
//!        ▼              ▼             ▼   top-k search
//!   keyword freq   time trends   LLM overview
//!
//! spreadsheet ──▶ test cases ──▶ token-bounded batches ──▶ LLM rubric scores
//! ```
//!
//! ## Data Flow
//!
//! 1. **Ingestion** ([`fetch`]) pages the tracker API and writes the
//!    authoritative dataset JSON under `local_data/`.
//! 2. The **vector index** ([`index`]) chunks records, projects each to a
//!    canonical string ([`extract`]), embeds chunks with a local sentence
//!    encoder ([`embedder`]), and persists a flat inner-product index with
//!    sidecar metadata.
//! 3. **Analysis operations** read the dataset through the file store
//!    ([`store`]): keyword frequencies ([`keywords`]), daily trend charts
//!    ([`trend`]), and a token-budgeted LLM digest ([`overview`]).
//! 4. The **test-case evaluator** ([`evaluate`]) loads a rubric and a
//!    requirement knowledge base ([`rubric`]), batches spreadsheet-imported
//!    cases under a token budget ([`tokens`]), calls a chat-completion
//!    provider ([`api`]), and parses the Markdown-table replies
//!    ([`markdown`]).
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | Project-root discovery and the `local_data/`/`models/` layout |
//! | [`store`] | JSON blobs, dataset loading, spreadsheet import with column remap |
//! | [`models`] | Core data types: `IssueRecord`, `ChunkMeta`, `TestCase`, aggregates |
//! | [`error`] | Operation error kinds and the `status`/`message`/`suggestion` envelope |
//! | [`tokens`] | Token counting (tokenizer snapshot or CJK heuristic) and budget batching |
//! | [`embedder`] | Local ONNX sentence encoder with a process-wide snapshot cache |
//! | [`api`] | Two-provider chat-completion client with a typed error taxonomy |
//! | [`extract`] | Canonical searchable string per issue record |
//! | [`index`] | Flat inner-product vector index with persisted sidecars |
//! | [`keywords`] | CJK-aware keyword frequency analysis |
//! | [`trend`] | Daily aggregates and PNG trend charts |
//! | [`overview`] | Token-budgeted LLM project digest |
//! | [`evaluate`] | Rubric-driven LLM evaluation of test cases |
//! | [`rubric`] | Rubric config and the requirement knowledge base |
//! | [`markdown`] | Reusable Markdown pipe-table parser |
//! | [`fetch`] | Paginated tracker ingestion |
//!
//! ## Quick Start
//!
//! ```bash
//! ilens fetch                        # ingest the issue dataset
//! ilens index build                  # build the vector index
//! ilens search "订单"                # semantic top-k search
//! ilens keywords --min-frequency 3   # ranked term frequencies
//! ilens trend --kind story --chart count
//! ilens overview --since 2025-01-01 --until 2025-06-30
//! ilens evaluate local_data/TestCase.xlsx
//! ```
//!
//! Every operation prints a JSON object with a top-level `status` field;
//! failures carry `message` and a one-line `suggestion`.

pub mod api;
pub mod config;
pub mod embedder;
pub mod error;
pub mod evaluate;
pub mod extract;
pub mod fetch;
pub mod index;
pub mod keywords;
pub mod markdown;
pub mod models;
pub mod overview;
pub mod rubric;
pub mod store;
pub mod tokens;
pub mod trend;

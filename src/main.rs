//! # issuelens CLI (`ilens`)
//!
//! The `ilens` binary drives every analytical operation. Each command reads
//! its inputs from flat files under the project root, runs one operation,
//! and prints a JSON result with a top-level `status` field — the same
//! contract an embedding tool-invocation layer would consume.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ilens fetch` | Ingest stories and bugs from the tracker API |
//! | `ilens index build` | Chunk, embed, and persist the vector index |
//! | `ilens index info` | Show index statistics |
//! | `ilens search "<query>"` | Top-k semantic search over indexed chunks |
//! | `ilens keywords` | Ranked keyword frequencies |
//! | `ilens trend` | Daily trend aggregate plus a PNG chart |
//! | `ilens overview` | Token-budgeted LLM project digest |
//! | `ilens evaluate <xlsx>` | Rubric-driven LLM evaluation of test cases |
//! | `ilens kb extract` | Fill the requirement knowledge base from the dataset |
//! | `ilens kb list` | Show the requirement knowledge base |
//! | `ilens rubric show` | Show the active rubric |
//! | `ilens rubric reset` | Restore the default rubric |

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use issuelens::api::ApiClient;
use issuelens::config::Paths;
use issuelens::error::{error_response, OpError};
use issuelens::models::IssueKind;
use issuelens::rubric::{KnowledgeBase, Rubric};
use issuelens::trend::{ChartKind, TimeField};
use issuelens::{evaluate, fetch, index, keywords, overview, store, trend};

/// issuelens — analyze issue-tracker data: semantic search, keyword and
/// trend analysis, and LLM-driven test-case evaluation.
#[derive(Parser)]
#[command(
    name = "ilens",
    about = "Analyze issue-tracker data: semantic search, keywords, trends, and LLM evaluation",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest stories and bugs from the tracker API into the local dataset.
    ///
    /// Requires TRACKER_EP, TRACKER_USER, TRACKER_PASSWORD, and
    /// TRACKER_WORKSPACE. Replaces the dataset file wholesale.
    Fetch,

    /// Manage the vector index.
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },

    /// Semantic top-k search over the indexed chunks.
    Search {
        /// Natural-language query.
        query: String,

        /// Number of chunks to return.
        #[arg(long, default_value_t = 5)]
        top_k: usize,
    },

    /// Ranked keyword frequencies over the dataset.
    Keywords {
        /// Minimum count for a token to rank as high-frequency.
        #[arg(long, default_value_t = 3)]
        min_frequency: usize,

        /// Restrict to the core text fields (title, description, …).
        #[arg(long)]
        core_only: bool,

        /// Dataset file override (absolute or project-relative).
        #[arg(long)]
        file: Option<String>,
    },

    /// Daily trend aggregate and a PNG chart.
    Trend {
        /// Record kind: story or bug.
        #[arg(long, default_value = "story")]
        kind: String,

        /// Chart dimension: count, priority, or status.
        #[arg(long, default_value = "count")]
        chart: String,

        /// Time field to group by: created, modified, begin, or due.
        #[arg(long, default_value = "created")]
        field: String,

        /// Inclusive start date (YYYY-MM-DD).
        #[arg(long)]
        since: Option<String>,

        /// Inclusive end date (YYYY-MM-DD).
        #[arg(long)]
        until: Option<String>,

        /// Dataset file override.
        #[arg(long)]
        file: Option<String>,
    },

    /// Token-budgeted LLM digest of a time slice of the dataset.
    Overview {
        /// Inclusive start date (YYYY-MM-DD).
        #[arg(long)]
        since: Option<String>,

        /// Inclusive end date (YYYY-MM-DD).
        #[arg(long)]
        until: Option<String>,

        /// Max total token budget for the digest pipeline.
        #[arg(long, default_value_t = overview::DEFAULT_BUDGET)]
        budget: usize,

        /// Chat-completion endpoint override (selects the provider).
        #[arg(long)]
        endpoint: Option<String>,

        /// Dataset file override.
        #[arg(long)]
        file: Option<String>,
    },

    /// Evaluate a spreadsheet of test cases against the rubric via the LLM.
    Evaluate {
        /// Test-case spreadsheet (.xlsx or .csv).
        spreadsheet: PathBuf,

        /// LLM context-window size driving the batch budget.
        #[arg(long, default_value_t = evaluate::DEFAULT_CONTEXT_WINDOW)]
        context_window: usize,

        /// Chat-completion endpoint override (selects the provider).
        #[arg(long)]
        endpoint: Option<String>,
    },

    /// Manage the requirement knowledge base.
    Kb {
        #[command(subcommand)]
        action: KbAction,
    },

    /// Manage the evaluation rubric.
    Rubric {
        #[command(subcommand)]
        action: RubricAction,
    },
}

#[derive(Subcommand)]
enum IndexAction {
    /// Build (or fully rebuild) the index from the dataset.
    Build {
        /// Dataset file override.
        #[arg(long)]
        file: Option<String>,

        /// Records per chunk.
        #[arg(long, default_value_t = index::DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,
    },

    /// Show index statistics without loading the model.
    Info,
}

#[derive(Subcommand)]
enum KbAction {
    /// Import requirement entries from the dataset's stories.
    Extract {
        /// Dataset file override.
        #[arg(long)]
        file: Option<String>,
    },

    /// Show the stored requirement entries.
    List,
}

#[derive(Subcommand)]
enum RubricAction {
    /// Show the active rubric.
    Show,

    /// Restore the default rubric.
    Reset,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let paths = Paths::discover()?;

    // External cancel signal: Ctrl-C aborts in-flight calls and fails the
    // operation with a Cancelled error.
    let cancel = CancellationToken::new();
    let ctrlc_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrlc_cancel.cancel();
        }
    });

    let outcome: Result<serde_json::Value, OpError> = match cli.command {
        Commands::Fetch => to_value(fetch::run_fetch(&paths, &cancel).await),
        Commands::Index { action } => match action {
            IndexAction::Build { file, chunk_size } => {
                match store::load_dataset(&paths, file.as_deref()) {
                    Ok(dataset) => {
                        to_value(index::run_build(&paths, &dataset, chunk_size).await)
                    }
                    Err(e) => Err(e),
                }
            }
            IndexAction::Info => to_value(index::run_info(&paths)),
        },
        Commands::Search { query, top_k } => {
            to_value(index::run_search(&paths, &query, top_k).await)
        }
        Commands::Keywords {
            min_frequency,
            core_only,
            file,
        } => store::load_dataset(&paths, file.as_deref())
            .map(|dataset| keywords::analyze(&dataset, min_frequency, !core_only))
            .and_then(|report| to_value(Ok(report))),
        Commands::Trend {
            kind,
            chart,
            field,
            since,
            until,
            file,
        } => run_trend_command(&paths, kind, chart, field, since, until, file),
        Commands::Overview {
            since,
            until,
            budget,
            endpoint,
            file,
        } => match (parse_date_opt(since), parse_date_opt(until)) {
            (Ok(since), Ok(until)) => match store::load_dataset(&paths, file.as_deref()) {
                Ok(dataset) => match ApiClient::from_env(endpoint) {
                    Ok(client) => to_value(
                        overview::run_overview(&dataset, since, until, budget, &client, &cancel)
                            .await,
                    ),
                    Err(e) => Err(OpError::Other(e)),
                },
                Err(e) => Err(e),
            },
            (Err(e), _) | (_, Err(e)) => Err(e),
        },
        Commands::Evaluate {
            spreadsheet,
            context_window,
            endpoint,
        } => match ApiClient::from_env(endpoint) {
            Ok(client) => to_value(
                evaluate::run_evaluation(&paths, &spreadsheet, context_window, &client, &cancel)
                    .await,
            ),
            Err(e) => Err(OpError::Other(e)),
        },
        Commands::Kb { action } => run_kb_command(&paths, action),
        Commands::Rubric { action } => run_rubric_command(&paths, action),
    };

    match outcome {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Err(err) => {
            println!("{}", serde_json::to_string_pretty(&error_response(&err))?);
            std::process::exit(1);
        }
    }
}

fn run_trend_command(
    paths: &Paths,
    kind: String,
    chart: String,
    field: String,
    since: Option<String>,
    until: Option<String>,
    file: Option<String>,
) -> Result<serde_json::Value, OpError> {
    let kind: IssueKind = kind.parse().map_err(OpError::Other)?;
    let chart: ChartKind = chart.parse().map_err(OpError::Other)?;
    let field: TimeField = field.parse().map_err(OpError::Other)?;
    let since = parse_date_opt(since)?;
    let until = parse_date_opt(until)?;
    let dataset = store::load_dataset(paths, file.as_deref())?;
    to_value(trend::run_trend(paths, &dataset, kind, chart, field, since, until))
}

fn run_kb_command(paths: &Paths, action: KbAction) -> Result<serde_json::Value, OpError> {
    match action {
        KbAction::Extract { file } => {
            let dataset = store::load_dataset(paths, file.as_deref())?;
            let mut kb = KnowledgeBase::load(paths).map_err(OpError::Other)?;
            let added = kb.extract_from_dataset(&dataset);
            kb.save(paths).map_err(OpError::Other)?;
            Ok(json!({
                "status": "success",
                "added": added,
                "total": kb.requirements.len(),
            }))
        }
        KbAction::List => {
            let kb = KnowledgeBase::load(paths).map_err(OpError::Other)?;
            Ok(json!({
                "status": "success",
                "total": kb.requirements.len(),
                "requirements": kb.requirements,
            }))
        }
    }
}

fn run_rubric_command(paths: &Paths, action: RubricAction) -> Result<serde_json::Value, OpError> {
    match action {
        RubricAction::Show => {
            let rubric = Rubric::load_or_create(paths).map_err(OpError::Other)?;
            Ok(json!({ "status": "success", "rubric": rubric }))
        }
        RubricAction::Reset => {
            let rubric = Rubric::default();
            rubric.save(paths).map_err(OpError::Other)?;
            Ok(json!({ "status": "success", "rubric": rubric }))
        }
    }
}

fn parse_date_opt(value: Option<String>) -> Result<Option<chrono::NaiveDate>, OpError> {
    match value {
        None => Ok(None),
        Some(raw) => chrono::NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| {
                OpError::InputMalformed(format!("invalid date '{}': expected YYYY-MM-DD", raw))
            }),
    }
}

/// Serialize a successful operation result into the JSON envelope.
fn to_value<T: Serialize>(result: Result<T, OpError>) -> Result<serde_json::Value, OpError> {
    result.and_then(|value| serde_json::to_value(value).map_err(|e| OpError::Other(e.into())))
}

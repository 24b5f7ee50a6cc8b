//! # Survey Index CLI (`svidx`)
//!
//! The `svidx` binary checks the search store, creates the index, runs
//! indexing passes, queries the index and starts the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! svidx --config ./config/svidx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `svidx status` | Ping the store and print cluster name and version |
//! | `svidx init` | Create the index with its mapping if absent |
//! | `svidx index` | Rebuild the index from the configured input files |
//! | `svidx search "<query>"` | Nearest-neighbor search over indexed answers |
//! | `svidx serve` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! # Check what would be indexed without embedding anything
//! svidx index --dry-run --config ./config/svidx.toml
//!
//! # Full run
//! svidx index --config ./config/svidx.toml
//!
//! # Respondents who own a Galaxy phone, restricted to phone questions
//! svidx search "갤럭시 보유자" --question "*휴대폰*" --config ./config/svidx.toml
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use survey_index::config::{self, Config};
use survey_index::embedding::{self, DisabledProvider, EmbeddingProvider};
use survey_index::index::IndexManager;
use survey_index::pipeline::Pipeline;
use survey_index::progress::ProgressMode;
use survey_index::search::{self, SearchRequest};
use survey_index::server;
use survey_index::store::{ElasticsearchStore, InMemoryStore, SurveyStore};

/// Survey Index CLI. Turns coded survey responses into per-respondent
/// nested documents with embedded answers, indexed for keyword and vector search.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/svidx.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "svidx",
    about = "Survey Index: embed and index survey responses for hybrid search",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/svidx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ping the search store and print the cluster name and version.
    Status,

    /// Create the index with its mapping if it does not exist.
    ///
    /// Idempotent: an existing index is left untouched.
    Init,

    /// Rebuild the index from the configured schema and response files.
    ///
    /// The index is dropped and recreated, then every respondent is
    /// normalized, embedded and bulk-written.
    Index {
        /// Parse and normalize only; print counts and a sample document.
        #[arg(long)]
        dry_run: bool,

        /// Maximum number of response rows to process.
        #[arg(long)]
        limit: Option<usize>,

        /// Progress output on stderr: `human`, `json`, or `off`.
        /// Defaults to `human` when stderr is a terminal.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Nearest-neighbor search over indexed answers.
    Search {
        /// Natural-language query text.
        query: String,

        /// Wildcard pattern on question text (e.g. `*휴대폰*`).
        #[arg(long)]
        question: Option<String>,

        /// Number of respondents to return.
        #[arg(long, default_value_t = 10)]
        k: usize,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

fn parse_progress(value: Option<&str>) -> Result<ProgressMode> {
    match value {
        None => Ok(ProgressMode::default_for_tty()),
        Some("human") => Ok(ProgressMode::Human),
        Some("json") => Ok(ProgressMode::Json),
        Some("off") => Ok(ProgressMode::Off),
        Some(other) => anyhow::bail!("Unknown progress mode: '{}'. Use human, json, or off.", other),
    }
}

fn build_store(cfg: &Config) -> Result<Arc<dyn SurveyStore>> {
    Ok(Arc::new(ElasticsearchStore::new(&cfg.store)?))
}

fn build_pipeline(cfg: Config) -> Result<Pipeline> {
    let store = build_store(&cfg)?;
    let embedder: Arc<dyn EmbeddingProvider> = embedding::create_provider(&cfg.embedding)?;
    Ok(Pipeline::new(Arc::new(cfg), store, embedder))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("survey_index=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Status => {
            let store = build_store(&cfg)?;
            let info = store.info().await?;
            println!("connected to {}", cfg.store.url);
            println!("  cluster: {}", info.cluster_name);
            println!("  version: {}", info.version);
            let index = &cfg.store.index;
            if store.index_exists(index).await? {
                println!("  index {}: {} documents", index, store.count(index).await?);
            } else {
                println!("  index {}: not created", index);
            }
        }
        Commands::Init => {
            let manager = IndexManager::from_config(build_store(&cfg)?, &cfg)?;
            if manager.ensure_schema().await? {
                println!("Index '{}' created.", manager.index());
            } else {
                println!("Index '{}' already exists.", manager.index());
            }
        }
        Commands::Index {
            dry_run,
            limit,
            progress,
        } => {
            let mode = parse_progress(progress.as_deref())?;

            if dry_run {
                let pipeline = Pipeline::new(
                    Arc::new(cfg),
                    Arc::new(InMemoryStore::new()),
                    Arc::new(DisabledProvider),
                );
                let report = pipeline.dry_run(limit)?;
                println!("index (dry-run)");
                println!("  questions: {}", report.questions);
                println!("  rows: {}", report.rows);
                println!("  documents: {}", report.documents);
                println!("  statements: {}", report.statements);
                println!("  skipped (no user id): {}", report.skipped_users);
                println!("  skipped (no answers): {}", report.empty_users);
                if let Some(sample) = &report.sample {
                    println!("  sample:");
                    println!("{}", serde_json::to_string_pretty(sample)?);
                }
                return Ok(());
            }

            let pipeline = build_pipeline(cfg)?;
            let cancel = CancellationToken::new();
            let ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    ctrl_c.cancel();
                }
            });

            let reporter = mode.reporter();
            let summary = pipeline.run(&cancel, reporter.as_ref(), limit).await?;

            println!("index {}", summary.index);
            println!("  rows: {}", summary.rows);
            println!("  documents: {}", summary.documents);
            println!("  statements: {}", summary.statements);
            println!("  skipped (no user id): {}", summary.skipped_users);
            println!("  skipped (no answers): {}", summary.empty_users);
            println!("  indexed: {}", summary.success_count);
            println!("  failed: {}", summary.failure_count());
            for failure in &summary.failures {
                println!("    {} [{}] {}", failure.user_id, failure.status, failure.reason);
            }
            println!("  template version: {}", summary.template_version);
            println!("ok");
        }
        Commands::Search { query, question, k } => {
            let store = build_store(&cfg)?;
            let embedder = embedding::create_provider(&cfg.embedding)?;
            let request = SearchRequest {
                query,
                question_pattern: question,
                k,
            };
            let hits =
                search::search_similar(store.as_ref(), embedder.as_ref(), &cfg.store.index, &request)
                    .await?;
            search::print_hits(&request.query, &hits);
        }
        Commands::Serve => {
            let pipeline = build_pipeline(cfg.clone())?;
            server::run_server(&cfg, pipeline).await?;
        }
    }

    Ok(())
}

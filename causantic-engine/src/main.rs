use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;

use causantic_core::api::{ForgetFilters, QueryFilters, ReconstructSelector, TimeRange, TokenBudget};
use causantic_core::chunker::ChunkerConfig;
use causantic_core::embedder::{Embedder, LoadOptions, MockEmbedder};
use causantic_core::scheduler::{CancellationToken, TaskName};
use causantic_engine::config::CausanticConfig;
use causantic_engine::engine::Engine;
use causantic_engine::error::{EngineError, Result};
use causantic_engine::output::{Output, OutputFormat};
use causantic_store::config::{Cipher, EncryptionSettings, StoreConfig};
use causantic_store::encryption::KeySources;
use causantic_store::CausanticStore;
use causantic_vector_index::PackedVectorIndex;

/// Causal-memory recall engine for coding-assistant transcripts.
#[derive(Parser)]
#[command(name = "causantic")]
#[command(about = "Causal-memory recall engine for coding-assistant transcripts")]
#[command(version)]
struct Cli {
    /// Explicit config file path (JSON or TOML); otherwise the default
    /// search locations and `CAUSANTIC_*` environment variables apply.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Human)]
    format: OutputFormat,

    /// Enable debug-level tracing.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Hybrid dense + lexical + cluster search, no causal expansion.
    Search {
        query: String,
        #[arg(long)]
        project: Option<String>,
        #[arg(long, default_value_t = 10)]
        k: usize,
    },
    /// `search` followed by a backward causal-chain walk.
    Recall {
        query: String,
        #[arg(long)]
        project: Option<String>,
        #[arg(long, default_value_t = 4096)]
        budget: u32,
    },
    /// `search` followed by a forward causal-chain walk.
    Predict {
        context: String,
        #[arg(long)]
        project: Option<String>,
    },
    /// Lists known projects with aggregate chunk counts and time bounds.
    ListProjects,
    /// Lists sessions within a project.
    ListSessions {
        project: String,
        #[arg(long)]
        from: Option<chrono::DateTime<chrono::Utc>>,
        #[arg(long)]
        to: Option<chrono::DateTime<chrono::Utc>>,
    },
    /// Reassembles a session, the previous session, or a time range in
    /// chronological order, bounded by a token budget.
    Reconstruct {
        #[arg(long)]
        session: Option<String>,
        #[arg(long)]
        previous_of: Option<String>,
        #[arg(long, requires = "previous_of")]
        project: Option<String>,
        #[arg(long, default_value_t = 8192)]
        budget: u32,
        #[arg(long)]
        keep_newest: bool,
    },
    /// Previews or applies deletion of chunks matching the given filters.
    Forget {
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        session: Option<String>,
        #[arg(long)]
        query: Option<String>,
        #[arg(long)]
        threshold: Option<f32>,
        #[arg(long)]
        after: Option<chrono::DateTime<chrono::Utc>>,
        #[arg(long)]
        before: Option<chrono::DateTime<chrono::Utc>>,
        /// Compute and print the matching set without deleting anything.
        #[arg(long)]
        dry_run: bool,
    },
    /// Ingests one session transcript file.
    Ingest { path: PathBuf },
    /// Runs one named maintenance task to completion.
    Maintain {
        #[arg(value_enum)]
        task: MaintenanceTask,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum MaintenanceTask {
    PruneGraph,
    UpdateClusters,
    RefreshLabels,
    Vacuum,
}

impl From<MaintenanceTask> for TaskName {
    fn from(task: MaintenanceTask) -> Self {
        match task {
            MaintenanceTask::PruneGraph => TaskName::PruneGraph,
            MaintenanceTask::UpdateClusters => TaskName::UpdateClusters,
            MaintenanceTask::RefreshLabels => TaskName::RefreshLabels,
            MaintenanceTask::Vacuum => TaskName::Vacuum,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).init();

    match run(cli).await {
        Ok(()) => ExitCode::from(0),
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(err.exit_code() as u8)
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = CausanticConfig::load(cli.config.as_deref())?;
    config.validate()?;
    let format = cli.format;

    let engine = build_engine(&config).await?;

    match cli.command {
        Commands::Search { query, project, k } => {
            let filters = QueryFilters { project, skip_clusters: false };
            let hits = engine.search(&query, &filters, Some(k)).await?;
            print_list(&hits, format)
        }
        Commands::Recall { query, project, budget } => {
            let filters = QueryFilters { project, skip_clusters: false };
            let hits = engine.recall(&query, &filters, TokenBudget { max_tokens: budget }).await?;
            print_list(&hits, format)
        }
        Commands::Predict { context, project } => {
            let filters = QueryFilters { project, skip_clusters: false };
            let hits = engine.predict(&context, &filters).await?;
            print_list(&hits, format)
        }
        Commands::ListProjects => {
            let projects = engine.list_projects().await?;
            print_list(&projects, format)
        }
        Commands::ListSessions { project, from, to } => {
            let range = match (from, to) {
                (Some(from), Some(to)) => Some(TimeRange { from, to }),
                _ => None,
            };
            let sessions = engine.list_sessions(&project, range).await?;
            print_list(&sessions, format)
        }
        Commands::Reconstruct { session, previous_of, project, budget, keep_newest } => {
            let selector = reconstruct_selector(session, previous_of, project)?;
            let chunks = engine.reconstruct(&selector, TokenBudget { max_tokens: budget }, keep_newest).await?;
            print_list(&chunks, format)
        }
        Commands::Forget { project, session, query, threshold, after, before, dry_run } => {
            let filters = ForgetFilters { project, session_id: session, query, threshold, after, before, dry_run };
            let report = engine.forget(&filters).await?;
            print_one(&report, format)
        }
        Commands::Ingest { path } => {
            let report = engine.ingest_session_file(&path, ChunkerConfig { max_tokens: config.chunker.max_tokens, include_thinking: config.chunker.include_thinking }).await?;
            print_one(&IngestReportView::from(report), format)
        }
        Commands::Maintain { task } => {
            let touched = engine.run_maintenance(task.into(), &CancellationToken::new()).await?;
            print_one(&MaintenanceOutcome { touched }, format)
        }
    }
}

fn reconstruct_selector(session: Option<String>, previous_of: Option<String>, project: Option<String>) -> Result<ReconstructSelector> {
    if let Some(session_id) = previous_of {
        let project = project.ok_or_else(|| EngineError::InvalidArgument("--previous-of requires --project".to_string()))?;
        return Ok(ReconstructSelector::PreviousSession { project, session_id });
    }
    if let Some(session_id) = session {
        return Ok(ReconstructSelector::Session(session_id));
    }
    Err(EngineError::InvalidArgument("reconstruct requires --session or --previous-of".to_string()))
}

async fn build_engine(config: &CausanticConfig) -> Result<Engine> {
    std::fs::create_dir_all(&config.data_dir)?;

    let encryption = EncryptionSettings {
        enabled: config.encryption.enabled,
        cipher: if config.encryption.cipher == "sqlcipher-compat" { Cipher::SqlCipherCompat } else { Cipher::ChaCha20Poly1305 },
        key_sources: KeySources::all(),
    };
    let store_config = StoreConfig { db_path: config.db_path(), encryption, busy_timeout_ms: 5_000 };
    let store = Arc::new(CausanticStore::open(store_config).await?);
    let vector_index = Arc::new(PackedVectorIndex::open(config.vector_index_path()).await?);

    // The text-embedding model and its device-selection glue are an
    // external collaborator (spec section 1); this binary wires in the
    // workspace's deterministic embedder until a real one is plugged in.
    let embedder: Arc<dyn Embedder> = Arc::new(MockEmbedder::new(384));
    embedder.load(&config.model_id, LoadOptions::default()).await?;

    Ok(Engine::new(store, vector_index, embedder, None, config))
}

fn print_list<T: Output>(items: &[T], format: OutputFormat) -> Result<()> {
    #[derive(Serialize)]
    struct Wrapper<'a, T: Serialize> {
        items: &'a [T],
    }

    match format {
        OutputFormat::Json => {
            serde_json::to_writer_pretty(std::io::stdout(), &Wrapper { items })
                .map_err(|e| EngineError::Configuration(e.to_string()))?;
            println!();
        }
        OutputFormat::Human => {
            for item in items {
                item.write_human(std::io::stdout()).map_err(|e| EngineError::Configuration(e.to_string()))?;
            }
        }
    }
    Ok(())
}

fn print_one<T: Output>(item: &T, format: OutputFormat) -> Result<()> {
    item.print(format).map_err(|e| EngineError::Configuration(e.to_string()))
}

#[derive(Serialize)]
struct MaintenanceOutcome {
    touched: usize,
}

impl Output for MaintenanceOutcome {
    fn write_human<W: std::io::Write>(&self, mut writer: W) -> anyhow::Result<()> {
        writeln!(writer, "touched {} item(s)", self.touched)?;
        Ok(())
    }
}

/// [`causantic_core::ingest::IngestReport`] doesn't derive `Serialize`
/// (it's an in-process return value, not a persisted type); this view
/// mirrors it field-for-field for the CLI's JSON/human output.
#[derive(Serialize)]
struct IngestReportView {
    session_id: String,
    outcome: &'static str,
    chunks_inserted: usize,
    cache_hits: usize,
    cache_misses: usize,
    edges_touched: usize,
    sub_agent_reports: Vec<IngestReportView>,
}

impl From<causantic_core::ingest::IngestReport> for IngestReportView {
    fn from(report: causantic_core::ingest::IngestReport) -> Self {
        Self {
            session_id: report.session_id,
            outcome: match report.outcome {
                causantic_core::types::IngestOutcome::SkippedUnchangedFile => "skipped_unchanged_file",
                causantic_core::types::IngestOutcome::Ingested => "ingested",
            },
            chunks_inserted: report.chunks_inserted,
            cache_hits: report.cache_hits,
            cache_misses: report.cache_misses,
            edges_touched: report.edges_touched,
            sub_agent_reports: report.sub_agent_reports.into_iter().map(IngestReportView::from).collect(),
        }
    }
}

impl Output for IngestReportView {
    fn write_human<W: std::io::Write>(&self, mut writer: W) -> anyhow::Result<()> {
        writeln!(
            writer,
            "{}: {} ({} inserted, {} cache hits, {} cache misses, {} edges)",
            self.session_id, self.outcome, self.chunks_inserted, self.cache_hits, self.cache_misses, self.edges_touched
        )?;
        for sub in &self.sub_agent_reports {
            sub.write_human(&mut writer)?;
        }
        Ok(())
    }
}

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;

use lodestone_embed::any::AnyEmbedder;
use lodestone_embed::ollama::OllamaEmbedder;
use lodestone_embed::openai::OpenAiEmbedder;
use lodestone_embed::provider::EmbeddingProvider;
use lodestone_index::chunker::ChunkerConfig;
use lodestone_index::corpus::FsCorpus;
use lodestone_index::indexer::{Indexer, IndexerConfig, ReindexOptions};
use lodestone_index::pipeline::PipelineConfig;
use lodestone_index::postgres::PgChunkStore;
use lodestone_index::query::{QueryConfig, QueryEngine};
use lodestone_index::scope::{ScopeSpec, resolve_scope};
use lodestone_index::store::ChunkStore;
use lodestone_index::types::{IndexProgress, SearchHit};

use crate::config::Config;

mod config;

#[derive(Parser, Debug)]
#[command(
    name = "lodestone",
    version,
    about = "Hybrid vector and full-text search over a folder of documents"
)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, default_value = "lodestone.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Bring the index in sync with the corpus.
    Index {
        /// Re-embed everything instead of only changed files.
        #[arg(long)]
        all: bool,

        /// Restrict the run to an exact file path (repeatable).
        #[arg(long = "file")]
        files: Vec<String>,

        /// Restrict the run to a folder prefix (repeatable).
        #[arg(long = "folder")]
        folders: Vec<String>,

        /// Restrict the run to documents carrying a tag (repeatable).
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Search the index.
    Search {
        /// Query text.
        query: String,

        /// Search channel to use.
        #[arg(long, value_enum, default_value = "hybrid")]
        mode: SearchMode,

        /// Restrict hits to an exact file path (repeatable).
        #[arg(long = "file")]
        files: Vec<String>,

        /// Restrict hits to a folder prefix (repeatable).
        #[arg(long = "folder")]
        folders: Vec<String>,

        /// Restrict hits to documents carrying a tag (repeatable).
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Maximum number of hits (defaults to the configured limit).
        #[arg(long)]
        limit: Option<usize>,

        /// Text search language for this query (defaults to the configured
        /// one).
        #[arg(long)]
        language: Option<String>,
    },
    /// Print index statistics.
    Status,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SearchMode {
    Vector,
    Text,
    Hybrid,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    config.validate()?;

    match cli.command {
        Command::Index {
            all,
            files,
            folders,
            tags,
        } => {
            run_index(
                &config,
                all,
                ScopeSpec {
                    files,
                    folders,
                    tags,
                },
            )
            .await
        }
        Command::Search {
            query,
            mode,
            files,
            folders,
            tags,
            limit,
            language,
        } => {
            run_search(
                &config,
                &query,
                mode,
                ScopeSpec {
                    files,
                    folders,
                    tags,
                },
                limit,
                language,
            )
            .await
        }
        Command::Status => run_status(&config).await,
    }
}

fn create_provider(config: &Config) -> anyhow::Result<AnyEmbedder> {
    let embedding = &config.embedding;
    match embedding.provider.as_str() {
        "openai" => {
            let api_key = std::env::var(&embedding.api_key_env)
                .with_context(|| format!("{} is not set", embedding.api_key_env))?;
            Ok(AnyEmbedder::OpenAi(OpenAiEmbedder::new(
                api_key,
                embedding.base_url.clone(),
                embedding.model.clone(),
                embedding.dimension,
            )))
        }
        "ollama" => Ok(AnyEmbedder::Ollama(OllamaEmbedder::new(
            &embedding.base_url,
            embedding.model.clone(),
            embedding.dimension,
        ))),
        other => bail!("unknown embedding provider: {other}"),
    }
}

async fn connect_store(config: &Config) -> anyhow::Result<PgChunkStore> {
    let store = PgChunkStore::connect(&config.index.database_url)
        .await
        .with_context(|| format!("failed to connect to {}", config.index.database_url))?
        .with_language(&config.index.language)?;
    Ok(store)
}

async fn run_index(config: &Config, all: bool, scope: ScopeSpec) -> anyhow::Result<()> {
    let provider = Arc::new(create_provider(config)?);
    let store = connect_store(config).await?;
    let corpus =
        FsCorpus::new(&config.corpus.root).with_extensions(config.corpus.extensions.clone());

    let indexer_config = IndexerConfig {
        chunker: ChunkerConfig {
            chunk_size: config.index.chunk_size,
        },
        pipeline: PipelineConfig {
            batch_size: config.index.batch_size,
            concurrency: config.index.concurrency,
        },
        include: config.corpus.include.clone(),
        exclude: config.corpus.exclude.clone(),
    };
    let indexer = Indexer::new(&store, &corpus, Arc::clone(&provider), indexer_config)?;

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e:#}");
            return;
        }
        tracing::info!("received shutdown signal, finishing current batch");
        signal_cancel.cancel();
    });

    let (progress_tx, mut progress_rx) = tokio::sync::mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(progress) = progress_rx.recv().await {
            render_progress(&progress);
        }
    });

    let options = ReindexOptions {
        scope,
        reindex_all: all,
    };
    let report = indexer.reindex(&options, &cancel, Some(&progress_tx)).await?;
    drop(progress_tx);
    printer.await?;
    if report.chunks_indexed > 0 {
        println!();
    }

    println!(
        "{} files discovered, {} indexed, {} chunks written, {} removed in {} ms",
        report.files_discovered,
        report.files_indexed,
        report.chunks_indexed,
        report.chunks_removed,
        report.duration_ms
    );
    for failure in &report.failures {
        eprintln!("skipped {}: {}", failure.path, failure.error);
    }
    if report.aborted {
        println!("aborted; chunks indexed so far were kept");
    }
    Ok(())
}

async fn run_search(
    config: &Config,
    text: &str,
    mode: SearchMode,
    scope_spec: ScopeSpec,
    limit: Option<usize>,
    language: Option<String>,
) -> anyhow::Result<()> {
    let provider = Arc::new(create_provider(config)?);
    let store = connect_store(config).await?;
    store.init(provider.dimension()).await?;

    let corpus =
        FsCorpus::new(&config.corpus.root).with_extensions(config.corpus.extensions.clone());
    let scope = resolve_scope(&corpus, &scope_spec).await?;

    let query_config = QueryConfig {
        limit: limit.unwrap_or(config.search.limit),
        min_similarity: config.search.min_similarity,
        language: language.unwrap_or_else(|| config.index.language.clone()),
    };
    let engine = QueryEngine::new(&store, provider, query_config)?;

    let hits = match mode {
        SearchMode::Vector => engine.similarity_query(text, scope).await?,
        SearchMode::Text => engine.fulltext_query(text, scope).await?,
        SearchMode::Hybrid => engine.hybrid_query(text, scope).await?,
    };

    if hits.is_empty() {
        println!("no matches");
        return Ok(());
    }
    for hit in &hits {
        println!("{}", format_hit(hit));
        for line in hit.content.lines().take(2) {
            println!("    {line}");
        }
    }
    Ok(())
}

async fn run_status(config: &Config) -> anyhow::Result<()> {
    let provider = create_provider(config)?;
    let store = connect_store(config).await?;
    store.init(provider.dimension()).await?;

    let chunks = store.count_chunks().await?;
    let paths = store.indexed_paths().await?;
    let watermark = store.max_mtime().await?;

    println!(
        "model: {} ({} dims) via {}",
        provider.model(),
        provider.dimension(),
        provider.name()
    );
    println!("indexed: {chunks} chunks across {} files", paths.len());
    match watermark {
        Some(ts) => println!("watermark: {ts} (epoch seconds)"),
        None => println!("watermark: none (empty index)"),
    }
    Ok(())
}

fn format_hit(hit: &SearchHit) -> String {
    format!(
        "{:.3}  {}:{}-{}",
        hit.score, hit.path, hit.start_line, hit.end_line
    )
}

#[allow(clippy::cast_precision_loss)]
fn render_progress(progress: &IndexProgress) {
    if progress.total_chunks == 0 {
        return;
    }
    let pct = (progress.completed_chunks as f64 / progress.total_chunks as f64) * 100.0;
    print!(
        "\r[{}/{} chunks] {pct:.1}% across {} files",
        progress.completed_chunks, progress.total_chunks, progress.total_files
    );
    let _ = io::stdout().flush();
}

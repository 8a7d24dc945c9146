use exemplar::cli::{Cli, Commands, ConfigAction};
use exemplar::config::RagConfig;
use exemplar::embedding::load_embedder;
use exemplar::error::{ExemplarError, Result};
use exemplar::index::build_index;
use exemplar::ingest::{CorpusLoader, HubCorpus, JsonlCorpus};
use exemplar::retrieval::Retriever;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

fn main() -> Result<()> {
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(cli.verbose);

    match cli.command {
        Commands::Build {
            max_chunks,
            source,
            no_save,
            timeout,
        } => {
            cmd_build(cli.config, max_chunks, source, !no_save, timeout)?;
        }
        Commands::Query {
            query,
            top_k,
            min_score,
            context,
            json,
        } => {
            cmd_query(cli.config, &query, top_k, min_score, context, json)?;
        }
        Commands::Stats { json } => {
            cmd_stats(cli.config, json)?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "exemplar=debug" } else { "exemplar=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt().with_env_filter(filter).with_target(false).init();
}

fn load_config(config_path: Option<PathBuf>) -> Result<RagConfig> {
    match config_path {
        Some(path) => {
            if !path.exists() {
                tracing::warn!(
                    "Config file not found, using defaults. Run 'exemplar config init' to create one."
                );
            }
            RagConfig::load(&path)
        }
        None => RagConfig::load_default(),
    }
}

fn cmd_build(
    config_path: Option<PathBuf>,
    max_chunks: Option<usize>,
    source: Option<PathBuf>,
    save: bool,
    timeout: u64,
) -> Result<()> {
    let config = Arc::new(load_config(config_path)?);

    println!("Embedding model: {}", config.embedding.model);
    println!("Index type: {}", config.index.index_type);
    println!("Datasets: {} enabled", config.enabled_sources().len());

    let embedder = Arc::new(load_embedder(&config.embedding)?);
    let loader: Box<dyn CorpusLoader> = match source {
        Some(dir) => Box::new(JsonlCorpus::new(dir)),
        None => Box::new(HubCorpus::new(Duration::from_secs(timeout))?),
    };

    let stats = build_index(
        Arc::clone(&config),
        embedder,
        loader.as_ref(),
        max_chunks,
        save,
    )?;

    println!("\n✓ Index build complete");
    println!("  Datasets loaded: {}", stats.ingest.datasets_loaded);
    println!("  Datasets failed: {}", stats.ingest.datasets_failed);
    println!("  Chunks created: {}", stats.ingest.chunks_created);
    println!("  Rows skipped: {}", stats.ingest.rows_skipped);
    println!("  Vectors indexed: {}", stats.vectors_indexed);
    println!("  Elapsed: {:.1}s", stats.elapsed_secs);
    if save && stats.vectors_indexed > 0 {
        println!("  Index saved to: {}", config.index_path().display());
    }

    Ok(())
}

fn cmd_query(
    config_path: Option<PathBuf>,
    query: &str,
    top_k: Option<usize>,
    min_score: Option<f32>,
    context: bool,
    json: bool,
) -> Result<()> {
    let config = Arc::new(load_config(config_path)?);
    let retriever = Retriever::new(Arc::clone(&config));

    if !retriever.is_available() {
        println!(
            "No index found at {}. Run 'exemplar build' first.",
            config.index_path().display()
        );
        return Ok(());
    }

    let results = retriever.retrieve(query, top_k, min_score)?;

    if json {
        let out = serde_json::to_string_pretty(&results).map_err(|e| ExemplarError::Json {
            source: e,
            context: "Failed to encode results".to_string(),
        })?;
        println!("{out}");
        return Ok(());
    }

    if context {
        print!("{}", retriever.format_context(&results, None));
        return Ok(());
    }

    if results.is_empty() {
        println!("No results above the score threshold.");
        return Ok(());
    }

    for result in &results {
        println!(
            "[{}] {:.3}  {}",
            result.rank,
            result.score,
            non_empty(result.source(), "Unknown")
        );
        println!("    Task: {}", first_line(result.instruction()));
    }

    let patterns = retriever.relevant_patterns(&results);
    if !patterns.is_empty() {
        let names: Vec<&str> = patterns.iter().map(String::as_str).collect();
        println!("\nPatterns: {}", names.join(", "));
    }

    Ok(())
}

fn cmd_stats(config_path: Option<PathBuf>, json: bool) -> Result<()> {
    let config = Arc::new(load_config(config_path)?);
    let retriever = Retriever::new(config);
    let stats = retriever.stats();

    if json {
        let out = serde_json::to_string_pretty(&stats).map_err(|e| ExemplarError::Json {
            source: e,
            context: "Failed to encode stats".to_string(),
        })?;
        println!("{out}");
        return Ok(());
    }

    println!("Available: {}", if stats.available { "yes" } else { "no" });
    if let Some(index) = &stats.index {
        println!("  Index type: {}", index.index_type);
        println!("  Vectors: {}", index.total_vectors);
        println!("  Dimension: {}", index.dimension);
        println!("  Metadata entries: {}", index.metadata_count);
        println!("  Trained: {}", index.is_trained);
        if let Some(build_id) = index.build_id {
            println!("  Build: {}", build_id);
        }
    }
    if let Some(error) = &stats.error {
        println!("  Error: {}", error);
    }

    Ok(())
}

fn cmd_config(config_path: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(config_path)?;
            println!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => RagConfig::default_path()?,
            };
            let config = RagConfig::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Sources enabled: {}", config.enabled_sources().len());
            println!("  Index path: {}", config.index_path().display());
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => RagConfig::default_path()?,
            };
            init_config(&path, force)?;
        }
    }

    Ok(())
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        println!("Configuration file already exists at: {}", path.display());
        println!("Use --force to overwrite");
        return Ok(());
    }

    RagConfig::default().save(path)?;
    println!("✓ Configuration initialized at: {}", path.display());
    Ok(())
}

fn non_empty<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.is_empty() {
        fallback
    } else {
        value
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}

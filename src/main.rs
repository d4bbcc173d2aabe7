use conflux::cli::{Cli, Commands, ConfigAction, QueryArgs};
use conflux::config::Config;
use conflux::error::{ConfluxError, Result};
use conflux::retrieval::{SearchFilters, SearchRequest, SearchResponse, SortBy};
use conflux::service::SearchService;
use conflux::storage::{format_size, Chunk};
use std::io::BufRead;
use std::path::{Path, PathBuf};

fn main() -> Result<()> {
    let cli = Cli::parse_args();

    init_logging(cli.verbose);

    match cli.command {
        Commands::Config { action } => cmd_config(cli.config, cli.profile, action),
        command => {
            let config = load_config(cli.config, cli.profile)?;
            let runtime = tokio::runtime::Runtime::new().map_err(|e| ConfluxError::Io {
                source: e,
                context: "Failed to create tokio runtime".to_string(),
            })?;
            runtime.block_on(run(config, command))
        }
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "conflux=debug" } else { "conflux=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(config: Config, command: Commands) -> Result<()> {
    let service = SearchService::open(&config).await?;

    match command {
        Commands::Index { file } => cmd_index(&service, &file).await,
        Commands::Search { args } => {
            let request = build_request(&service, &args)?;
            let response = service.search(&request).await?;
            print_response(&response, args.json)
        }
        Commands::Hybrid {
            args,
            dense_weight,
            lexical_weight,
            facets,
        } => {
            let mut request = build_request(&service, &args)?.with_facets(facets);
            if let Some(weight) = dense_weight {
                request.dense_weight = weight;
            }
            if let Some(weight) = lexical_weight {
                request.lexical_weight = weight;
            }
            let response = service.hybrid_search(&request).await?;
            print_response(&response, args.json)
        }
        Commands::Remove { file_id } => {
            if service.index_remove(&file_id).await? {
                println!("✓ Removed {}", file_id);
            } else {
                println!("File {} not found", file_id);
            }
            Ok(())
        }
        Commands::Stats { json } => {
            let stats = service.stats().await?;
            if json {
                return print_json(&stats);
            }
            println!("Conflux Statistics");
            println!("==================");
            println!("\nDocuments: {}", stats.document_count);
            println!("Chunks: {}", stats.chunk_count);
            println!("Index size: {}", format_size(stats.index_size));
            println!("Dense vectors: {}", stats.dense_vectors);
            println!("Lexical documents: {}", stats.lexical_documents);
            if !stats.content_types.is_empty() {
                println!("\nContent types:");
                for (content_type, count) in &stats.content_types {
                    println!("  {}: {}", content_type, count);
                }
            }
            Ok(())
        }
        Commands::Health { json } => {
            let health = service.health().await;
            if json {
                return print_json(&health);
            }
            println!("Overall: {:?}", health.overall);
            println!("  Dense index: {:?}", health.dense_index);
            println!("  Lexical index: {:?}", health.lexical_index);
            for issue in &health.issues {
                println!("  ⚠ {}", issue);
            }
            Ok(())
        }
        Commands::Explain { query, chunk_id } => {
            let explanation = service.explain(&query, &chunk_id).await?;
            print_json(&explanation)
        }
        Commands::Rebuild => {
            let report = service.rebuild().await?;
            println!(
                "✓ Rebuilt {} chunks (dense: {}, lexical: {})",
                report.chunks, report.dense, report.lexical
            );
            Ok(())
        }
        // handled before the runtime starts
        Commands::Config { .. } => Ok(()),
    }
}

async fn cmd_index(service: &SearchService, path: &Path) -> Result<()> {
    let file = std::fs::File::open(path).map_err(|e| ConfluxError::Io {
        source: e,
        context: format!("Failed to open chunks file: {:?}", path),
    })?;

    let mut chunks = Vec::new();
    for (line_no, line) in std::io::BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| ConfluxError::Io {
            source: e,
            context: format!("Failed to read {:?}", path),
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let mut chunk: Chunk = serde_json::from_str(&line).map_err(|e| ConfluxError::Json {
            source: e,
            context: format!("Invalid chunk on line {}", line_no + 1),
        })?;
        if chunk.chunk_id.is_empty() {
            chunk.chunk_id = uuid::Uuid::new_v4().to_string();
        }
        chunks.push(chunk);
    }

    let report = service.index_add(&chunks).await?;
    println!(
        "✓ Indexed {} chunks ({} new in store, dense +{}, lexical +{})",
        chunks.len(),
        report.chunks_stored,
        report.dense_added,
        report.lexical_added
    );
    Ok(())
}

fn build_request(service: &SearchService, args: &QueryArgs) -> Result<SearchRequest> {
    let mut request = service.request(args.query.clone());
    if let Some(limit) = args.limit {
        request.limit = limit;
    }
    if let Some(threshold) = args.threshold {
        request.threshold = threshold;
    }

    let mut filters = SearchFilters {
        file_types: args.file_types.clone(),
        content_types: args.content_types.clone(),
        date_from: args.from.as_deref().map(parse_time).transpose()?,
        date_to: args.to.as_deref().map(parse_time).transpose()?,
        ..Default::default()
    };
    for pair in &args.metadata {
        let (key, value) = pair.split_once('=').ok_or_else(|| {
            ConfluxError::InvalidRequest(format!("Metadata filter must be KEY=VALUE: {}", pair))
        })?;
        // non-JSON values are matched as strings
        let value = serde_json::from_str(value)
            .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        filters.metadata.insert(key.to_string(), value);
    }

    Ok(request
        .with_filters(filters)
        .with_sort(SortBy::from(args.sort.as_str())))
}

fn parse_time(value: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&chrono::Utc))
        .map_err(|e| ConfluxError::InvalidRequest(format!("Invalid time '{}': {}", value, e)))
}

fn print_response(response: &SearchResponse, json: bool) -> Result<()> {
    if json {
        return print_json(response);
    }

    println!(
        "{} results for '{}' ({}, {} ms)",
        response.total_results, response.query, response.search_type, response.processing_time_ms
    );
    for degradation in &response.degradations {
        println!("⚠ {} path unavailable: {}", degradation.path, degradation.reason);
    }

    for (rank, result) in response.results.iter().enumerate() {
        let preview: String = result.content.chars().take(120).collect();
        println!(
            "\n{}. {} [{}] score {:.3} (dense {:.3}, lexical {:.3})",
            rank + 1,
            result.filename,
            result.chunk_id,
            result.score,
            result.component_scores.dense,
            result.component_scores.lexical
        );
        println!("   {}", preview.replace('\n', " "));
    }

    if let Some(facets) = &response.facets {
        println!("\nFacets:");
        for (name, counts) in [
            ("file types", &facets.file_types),
            ("content types", &facets.content_types),
            ("authors", &facets.authors),
            ("dates", &facets.date_ranges),
        ] {
            if !counts.is_empty() {
                let rendered: Vec<String> =
                    counts.iter().map(|(k, v)| format!("{}: {}", k, v)).collect();
                println!("  {}: {}", name, rendered.join(", "));
            }
        }
    }

    if !response.suggestions.is_empty() {
        println!("\nTry: {}", response.suggestions.join(" | "));
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(|e| ConfluxError::Json {
        source: e,
        context: "Failed to serialize output".to_string(),
    })?;
    println!("{}", json);
    Ok(())
}

fn cmd_config(
    config_path: Option<PathBuf>,
    profile: Option<String>,
    action: ConfigAction,
) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(config_path, profile)?;
            let toml = toml::to_string_pretty(&config)?;
            println!("{}", toml);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            Config::default().save(&path)?;
            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>, profile: Option<String>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'conflux config init' to create one."
        );
    }

    match profile {
        Some(profile) => Config::load_with_profile(&path, &profile),
        None => Config::load_or_default(&path),
    }
}

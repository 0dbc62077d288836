use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{error, info, warn};

use lifeline_import::config::Config;
use lifeline_import::logging;
use lifeline_import::normalize::LayerClassifier;
use lifeline_import::parser::extract_image_metadata;
use lifeline_import::storage::InMemoryEventStore;
use lifeline_import::{ImportOrchestrator, ImportResult, PipelineError, SourceKind};

#[derive(Parser)]
#[command(name = "lifeline-import")]
#[command(about = "Turn third-party life-history exports into timeline events")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import export files of one source kind
    Import {
        /// Source kind: facebook, linkedin, google_takeout, ical, csv
        #[arg(long)]
        source: String,
        /// Hand the imported events to the event store
        #[arg(long)]
        commit: bool,
        /// Directory for the JSON result (defaults to the configured output dir)
        #[arg(long)]
        output: Option<PathBuf>,
        /// Files or ZIP archives to import
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Show which layer a piece of text is filed under
    Classify {
        text: String,
        /// Treat the text as having a location attached
        #[arg(long)]
        has_location: bool,
    },
    /// Print the metadata embedded in an image
    InspectImage { file: PathBuf },
}

fn print_summary(kind: SourceKind, result: &ImportResult) {
    println!("\n📊 Import results for {}:", kind);
    println!(
        "   Files: {} ({} processed)",
        result.stats.total_files, result.stats.processed_files
    );
    println!("   Events: {}", result.stats.total_events);
    for (layer, count) in &result.stats.events_by_layer {
        println!("     {:<14} {}", layer.as_str(), count);
    }
    println!("   Skipped: {}", result.stats.skipped);
    println!("   Errors: {}", result.errors.len());

    if !result.errors.is_empty() {
        warn!("{} errors encountered during import", result.errors.len());
        println!("\n⚠️  Errors encountered:");
        for error in result.errors.iter().take(20) {
            println!("   - {}", error);
        }
        if result.errors.len() > 20 {
            println!("   ... and {} more", result.errors.len() - 20);
        }
    }
}

async fn run_import(
    config: &Config,
    source: &str,
    commit: bool,
    output: Option<PathBuf>,
    files: Vec<PathBuf>,
) -> anyhow::Result<()> {
    let kind = SourceKind::from_str(source).map_err(PipelineError::UnknownSource)?;
    let orchestrator = ImportOrchestrator::new(config.adapter_settings());

    let cancel = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, cancelling after the current file");
            cancel.cancel();
        }
    });

    println!("🔄 Importing {} file(s) as {}...", files.len(), kind);
    let result = orchestrator.import_paths(kind, &files).await?;
    print_summary(kind, &result);

    let output_dir = output.unwrap_or_else(|| config.paths.output_dir.clone());
    let output_file = ImportOrchestrator::persist_to_json(&result, kind, &output_dir)
        .with_context(|| format!("writing result to {}", output_dir.display()))?;
    println!("   Output file: {}", output_file.display());

    if commit {
        let store = InMemoryEventStore::new();
        let written = orchestrator
            .commit(&store, &config.store.owner_id, &result.events)
            .await?;
        println!("💾 Committed {} events ({} stored)", written, store.len());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let config = Config::load()?;
    let _guard = logging::init_logging(&config.paths.log_dir);

    let cli = Cli::parse();

    match cli.command {
        Commands::Import {
            source,
            commit,
            output,
            files,
        } => {
            if let Err(e) = run_import(&config, &source, commit, output, files).await {
                error!("Import failed: {:#}", e);
                return Err(e);
            }
            info!("Import finished");
        }
        Commands::Classify { text, has_location } => {
            let classifier =
                LayerClassifier::new(config.classifier.min_score, config.classifier.default_layer);
            let verdict = classifier.classify(&text, has_location);
            println!("🏷️  {} (score {})", verdict.layer, verdict.score);
            if !verdict.matched_keywords.is_empty() {
                println!("   matched: {}", verdict.matched_keywords.join(", "));
            }
        }
        Commands::InspectImage { file } => {
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            match extract_image_metadata(&bytes) {
                Some(metadata) => println!("{}", serde_json::to_string_pretty(&metadata)?),
                None => println!("⚠️  No embedded metadata found in {}", file.display()),
            }
        }
    }

    Ok(())
}

//! ISE CLI - Command-line interface
//!
//! Usage:
//!   ise run <relation> <threshold> <query> <nr_tuples>
//!   ise relations

mod output;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ise_core::{AppConfig, LoggingConfig, Relation};
use ise_expand::{CancellationToken, Checkpoint, ExpansionController};
use ise_extractor::{CoreNlpClient, PipelineConfig, RelationPipeline};
use ise_search::{GoogleSearchClient, TikaTextFetcher};

#[derive(Parser)]
#[command(name = "ise")]
#[command(about = "Iterative set expansion for relation extraction")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Expand a relation from a seed query
    Run(RunArgs),
    /// List supported relations
    Relations,
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Relation number (1-4) or name, e.g. 4 or Work_For
    relation: Relation,

    /// Minimal confidence for a reported tuple, in (0, 1]
    threshold: f64,

    /// Seed query, e.g. "bill gates microsoft"
    query: String,

    /// Number of tuples to collect before stopping
    nr_tuples: usize,

    /// Search API key (or GSEARCH_JSON_API)
    #[arg(long)]
    api_key: Option<String>,

    /// Search engine ID (or GSEARCH_ENGINE)
    #[arg(long)]
    engine: Option<String>,

    /// TOML configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,

    #[arg(long)]
    max_iterations: Option<u32>,

    /// Documents extracted concurrently
    #[arg(long)]
    concurrency: Option<usize>,

    /// Write a checkpoint here after every iteration
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// Continue from the checkpoint instead of starting over
    #[arg(long, requires = "checkpoint")]
    resume: bool,

    /// Write the final run report as JSON
    #[arg(long)]
    report: Option<PathBuf>,
}

impl RunArgs {
    fn query_terms(&self) -> Vec<String> {
        self.query.split_whitespace().map(str::to_string).collect()
    }

    /// File, then environment, then command line
    fn load_config(&self) -> anyhow::Result<AppConfig> {
        let mut config = match &self.config {
            Some(path) => AppConfig::from_file(path)?.with_env_override()?,
            None => AppConfig::from_env()?,
        };

        let e = &mut config.expansion;
        e.relation = self.relation;
        e.threshold = self.threshold;
        e.target_tuples = self.nr_tuples;
        if let Some(n) = self.max_iterations {
            e.max_iterations = n;
        }
        if let Some(n) = self.concurrency {
            e.concurrency = n;
        }
        if let Some(path) = &self.checkpoint {
            e.checkpoint_path = Some(path.clone());
        }
        if let Some(key) = &self.api_key {
            config.search.api_key = Some(key.clone());
        }
        if let Some(engine) = &self.engine {
            config.search.engine_id = Some(engine.clone());
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &logging.level;
        EnvFilter::new(format!(
            "warn,ise={level},ise_core={level},ise_expand={level},ise_extractor={level},ise_search={level}"
        ))
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_file(logging.include_location)
        .with_line_number(logging.include_location);

    if logging.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let config = args.load_config()?;
    init_tracing(&config.logging);

    let query = args.query_terms();
    print!("{}", output::parameters(&config, &query.join(" ")));

    // Collaborators
    let search = Arc::new(GoogleSearchClient::from_config(&config.search)?);
    let fetcher = Arc::new(TikaTextFetcher::from_config(&config.fetch)?);
    let annotator = Arc::new(CoreNlpClient::from_config(&config.nlp)?);
    let extractor = Arc::new(RelationPipeline::new(
        annotator,
        PipelineConfig::from_config(&config.expansion, &config.nlp),
    ));

    let checkpoint = match &config.expansion.checkpoint_path {
        Some(path) if args.resume && path.exists() => Some(
            Checkpoint::load(path)
                .with_context(|| format!("Failed to load checkpoint {}", path.display()))?,
        ),
        Some(path) if args.resume => {
            tracing::warn!("No checkpoint at {}, starting a new run", path.display());
            None
        }
        _ => None,
    };

    let mut controller = match checkpoint {
        Some(checkpoint) => ExpansionController::resume(
            search,
            fetcher,
            extractor,
            config.expansion.clone(),
            checkpoint,
        )?,
        None => ExpansionController::new(search, fetcher, extractor, config.expansion.clone(), query)?,
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing current documents");
            on_signal.cancel();
        }
    });

    let report = controller
        .run_with(&cancel, |iteration| print!("{}", output::iteration(iteration)))
        .await?;

    println!("{}", output::stop_message(&report));
    println!(
        "Run {}: {} iterations, {} documents, {} raw tuples, {} distinct, {} above threshold",
        report.run_id,
        report.iterations,
        report.processed_documents,
        report.raw_tuples,
        report.merged_tuples,
        report.ranked.len()
    );

    if let Some(path) = &args.report {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report {}", path.display()))?;
        tracing::info!("Report written to {}", path.display());
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run(args).await?,
        Commands::Relations => {
            for relation in Relation::ALL {
                println!("{}. {}", relation.number(), relation);
            }
        }
    }

    Ok(())
}

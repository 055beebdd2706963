//! AgentLong evaluation CLI

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use agentlong_eval::{
    analysis::{evaluate_files, AnswerExtractor, EvaluationEngine},
    config::Config,
    dataset::{load_jsonl_lenient, write_jsonl, Dataset, DatasetContext, PredictionRecord},
    providers::{create_provider, list_services},
    reporting::{print_console_report, write_details, MetricReport},
    runner::{ConsoleProgress, PredictionRunner, RunnerConfig},
};

#[derive(Parser)]
#[command(name = "agentlong-eval")]
#[command(about = "Answer extraction and scoring for the AgentLong guessing-game benchmark")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Query a model for every sample and write predictions
    Run {
        /// Dataset JSONL file
        #[arg(short, long)]
        dataset: PathBuf,

        /// Output prediction JSONL file
        #[arg(short, long)]
        output: PathBuf,

        /// Start from this sample index
        #[arg(long, default_value = "0")]
        offset: usize,

        /// Optional cap on number of samples
        #[arg(long)]
        limit: Option<usize>,

        /// Service name (default: runner.service from config)
        #[arg(short, long)]
        service: Option<String>,

        /// Number of parallel requests
        #[arg(short, long)]
        workers: Option<usize>,

        /// Start over instead of resuming from the output file
        #[arg(long)]
        no_resume: bool,

        /// Disable streaming responses
        #[arg(long)]
        no_stream: bool,

        /// Dataset context such as `kf-v` (default: inferred from the path)
        #[arg(long)]
        context: Option<DatasetContext>,
    },

    /// Score a prediction file against its dataset
    Evaluate {
        /// Dataset JSONL file
        #[arg(short, long)]
        dataset: PathBuf,

        /// Prediction JSONL file
        #[arg(short, long)]
        predictions: PathBuf,

        /// Dataset context such as `kf-v` (default: inferred from the path)
        #[arg(long)]
        context: Option<DatasetContext>,

        /// Write the metric report as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write per-sample details as JSONL
        #[arg(long)]
        details: Option<PathBuf>,
    },

    /// Re-extract answers from the raw responses of a prediction file
    Reparse {
        /// Dataset JSONL file
        #[arg(short, long)]
        dataset: PathBuf,

        /// Prediction JSONL file
        #[arg(short, long)]
        predictions: PathBuf,

        /// Output file (default: overwrite the prediction file)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Dataset context such as `kf-v` (default: inferred from the path)
        #[arg(long)]
        context: Option<DatasetContext>,
    },

    /// Generate sample configuration
    InitConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config/eval.toml")]
        output: PathBuf,
    },

    /// List services from config and environment
    ListServices,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("agentlong_eval=debug,info")
    } else {
        EnvFilter::new("agentlong_eval=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .init();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load_or_default(),
    };

    match cli.command {
        Commands::Run {
            dataset,
            output,
            offset,
            limit,
            service,
            workers,
            no_resume,
            no_stream,
            context,
        } => {
            let options = RunOptions {
                offset,
                limit,
                service,
                workers,
                resume: !no_resume,
                stream: !no_stream,
                context,
            };
            run_predictions(&config, dataset, output, options).await?;
        }

        Commands::Evaluate {
            dataset,
            predictions,
            context,
            output,
            details,
        } => {
            evaluate(&config, dataset, predictions, context, output, details)?;
        }

        Commands::Reparse {
            dataset,
            predictions,
            output,
            context,
        } => {
            reparse(&config, dataset, predictions, output, context)?;
        }

        Commands::InitConfig { output } => {
            init_config(output)?;
        }

        Commands::ListServices => {
            let services = list_services(&config);
            if services.is_empty() {
                println!("No services configured.");
            }
            for service in services {
                println!("{}", service);
            }
        }
    }

    Ok(())
}

struct RunOptions {
    offset: usize,
    limit: Option<usize>,
    service: Option<String>,
    workers: Option<usize>,
    resume: bool,
    stream: bool,
    context: Option<DatasetContext>,
}

async fn run_predictions(
    config: &Config,
    dataset_path: PathBuf,
    output: PathBuf,
    options: RunOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let dataset = Dataset::load_slice(&dataset_path, options.context, options.offset, options.limit)?;
    tracing::info!(
        "Loaded {} samples of {} ({})",
        dataset.len(),
        dataset.archetype,
        dataset.context
    );

    let service = options
        .service
        .or_else(|| config.runner.service.clone())
        .ok_or("No service given: pass --service or set runner.service in the config")?;
    let provider = create_provider(&service, config)?;

    let mut runner_config = RunnerConfig::from(&config.runner);
    if let Some(workers) = options.workers {
        runner_config.workers = workers.max(1);
    }
    runner_config.resume = runner_config.resume && options.resume;
    runner_config.stream = runner_config.stream && options.stream;

    let engine = EvaluationEngine::for_dataset(&dataset).with_extractor(extractor(config)?);
    let runner = PredictionRunner::new(provider, engine, runner_config)
        .with_progress(Arc::new(ConsoleProgress));

    let summary = runner.run(&dataset, &output).await?;
    println!(
        "Done: {} new, {} failed, {} already completed. Wrote {} records to {}",
        summary.succeeded,
        summary.failed,
        summary.already_done,
        summary.records_written,
        output.display()
    );
    Ok(())
}

fn evaluate(
    config: &Config,
    dataset: PathBuf,
    predictions: PathBuf,
    context: Option<DatasetContext>,
    output: Option<PathBuf>,
    details: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let evaluation = evaluate_files(&dataset, &predictions, context, extractor(config)?)?;
    let report = MetricReport::from_evaluation(&evaluation);
    print_console_report(&report);

    if let Some(path) = output {
        report.write_to_file(&path)?;
        println!("Report written to: {}", path.display());
    }
    if let Some(path) = details {
        let written = write_details(&evaluation, &path)?;
        println!("{} sample details written to: {}", written, path.display());
    }
    Ok(())
}

fn reparse(
    config: &Config,
    dataset: PathBuf,
    predictions: PathBuf,
    output: Option<PathBuf>,
    context: Option<DatasetContext>,
) -> Result<(), Box<dyn std::error::Error>> {
    let dataset = Dataset::load(&dataset, context)?;
    let engine = EvaluationEngine::for_dataset(&dataset).with_extractor(extractor(config)?);

    if !predictions.exists() {
        return Err(format!("Prediction file not found: {}", predictions.display()).into());
    }
    let mut records: Vec<PredictionRecord> = load_jsonl_lenient(&predictions)?;
    let mut changed = 0;
    for record in &mut records {
        let before = record.pred_answer.clone();
        engine.reparse(record);
        if record.pred_answer != before {
            changed += 1;
        }
    }

    let output = output.unwrap_or(predictions);
    write_jsonl(&output, &records)?;
    println!(
        "Reparsed {} records ({} changed), written to: {}",
        records.len(),
        changed,
        output.display()
    );
    Ok(())
}

fn init_config(output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    Config::sample().save_toml(&output)?;
    println!("Configuration written to: {}", output.display());
    Ok(())
}

fn extractor(config: &Config) -> Result<AnswerExtractor, regex::Error> {
    AnswerExtractor::with_tag(&config.evaluation.answer_tag)
}

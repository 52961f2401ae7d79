use anyhow::Result;
use catalog_cli::{commands, watch};
use catalog_core::config::{self, keys, ConfigProvider};
use catalog_core::jobs::{JobRequest, JobState};
use catalog_core::pipeline;
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let cfg = config::load(cli.config.as_deref())?;
    let pipeline = pipeline::build(&cfg).await?;

    let request = match cli.command {
        Commands::Refresh { json } => (JobRequest::Refresh, json),
        Commands::Move {
            item,
            items_file,
            continue_on_error,
            no_create_dirs,
            json,
        } => {
            let req = commands::build_move_request(
                &item,
                items_file.as_deref(),
                continue_on_error,
                !no_create_dirs,
            )?;
            (JobRequest::Move(req), json)
        }
        Commands::Categorize { json } => (JobRequest::ForceCategorize, json),
        Commands::Train { json } => (JobRequest::Train, json),
        Commands::Info { json } => {
            let info = pipeline.classifier.info().await?;
            commands::print_model_info(&info, json)?;
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Watch { debounce_ms } => {
            let origin = PathBuf::from(cfg.require(keys::ORIGIN_DIRECTORY)?);
            watch::watch_origin(
                &pipeline.orchestrator,
                &origin,
                cfg.scan.recursive,
                Duration::from_millis(debounce_ms),
            )
            .await?;
            return Ok(ExitCode::SUCCESS);
        }
    };

    let (request, json) = request;
    let status = commands::run_job(&pipeline.orchestrator, request, json).await?;
    commands::print_status(&status, json)?;
    Ok(if status.state == JobState::Succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[derive(Parser)]
#[command(name = "catalog")]
#[command(about = "File catalogue: scan, categorize and file away", long_about = None)]
struct Cli {
    /// Path to config TOML
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register new files from the origin directory
    Refresh {
        /// Output JSON status
        #[arg(long)]
        json: bool,
    },
    /// Move files into category folders under the destination root
    Move {
        /// FILE_ID=CATEGORY, repeatable
        #[arg(long)]
        item: Vec<String>,
        /// JSON array of {"file_id", "target_category"} objects
        #[arg(long)]
        items_file: Option<PathBuf>,
        /// Keep going past unknown ids and failed moves (false aborts on any unknown id)
        #[arg(long, default_value_t = true, action = ArgAction::Set)]
        continue_on_error: bool,
        /// Fail items whose category folder does not exist yet
        #[arg(long, default_value_t = false)]
        no_create_dirs: bool,
        /// Output JSON status
        #[arg(long)]
        json: bool,
    },
    /// Classify every record still waiting for a category
    Categorize {
        /// Output JSON status
        #[arg(long)]
        json: bool,
    },
    /// Retrain the classifier from the training log
    Train {
        /// Output JSON status
        #[arg(long)]
        json: bool,
    },
    /// Show the model artifact
    Info {
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Re-run refresh whenever files land in the origin directory
    Watch {
        /// Quiet period before a burst of events triggers a refresh
        #[arg(long, default_value_t = 500)]
        debounce_ms: u64,
    },
}

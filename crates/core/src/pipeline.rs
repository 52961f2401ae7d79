use crate::categorize;
use crate::classifier::ClassifierCache;
use crate::config::{keys, AppConfig, ConfigProvider};
use crate::error::{PipelineError, Result};
use crate::jobs::{JobContext, JobOrchestrator, JobRequest, JobRunner};
use crate::mover::BatchMover;
use crate::progress::{ProgressChannel, ProgressPayload};
use crate::scanner::{self, ScanOptions};
use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use storage::{connect, migrate, BatchGateway, SqliteGateway};
use tracing::info;

/// Dispatches each job kind to the module that implements it.
pub struct Catalog {
    gateway: Arc<dyn BatchGateway>,
    classifier: Arc<ClassifierCache>,
    config: Arc<dyn ConfigProvider>,
    scan: ScanOptions,
    batch_size: usize,
}

impl Catalog {
    pub fn new(
        gateway: Arc<dyn BatchGateway>,
        classifier: Arc<ClassifierCache>,
        config: Arc<dyn ConfigProvider>,
        scan: ScanOptions,
        batch_size: usize,
    ) -> Self {
        Self {
            gateway,
            classifier,
            config,
            scan,
            batch_size: batch_size.max(1),
        }
    }
}

#[async_trait::async_trait]
impl JobRunner for Catalog {
    async fn run(&self, request: JobRequest, ctx: JobContext) -> Result<serde_json::Value> {
        match request {
            JobRequest::Refresh => {
                let origin = PathBuf::from(self.config.require(keys::ORIGIN_DIRECTORY)?);
                let summary = scanner::refresh(
                    self.gateway.as_ref(),
                    &self.classifier,
                    &origin,
                    &self.scan,
                    &ctx,
                )
                .await?;
                Ok(serde_json::to_value(summary)?)
            }
            JobRequest::Move(req) => {
                let mover = BatchMover::new(
                    Arc::clone(&self.gateway),
                    Arc::clone(&self.config),
                    self.batch_size,
                );
                let report = mover.run(&req, &ctx).await?;
                let value = serde_json::to_value(&report)?;
                if report.aborted {
                    ctx.set_metadata("report", value);
                    return Err(PipelineError::MissingFileIds(report.missing_ids));
                }
                if report.cancelled {
                    ctx.set_metadata("report", value);
                    return Err(PipelineError::Cancelled);
                }
                Ok(value)
            }
            JobRequest::ForceCategorize => {
                let summary = categorize::force_categorize(
                    self.gateway.as_ref(),
                    &self.classifier,
                    self.batch_size,
                    &ctx,
                )
                .await?;
                Ok(serde_json::to_value(summary)?)
            }
            JobRequest::Train => {
                ctx.set_total(1);
                ctx.publish(ProgressPayload::message("training classifier"));
                let descriptor = self.classifier.train_and_save().await?;
                ctx.advance(1);
                Ok(serde_json::to_value(descriptor)?)
            }
        }
    }
}

/// Everything a front end needs, wired from one `AppConfig`.
pub struct Pipeline {
    pub orchestrator: JobOrchestrator,
    pub classifier: Arc<ClassifierCache>,
    pub gateway: Arc<dyn BatchGateway>,
    pub progress: ProgressChannel,
}

pub async fn build(config: &AppConfig) -> anyhow::Result<Pipeline> {
    let pool = connect(&config.database.path).await.context("db connect")?;
    migrate(&pool).await.context("db migrate")?;
    let gateway: Arc<dyn BatchGateway> = Arc::new(SqliteGateway::new(pool));
    Ok(assemble(config, gateway))
}

/// Wires a pipeline around an existing gateway.
pub fn assemble(config: &AppConfig, gateway: Arc<dyn BatchGateway>) -> Pipeline {
    let settings: Arc<dyn ConfigProvider> = Arc::new(config.clone());
    let classifier = Arc::new(ClassifierCache::new(Arc::clone(&settings)));
    let progress = ProgressChannel::default();
    let scan = ScanOptions {
        exclude: config.scan.exclude.clone(),
        recursive: config.scan.recursive,
        batch_size: config.jobs.batch_size,
    };
    let catalog = Catalog::new(
        Arc::clone(&gateway),
        Arc::clone(&classifier),
        settings,
        scan,
        config.jobs.batch_size,
    );
    let orchestrator =
        JobOrchestrator::new(Arc::new(catalog), progress.clone(), config.jobs.workers);
    info!(workers = config.jobs.workers, batch_size = config.jobs.batch_size, "pipeline ready");
    Pipeline {
        orchestrator,
        classifier,
        gateway,
        progress,
    }
}

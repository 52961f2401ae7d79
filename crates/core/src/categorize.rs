use crate::classifier::ClassifierCache;
use crate::error::Result;
use crate::jobs::JobContext;
use serde::Serialize;
use std::collections::BTreeMap;
use storage::BatchGateway;
use tracing::info;

#[derive(Debug, Clone, Default, Serialize)]
pub struct CategorizeSummary {
    pub total: usize,
    pub updated: usize,
    pub by_category: BTreeMap<String, usize>,
}

/// The `forceCategorize` operation: classify every record still waiting
/// for a category, one batch at a time.
pub async fn force_categorize(
    gateway: &dyn BatchGateway,
    classifier: &ClassifierCache,
    batch_size: usize,
    ctx: &JobContext,
) -> Result<CategorizeSummary> {
    let pending = gateway.get_uncategorized().await?;
    ctx.set_total(pending.len());
    let mut summary = CategorizeSummary {
        total: pending.len(),
        ..Default::default()
    };
    info!(pending = pending.len(), "starting forced categorization");

    for batch in pending.chunks(batch_size.max(1)) {
        ctx.checkpoint()?;
        let classified = classifier.predict_batch(batch.to_vec()).await?;
        for record in &classified {
            if let Some(category) = &record.category {
                *summary.by_category.entry(category.clone()).or_default() += 1;
            }
        }
        summary.updated += gateway.batch_update(&classified).await?;
        ctx.advance(batch.len());
    }

    info!(updated = summary.updated, "forced categorization complete");
    Ok(summary)
}

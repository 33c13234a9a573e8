//! Bulk generation: one batch record, articles generated strictly in order,
//! each article's failure isolated from its siblings.
use crate::ai::{ContentGenerator, GenerationRequest, ProviderSet};
use crate::db;
use crate::error::{JobError, JobResult};
use crate::media::MediaResolver;
use crate::model::{AiModel, ArticleInput, BatchStatus, BatchSummary, GenerationBatch, NewArtifact};
use crate::postprocess::render_article;
use crate::quota::QuotaGate;
use crate::settings::ContentSettings;
use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReceipt {
    pub batch_id: i64,
    pub status: BatchStatus,
}

#[derive(Clone)]
pub struct BatchProcessor {
    pool: SqlitePool,
    quota: Arc<dyn QuotaGate>,
    providers: ProviderSet,
    media: Arc<dyn MediaResolver>,
    default_settings: ContentSettings,
    max_articles: usize,
}

impl BatchProcessor {
    pub fn new(
        pool: SqlitePool,
        quota: Arc<dyn QuotaGate>,
        providers: ProviderSet,
        media: Arc<dyn MediaResolver>,
    ) -> Self {
        Self {
            pool,
            quota,
            providers,
            media,
            default_settings: ContentSettings::default(),
            max_articles: usize::MAX,
        }
    }

    pub fn with_default_model(mut self, model: AiModel) -> Self {
        self.default_settings.settings.ai_model = model;
        self
    }

    pub fn with_max_articles(mut self, max_articles: usize) -> Self {
        self.max_articles = max_articles;
        self
    }

    /// Validate, check the bulk gate, and persist a new batch with every
    /// article pending. Nothing is written when any check fails.
    #[instrument(skip(self, articles), fields(count = articles.len()))]
    pub async fn create(&self, owner_id: i64, articles: &[ArticleInput]) -> JobResult<i64> {
        validate_articles(articles, self.max_articles)?;

        let decision = self
            .quota
            .can_create_bulk_posts(owner_id)
            .await
            .context("quota check failed")?;
        if !decision.allowed {
            return Err(JobError::Unauthorized(decision.message));
        }

        let batch_id = db::insert_batch(&self.pool, owner_id, articles, Utc::now()).await?;
        info!(batch_id, owner_id, total = articles.len(), "batch created");
        Ok(batch_id)
    }

    /// Create the batch and start processing it in the background. Returns
    /// as soon as the batch is stored.
    pub async fn submit(&self, owner_id: i64, articles: &[ArticleInput]) -> JobResult<SubmitReceipt> {
        let batch_id = self.create(owner_id, articles).await?;
        self.spawn(batch_id);
        Ok(SubmitReceipt {
            batch_id,
            status: BatchStatus::Processing,
        })
    }

    /// Run `process` on its own task. At most one task may be spawned per
    /// batch.
    pub fn spawn(&self, batch_id: i64) -> JoinHandle<()> {
        let processor = self.clone();
        tokio::spawn(async move {
            if let Err(err) = processor.process(batch_id).await {
                error!(batch_id, %err, "batch processing aborted");
            }
        })
    }

    /// Generate every article of the batch in array order. Article failures
    /// are recorded on the article; only a missing batch or a store failure
    /// aborts the run.
    #[instrument(skip(self))]
    pub async fn process(&self, batch_id: i64) -> JobResult<GenerationBatch> {
        let mut batch = db::fetch_batch(&self.pool, batch_id)
            .await?
            .ok_or_else(|| JobError::NotFound(format!("batch {}", batch_id)))?;
        if batch.status == BatchStatus::Completed {
            debug!(batch_id, "batch already completed");
            return Ok(batch);
        }

        let settings = self.owner_settings(batch.owner_id).await?;
        let generator = self.providers.select(settings.settings.ai_model);
        info!(
            batch_id,
            model = settings.settings.ai_model.as_str(),
            total = batch.total_articles,
            "processing batch"
        );

        for index in 0..batch.total_articles {
            if batch.article(index)?.status.is_terminal() {
                continue;
            }
            let request = GenerationRequest::for_article(batch.begin_article(index)?, &settings);
            match self
                .generate_article(generator.as_ref(), &batch, &request)
                .await
            {
                Ok(artifact) => {
                    let artifact_id = self.record_ready(&mut batch, index, &artifact).await?;
                    info!(batch_id, index, artifact_id, "article ready");
                }
                Err(err) => {
                    warn!(batch_id, index, error = %format!("{:#}", err), "article failed");
                    batch.mark_failed(index, format!("{:#}", err))?;
                    db::save_batch(&self.pool, &batch).await?;
                }
            }
        }

        batch.complete(Utc::now())?;
        db::save_batch(&self.pool, &batch).await?;
        info!(
            batch_id,
            completed = batch.completed_articles,
            failed = batch.failed_articles(),
            "batch completed"
        );
        Ok(batch)
    }

    async fn generate_article(
        &self,
        generator: &dyn ContentGenerator,
        batch: &GenerationBatch,
        request: &GenerationRequest,
    ) -> Result<NewArtifact> {
        let raw = generator.generate(request).await?;
        if raw.trim().is_empty() {
            anyhow::bail!("provider returned empty content");
        }
        let rendered = render_article(self.media.as_ref(), request, &raw).await;
        Ok(NewArtifact {
            owner_id: batch.owner_id,
            batch_id: Some(batch.id),
            title: request.title.clone(),
            main_keyword: request.main_keyword.clone(),
            keywords: request.keywords.clone(),
            content: rendered.content,
            seo: rendered.seo,
            settings: request.settings.clone(),
        })
    }

    /// The artifact row and the article's `ready` state commit together.
    async fn record_ready(
        &self,
        batch: &mut GenerationBatch,
        index: usize,
        artifact: &NewArtifact,
    ) -> JobResult<i64> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to open article transaction")?;
        let artifact_id = db::insert_artifact(&mut *tx, artifact, Utc::now()).await?;
        batch.mark_ready(index, artifact_id)?;
        db::save_batch(&mut *tx, batch).await?;
        tx.commit().await.context("failed to commit article")?;
        Ok(artifact_id)
    }

    async fn owner_settings(&self, owner_id: i64) -> Result<ContentSettings> {
        let mut settings = self.default_settings.clone();
        if let Some(model) = db::fetch_user(&self.pool, owner_id)
            .await?
            .and_then(|u| u.ai_model)
        {
            settings.settings.ai_model = model;
        }
        Ok(settings)
    }

    pub async fn status(&self, batch_id: i64) -> JobResult<BatchSummary> {
        db::fetch_batch(&self.pool, batch_id)
            .await?
            .map(|b| b.summary())
            .ok_or_else(|| JobError::NotFound(format!("batch {}", batch_id)))
    }

    /// Restart batches left in `processing`, e.g. after a crash. Articles
    /// that already reached a terminal state are not generated again.
    pub async fn resume_unfinished(&self) -> JobResult<Vec<JoinHandle<()>>> {
        let ids = db::list_batch_ids_with_status(&self.pool, BatchStatus::Processing).await?;
        if !ids.is_empty() {
            info!(count = ids.len(), "resuming unfinished batches");
        }
        Ok(ids.into_iter().map(|id| self.spawn(id)).collect())
    }
}

fn validate_articles(articles: &[ArticleInput], max_articles: usize) -> JobResult<()> {
    if articles.is_empty() {
        return Err(JobError::Validation("articles must be non-empty".into()));
    }
    if articles.len() > max_articles {
        return Err(JobError::Validation(format!(
            "at most {} articles per batch",
            max_articles
        )));
    }
    for (index, article) in articles.iter().enumerate() {
        if article.main_keyword.trim().is_empty() {
            return Err(JobError::Validation(format!(
                "article {}: mainKeyword must be non-empty",
                index
            )));
        }
        if article.title.trim().is_empty() {
            return Err(JobError::Validation(format!(
                "article {}: title must be non-empty",
                index
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(keyword: &str, title: &str) -> ArticleInput {
        ArticleInput {
            main_keyword: keyword.into(),
            title: title.into(),
            keywords: vec![],
        }
    }

    #[test]
    fn validation_rules() {
        assert!(matches!(
            validate_articles(&[], 10),
            Err(JobError::Validation(_))
        ));
        assert!(validate_articles(&[input("k", "t")], 10).is_ok());
        assert!(validate_articles(&[input(" ", "t")], 10).is_err());
        assert!(validate_articles(&[input("k", "")], 10).is_err());
        let many = vec![input("k", "t"); 3];
        let err = validate_articles(&many, 2).unwrap_err();
        assert!(err.to_string().contains("at most 2"));
    }
}

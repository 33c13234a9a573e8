//! Settings updates on a stored artifact. A `full` impact regenerates the
//! article with a freshly built generation request; lower tiers only report
//! the classification.
use crate::ai::{GenerationRequest, ProviderSet};
use crate::db;
use crate::error::{JobError, JobResult};
use crate::media::MediaResolver;
use crate::postprocess::render_article;
use crate::quota::QuotaGate;
use crate::settings::{apply_patch, classify, ChangeAnalysis, SettingsPatch};
use anyhow::Context;
use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{info, instrument};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    pub analysis: ChangeAnalysis,
    pub regenerated: bool,
}

#[derive(Clone)]
pub struct Regenerator {
    pool: SqlitePool,
    quota: Arc<dyn QuotaGate>,
    providers: ProviderSet,
    media: Arc<dyn MediaResolver>,
}

impl Regenerator {
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
        }
    }

    #[instrument(skip(self, patch))]
    pub async fn update_settings(
        &self,
        owner_id: i64,
        artifact_id: i64,
        patch: &SettingsPatch,
    ) -> JobResult<SettingsUpdate> {
        let artifact = db::fetch_artifact(&self.pool, artifact_id)
            .await?
            .ok_or_else(|| JobError::NotFound(format!("artifact {}", artifact_id)))?;
        if artifact.owner_id != owner_id {
            return Err(JobError::Unauthorized(format!(
                "artifact {} belongs to another user",
                artifact_id
            )));
        }

        let next = apply_patch(&artifact.settings, patch)
            .map_err(|err| JobError::Validation(format!("invalid settings: {}", err)))?;
        let analysis = classify(&artifact.settings, patch).with_estimate(&next);
        info!(
            artifact_id,
            impact = ?analysis.change_type,
            changes = analysis.changes.len(),
            "settings change classified"
        );

        if !analysis.requires_regeneration() {
            db::update_artifact_settings(&self.pool, artifact_id, &next, Utc::now()).await?;
            return Ok(SettingsUpdate {
                analysis,
                regenerated: false,
            });
        }

        let decision = self
            .quota
            .can_create_single_post(owner_id)
            .await
            .context("quota check failed")?;
        if !decision.allowed {
            return Err(JobError::Unauthorized(decision.message));
        }

        let request = GenerationRequest::new(
            artifact.main_keyword.clone(),
            artifact.title.clone(),
            artifact.keywords.clone(),
            &next,
        );
        let raw = self
            .providers
            .select(request.model)
            .generate(&request)
            .await
            .map_err(|err| JobError::Capability(format!("regeneration failed: {:#}", err)))?;
        let rendered = render_article(self.media.as_ref(), &request, &raw).await;
        db::update_artifact_content(
            &self.pool,
            artifact_id,
            &rendered.content,
            &rendered.seo,
            &next,
            Utc::now(),
        )
        .await?;
        info!(
            artifact_id,
            model = request.model.as_str(),
            max_tokens = request.budget.max_tokens,
            "artifact regenerated"
        );

        Ok(SettingsUpdate {
            analysis,
            regenerated: true,
        })
    }
}

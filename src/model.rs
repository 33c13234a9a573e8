use crate::error::JobError;
use crate::postprocess::SeoAnalysis;
use crate::settings::ContentSettings;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Processing,
    Completed,
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Processing => "processing",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
        }
    }

    pub fn parse_status(s: &str) -> Option<Self> {
        match s {
            "processing" => Some(BatchStatus::Processing),
            "completed" => Some(BatchStatus::Completed),
            "failed" => Some(BatchStatus::Failed),
            _ => None,
        }
    }
}

/// Per-article state. `Generating` only ever lives in memory while the
/// processor works on the article.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ArticleStatus {
    Pending,
    Generating,
    Ready,
    Failed,
}

impl ArticleStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ArticleStatus::Ready | ArticleStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleStatus {
    Pending,
    Completed,
    Failed,
}

impl ScheduleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleStatus::Pending => "pending",
            ScheduleStatus::Completed => "completed",
            ScheduleStatus::Failed => "failed",
        }
    }

    pub fn parse_status(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ScheduleStatus::Pending),
            "completed" => Some(ScheduleStatus::Completed),
            "failed" => Some(ScheduleStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Wordpress,
    Shopify,
    Wix,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Wordpress => "wordpress",
            Platform::Shopify => "shopify",
            Platform::Wix => "wix",
        }
    }

    pub fn parse_platform(s: &str) -> Option<Self> {
        match s {
            "wordpress" => Some(Platform::Wordpress),
            "shopify" => Some(Platform::Shopify),
            "wix" => Some(Platform::Wix),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AiModel {
    #[serde(rename = "gpt-4o")]
    Gpt4o,
    #[serde(rename = "gpt-4o-mini")]
    Gpt4oMini,
    #[serde(rename = "claude-3-5-sonnet")]
    Claude35Sonnet,
    #[serde(rename = "claude-3-haiku")]
    Claude3Haiku,
}

impl AiModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AiModel::Gpt4o => "gpt-4o",
            AiModel::Gpt4oMini => "gpt-4o-mini",
            AiModel::Claude35Sonnet => "claude-3-5-sonnet",
            AiModel::Claude3Haiku => "claude-3-haiku",
        }
    }

    pub fn parse_model(s: &str) -> Option<Self> {
        match s {
            "gpt-4o" => Some(AiModel::Gpt4o),
            "gpt-4o-mini" => Some(AiModel::Gpt4oMini),
            "claude-3-5-sonnet" => Some(AiModel::Claude35Sonnet),
            "claude-3-haiku" => Some(AiModel::Claude3Haiku),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ArticleSize {
    Small,
    #[default]
    Medium,
    Large,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub plan: String,
    pub ai_model: Option<AiModel>,
}

/// Caller-supplied parameters for one article of a bulk job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ArticleInput {
    pub main_keyword: String,
    pub title: String,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BatchArticle {
    pub main_keyword: String,
    pub title: String,
    pub keywords: Vec<String>,
    pub status: ArticleStatus,
    #[serde(default)]
    pub artifact_id: Option<i64>,
    #[serde(default)]
    pub error: Option<String>,
}

impl BatchArticle {
    pub fn pending(input: ArticleInput) -> Self {
        Self {
            main_keyword: input.main_keyword,
            title: input.title,
            keywords: input.keywords,
            status: ArticleStatus::Pending,
            artifact_id: None,
            error: None,
        }
    }
}

/// Bulk generation job. Articles are owned by the batch and only change
/// through the methods below.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationBatch {
    pub id: i64,
    pub owner_id: i64,
    pub total_articles: usize,
    pub completed_articles: usize,
    pub status: BatchStatus,
    articles: Vec<BatchArticle>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl GenerationBatch {
    /// Rebuild a batch from its stored parts. `total_articles` is always the
    /// article count.
    pub fn from_parts(
        id: i64,
        owner_id: i64,
        completed_articles: usize,
        status: BatchStatus,
        articles: Vec<BatchArticle>,
        started_at: DateTime<Utc>,
        completed_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            owner_id,
            total_articles: articles.len(),
            completed_articles: completed_articles.min(articles.len()),
            status,
            articles,
            started_at,
            completed_at,
        }
    }

    pub fn articles(&self) -> &[BatchArticle] {
        &self.articles
    }

    pub fn article(&self, index: usize) -> Result<&BatchArticle, JobError> {
        self.articles
            .get(index)
            .ok_or_else(|| JobError::NotFound(format!("article {} of batch {}", index, self.id)))
    }

    fn article_mut(&mut self, index: usize) -> Result<&mut BatchArticle, JobError> {
        let id = self.id;
        self.articles
            .get_mut(index)
            .ok_or_else(|| JobError::NotFound(format!("article {} of batch {}", index, id)))
    }

    pub fn begin_article(&mut self, index: usize) -> Result<&BatchArticle, JobError> {
        let article = self.article_mut(index)?;
        if article.status.is_terminal() {
            return Err(JobError::InvalidTransition(format!(
                "article {} already {:?}",
                index, article.status
            )));
        }
        article.status = ArticleStatus::Generating;
        Ok(article)
    }

    /// Mark an article ready. The completed counter moves only on the first
    /// transition into `Ready`.
    pub fn mark_ready(&mut self, index: usize, artifact_id: i64) -> Result<(), JobError> {
        let article = self.article_mut(index)?;
        if article.status.is_terminal() {
            return Err(JobError::InvalidTransition(format!(
                "article {} already {:?}",
                index, article.status
            )));
        }
        article.status = ArticleStatus::Ready;
        article.artifact_id = Some(artifact_id);
        article.error = None;
        self.completed_articles = (self.completed_articles + 1).min(self.total_articles);
        Ok(())
    }

    pub fn mark_failed(&mut self, index: usize, error: impl Into<String>) -> Result<(), JobError> {
        let article = self.article_mut(index)?;
        if article.status.is_terminal() {
            return Err(JobError::InvalidTransition(format!(
                "article {} already {:?}",
                index, article.status
            )));
        }
        article.status = ArticleStatus::Failed;
        article.error = Some(error.into());
        Ok(())
    }

    /// Close the batch. Refuses while any article is still non-terminal; a
    /// batch that is already completed keeps its original `completed_at`.
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<(), JobError> {
        if self.status == BatchStatus::Completed {
            return Ok(());
        }
        if let Some(index) = self.articles.iter().position(|a| !a.status.is_terminal()) {
            return Err(JobError::InvalidTransition(format!(
                "batch {} cannot complete: article {} is {:?}",
                self.id, index, self.articles[index].status
            )));
        }
        self.status = BatchStatus::Completed;
        self.completed_at = Some(now);
        Ok(())
    }

    pub fn failed_articles(&self) -> usize {
        self.articles
            .iter()
            .filter(|a| a.status == ArticleStatus::Failed)
            .count()
    }

    pub fn progress_percent(&self) -> u8 {
        if self.total_articles == 0 {
            return 100;
        }
        ((self.completed_articles * 100) / self.total_articles) as u8
    }

    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            batch_id: self.id,
            status: self.status,
            total_articles: self.total_articles,
            completed_articles: self.completed_articles,
            failed_articles: self.failed_articles(),
            progress_percent: self.progress_percent(),
            articles: self
                .articles
                .iter()
                .map(|a| ArticleOutcome {
                    title: a.title.clone(),
                    status: a.status,
                    artifact_id: a.artifact_id,
                    error: a.error.clone(),
                })
                .collect(),
        }
    }
}

/// User-facing view of a batch.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub batch_id: i64,
    pub status: BatchStatus,
    pub total_articles: usize,
    pub completed_articles: usize,
    pub failed_articles: usize,
    pub progress_percent: u8,
    pub articles: Vec<ArticleOutcome>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ArticleOutcome {
    pub title: String,
    pub status: ArticleStatus,
    pub artifact_id: Option<i64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PostSchedule {
    pub id: i64,
    pub owner_id: i64,
    pub artifact_id: i64,
    pub site_id: Option<String>,
    pub platform: Platform,
    pub scheduled_date: DateTime<Utc>,
    pub status: ScheduleStatus,
    pub processing_lock: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PostSchedule {
    /// Eligibility predicate; the store query encodes the same condition.
    pub fn is_eligible(&self, now: DateTime<Utc>, lease_ttl: Duration) -> bool {
        self.status == ScheduleStatus::Pending
            && self.scheduled_date <= now
            && self
                .processing_lock
                .map_or(true, |lock| lock < now - lease_ttl)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentArtifact {
    pub id: i64,
    pub owner_id: i64,
    pub batch_id: Option<i64>,
    pub title: String,
    pub main_keyword: String,
    pub keywords: Vec<String>,
    pub content: String,
    pub seo: SeoAnalysis,
    pub settings: ContentSettings,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert payload for a content artifact.
#[derive(Debug, Clone)]
pub struct NewArtifact {
    pub owner_id: i64,
    pub batch_id: Option<i64>,
    pub title: String,
    pub main_keyword: String,
    pub keywords: Vec<String>,
    pub content: String,
    pub seo: SeoAnalysis,
    pub settings: ContentSettings,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(title: &str) -> ArticleInput {
        ArticleInput {
            main_keyword: "rust".into(),
            title: title.into(),
            keywords: vec!["async".into()],
        }
    }

    fn batch(n: usize) -> GenerationBatch {
        let articles = (0..n)
            .map(|i| BatchArticle::pending(input(&format!("t{}", i))))
            .collect();
        GenerationBatch::from_parts(1, 7, 0, BatchStatus::Processing, articles, Utc::now(), None)
    }

    #[test]
    fn counter_only_moves_on_ready() {
        let mut b = batch(3);
        b.begin_article(0).unwrap();
        b.mark_ready(0, 10).unwrap();
        b.begin_article(1).unwrap();
        b.mark_failed(1, "boom").unwrap();
        assert_eq!(b.completed_articles, 1);
        assert_eq!(b.failed_articles(), 1);
        assert_eq!(b.progress_percent(), 33);

        // terminal articles cannot be re-marked or double counted
        assert!(matches!(
            b.mark_ready(0, 11),
            Err(JobError::InvalidTransition(_))
        ));
        assert!(b.mark_ready(1, 12).is_err());
        assert_eq!(b.completed_articles, 1);
    }

    #[test]
    fn complete_requires_terminal_articles() {
        let mut b = batch(2);
        b.mark_ready(0, 1).unwrap();
        assert!(b.complete(Utc::now()).is_err());
        assert_eq!(b.status, BatchStatus::Processing);

        b.mark_failed(1, "provider timeout").unwrap();
        b.complete(Utc::now()).unwrap();
        assert_eq!(b.status, BatchStatus::Completed);
        assert!(b.completed_at.is_some());

        let summary = b.summary();
        assert_eq!(summary.articles[1].error.as_deref(), Some("provider timeout"));
        assert_eq!(summary.completed_articles, 1);
    }

    #[test]
    fn completing_twice_keeps_first_timestamp() {
        let mut b = batch(1);
        b.mark_ready(0, 1).unwrap();
        let first = Utc::now() - Duration::minutes(5);
        b.complete(first).unwrap();
        b.complete(Utc::now()).unwrap();
        assert_eq!(b.completed_at, Some(first));
        assert_eq!(b.completed_articles, 1);
    }

    #[test]
    fn out_of_range_article_is_not_found() {
        let mut b = batch(1);
        assert!(matches!(b.mark_ready(5, 1), Err(JobError::NotFound(_))));
    }

    #[test]
    fn from_parts_clamps_counter() {
        let articles = vec![BatchArticle::pending(input("a"))];
        let b = GenerationBatch::from_parts(1, 1, 9, BatchStatus::Processing, articles, Utc::now(), None);
        assert_eq!(b.total_articles, 1);
        assert_eq!(b.completed_articles, 1);
    }

    #[test]
    fn eligibility_predicate() {
        let now = Utc::now();
        let ttl = Duration::minutes(5);
        let mut s = PostSchedule {
            id: 1,
            owner_id: 1,
            artifact_id: 1,
            site_id: None,
            platform: Platform::Wordpress,
            scheduled_date: now - Duration::minutes(1),
            status: ScheduleStatus::Pending,
            processing_lock: None,
            error: None,
            created_at: now,
        };
        assert!(s.is_eligible(now, ttl));

        s.processing_lock = Some(now);
        assert!(!s.is_eligible(now, ttl));

        s.processing_lock = Some(now - Duration::minutes(6));
        assert!(s.is_eligible(now, ttl));

        s.scheduled_date = now + Duration::minutes(1);
        assert!(!s.is_eligible(now, ttl));

        s.scheduled_date = now;
        s.status = ScheduleStatus::Failed;
        assert!(!s.is_eligible(now, ttl));
    }

    #[test]
    fn enum_round_trips_through_strings() {
        for p in [Platform::Wordpress, Platform::Shopify, Platform::Wix] {
            assert_eq!(Platform::parse_platform(p.as_str()), Some(p));
        }
        assert_eq!(AiModel::parse_model("claude-3-haiku"), Some(AiModel::Claude3Haiku));
        assert_eq!(BatchStatus::parse_status("bogus"), None);
    }
}

use super::model::{from_millis, to_millis, ScheduleCounts};
use crate::model::{
    AiModel, ArticleInput, BatchArticle, BatchStatus, ContentArtifact, GenerationBatch,
    NewArtifact, Platform, PostSchedule, ScheduleStatus, User,
};
use crate::postprocess::SeoAnalysis;
use crate::settings::ContentSettings;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Executor, Row, Sqlite, SqlitePool};
use std::str::FromStr;
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let options = SqliteConnectOptions::from_str(&normalized)
        .with_context(|| format!("invalid database url {}", normalized))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    Ok(pool)
}

/// Single-connection in-memory database with migrations applied. Every
/// connection to `sqlite::memory:` is a separate database, so the pool must
/// never open a second one.
pub async fn memory_pool() -> Result<Pool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;
    run_migrations(&pool).await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);

    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };

    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn opt_millis(row: &SqliteRow, column: &str) -> Result<Option<DateTime<Utc>>> {
    row.try_get::<Option<i64>, _>(column)?
        .map(from_millis)
        .transpose()
}

fn json_column<T: serde::de::DeserializeOwned>(row: &SqliteRow, column: &str) -> Result<T> {
    let raw: String = row.try_get(column)?;
    serde_json::from_str(&raw).with_context(|| format!("invalid JSON in column {}", column))
}

// ---------------------------------------------------------------------------
// users

#[instrument(skip_all)]
pub async fn upsert_user(
    pool: &Pool,
    user_id: i64,
    plan: &str,
    ai_model: Option<AiModel>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO users (id, plan, ai_model, created_at) VALUES (?, ?, ?, ?) \
         ON CONFLICT(id) DO UPDATE SET plan = excluded.plan, ai_model = excluded.ai_model",
    )
    .bind(user_id)
    .bind(plan)
    .bind(ai_model.map(|m| m.as_str()))
    .bind(to_millis(Utc::now()))
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn fetch_user(pool: &Pool, user_id: i64) -> Result<Option<User>> {
    let row = sqlx::query("SELECT id, plan, ai_model FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
    let Some(row) = row else {
        return Ok(None);
    };
    let ai_model: Option<String> = row.try_get("ai_model")?;
    Ok(Some(User {
        id: row.get("id"),
        plan: row.get("plan"),
        ai_model: ai_model.as_deref().and_then(AiModel::parse_model),
    }))
}

// ---------------------------------------------------------------------------
// generation batches

#[instrument(skip_all, fields(owner_id = owner_id, articles = articles.len()))]
pub async fn insert_batch(
    pool: &Pool,
    owner_id: i64,
    articles: &[ArticleInput],
    now: DateTime<Utc>,
) -> Result<i64> {
    let pending: Vec<BatchArticle> = articles.iter().cloned().map(BatchArticle::pending).collect();
    let rec = sqlx::query(
        "INSERT INTO generation_batches (owner_id, total_articles, completed_articles, status, articles, started_at) \
         VALUES (?, ?, 0, ?, ?, ?) RETURNING id",
    )
    .bind(owner_id)
    .bind(pending.len() as i64)
    .bind(BatchStatus::Processing.as_str())
    .bind(serde_json::to_string(&pending)?)
    .bind(to_millis(now))
    .fetch_one(pool)
    .await?;
    Ok(rec.get("id"))
}

fn batch_from_row(row: &SqliteRow) -> Result<GenerationBatch> {
    let id: i64 = row.try_get("id")?;
    let status_str: String = row.try_get("status")?;
    let status = BatchStatus::parse_status(&status_str)
        .ok_or_else(|| anyhow!("batch {} has unknown status {}", id, status_str))?;
    let completed: i64 = row.try_get("completed_articles")?;
    Ok(GenerationBatch::from_parts(
        id,
        row.try_get("owner_id")?,
        completed.max(0) as usize,
        status,
        json_column(row, "articles")?,
        from_millis(row.try_get("started_at")?)?,
        opt_millis(row, "completed_at")?,
    ))
}

#[instrument(skip_all)]
pub async fn fetch_batch(pool: &Pool, batch_id: i64) -> Result<Option<GenerationBatch>> {
    let row = sqlx::query(
        "SELECT id, owner_id, completed_articles, status, articles, started_at, completed_at \
         FROM generation_batches WHERE id = ?",
    )
    .bind(batch_id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(batch_from_row).transpose()
}

/// Persist the mutable part of a batch. Last write wins. Accepts a pool or
/// an open transaction.
#[instrument(skip_all, fields(batch_id = batch.id))]
pub async fn save_batch<'e, E>(executor: E, batch: &GenerationBatch) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    let res = sqlx::query(
        "UPDATE generation_batches SET completed_articles = ?, status = ?, articles = ?, completed_at = ? \
         WHERE id = ?",
    )
    .bind(batch.completed_articles as i64)
    .bind(batch.status.as_str())
    .bind(serde_json::to_string(batch.articles())?)
    .bind(batch.completed_at.map(to_millis))
    .bind(batch.id)
    .execute(executor)
    .await
    .context("failed to persist batch")?;
    if res.rows_affected() == 0 {
        return Err(anyhow!("batch {} not found", batch.id));
    }
    Ok(())
}

pub async fn list_batch_ids_with_status(pool: &Pool, status: BatchStatus) -> Result<Vec<i64>> {
    let ids = sqlx::query_scalar("SELECT id FROM generation_batches WHERE status = ? ORDER BY id")
        .bind(status.as_str())
        .fetch_all(pool)
        .await?;
    Ok(ids)
}

// ---------------------------------------------------------------------------
// content artifacts

#[instrument(skip_all, fields(owner_id = artifact.owner_id, batch_id = artifact.batch_id))]
pub async fn insert_artifact<'e, E>(
    executor: E,
    artifact: &NewArtifact,
    now: DateTime<Utc>,
) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rec = sqlx::query(
        "INSERT INTO content_artifacts \
         (owner_id, batch_id, title, main_keyword, keywords, content, seo, settings, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(artifact.owner_id)
    .bind(artifact.batch_id)
    .bind(&artifact.title)
    .bind(&artifact.main_keyword)
    .bind(serde_json::to_string(&artifact.keywords)?)
    .bind(&artifact.content)
    .bind(serde_json::to_string(&artifact.seo)?)
    .bind(serde_json::to_string(&artifact.settings)?)
    .bind(to_millis(now))
    .bind(to_millis(now))
    .fetch_one(executor)
    .await?;
    Ok(rec.get("id"))
}

#[instrument(skip_all)]
pub async fn fetch_artifact(pool: &Pool, artifact_id: i64) -> Result<Option<ContentArtifact>> {
    let row = sqlx::query(
        "SELECT id, owner_id, batch_id, title, main_keyword, keywords, content, seo, settings, created_at, updated_at \
         FROM content_artifacts WHERE id = ?",
    )
    .bind(artifact_id)
    .fetch_optional(pool)
    .await?;
    let Some(row) = row else {
        return Ok(None);
    };
    Ok(Some(ContentArtifact {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        batch_id: row.try_get("batch_id")?,
        title: row.try_get("title")?,
        main_keyword: row.try_get("main_keyword")?,
        keywords: json_column(&row, "keywords")?,
        content: row.try_get("content")?,
        seo: json_column(&row, "seo")?,
        settings: json_column(&row, "settings")?,
        created_at: from_millis(row.try_get("created_at")?)?,
        updated_at: from_millis(row.try_get("updated_at")?)?,
    }))
}

#[instrument(skip_all)]
pub async fn update_artifact_content(
    pool: &Pool,
    artifact_id: i64,
    content: &str,
    seo: &SeoAnalysis,
    settings: &ContentSettings,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "UPDATE content_artifacts SET content = ?, seo = ?, settings = ?, updated_at = ? WHERE id = ?",
    )
    .bind(content)
    .bind(serde_json::to_string(seo)?)
    .bind(serde_json::to_string(settings)?)
    .bind(to_millis(now))
    .bind(artifact_id)
    .execute(pool)
    .await
    .context("failed to persist regenerated content")?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn update_artifact_settings(
    pool: &Pool,
    artifact_id: i64,
    settings: &ContentSettings,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE content_artifacts SET settings = ?, updated_at = ? WHERE id = ?")
        .bind(serde_json::to_string(settings)?)
        .bind(to_millis(now))
        .bind(artifact_id)
        .execute(pool)
        .await
        .context("failed to persist artifact settings")?;
    Ok(())
}

pub async fn count_artifacts_since(pool: &Pool, owner_id: i64, since: DateTime<Utc>) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM content_artifacts WHERE owner_id = ? AND created_at >= ?",
    )
    .bind(owner_id)
    .bind(to_millis(since))
    .fetch_one(pool)
    .await?;
    Ok(count)
}

// ---------------------------------------------------------------------------
// post schedules

/// Insert one pending row per date, all or nothing.
#[instrument(skip_all, fields(owner_id = owner_id, artifact_id = artifact_id, platform = platform.as_str(), dates = dates.len()))]
pub async fn insert_schedules(
    pool: &Pool,
    owner_id: i64,
    artifact_id: i64,
    site_id: Option<&str>,
    platform: Platform,
    dates: &[DateTime<Utc>],
    now: DateTime<Utc>,
) -> Result<Vec<i64>> {
    let mut tx = pool.begin().await?;
    let mut ids = Vec::with_capacity(dates.len());
    for date in dates {
        let rec = sqlx::query(
            "INSERT INTO post_schedules (owner_id, artifact_id, site_id, platform, scheduled_date, status, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(owner_id)
        .bind(artifact_id)
        .bind(site_id)
        .bind(platform.as_str())
        .bind(to_millis(*date))
        .bind(ScheduleStatus::Pending.as_str())
        .bind(to_millis(now))
        .fetch_one(&mut *tx)
        .await?;
        ids.push(rec.get::<i64, _>("id"));
    }
    tx.commit().await?;
    Ok(ids)
}

const SCHEDULE_COLUMNS: &str = "id, owner_id, artifact_id, site_id, platform, scheduled_date, status, processing_lock, error, created_at";

fn schedule_from_row(row: &SqliteRow) -> Result<PostSchedule> {
    let id: i64 = row.try_get("id")?;
    let platform_str: String = row.try_get("platform")?;
    let status_str: String = row.try_get("status")?;
    Ok(PostSchedule {
        id,
        owner_id: row.try_get("owner_id")?,
        artifact_id: row.try_get("artifact_id")?,
        site_id: row.try_get("site_id")?,
        platform: Platform::parse_platform(&platform_str)
            .ok_or_else(|| anyhow!("schedule {} has unknown platform {}", id, platform_str))?,
        scheduled_date: from_millis(row.try_get("scheduled_date")?)?,
        status: ScheduleStatus::parse_status(&status_str)
            .ok_or_else(|| anyhow!("schedule {} has unknown status {}", id, status_str))?,
        processing_lock: opt_millis(row, "processing_lock")?,
        error: row.try_get("error")?,
        created_at: from_millis(row.try_get("created_at")?)?,
    })
}

#[instrument(skip_all)]
pub async fn fetch_schedule(pool: &Pool, schedule_id: i64) -> Result<Option<PostSchedule>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM post_schedules WHERE id = ?",
        SCHEDULE_COLUMNS
    ))
    .bind(schedule_id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(schedule_from_row).transpose()
}

pub async fn list_schedules_for_artifact(pool: &Pool, artifact_id: i64) -> Result<Vec<PostSchedule>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM post_schedules WHERE artifact_id = ? ORDER BY scheduled_date, id",
        SCHEDULE_COLUMNS
    ))
    .bind(artifact_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(schedule_from_row).collect()
}

/// Rows that are pending, due, and either unleased or holding a lease older
/// than `lease_ttl`.
#[instrument(skip_all)]
pub async fn list_eligible_schedules(
    pool: &Pool,
    now: DateTime<Utc>,
    lease_ttl: Duration,
) -> Result<Vec<PostSchedule>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM post_schedules \
         WHERE status = ? AND scheduled_date <= ? AND (processing_lock IS NULL OR processing_lock < ?) \
         ORDER BY scheduled_date ASC, id ASC",
        SCHEDULE_COLUMNS
    ))
    .bind(ScheduleStatus::Pending.as_str())
    .bind(to_millis(now))
    .bind(to_millis(now - lease_ttl))
    .fetch_all(pool)
    .await?;
    rows.iter().map(schedule_from_row).collect()
}

/// Conditional lease write: the eligibility predicate, evaluated at `now`,
/// is the match condition, so at most one caller wins a given row. The lock
/// is stamped with `locked_at`, the moment the lease is actually taken.
#[instrument(skip_all, fields(schedule_id = schedule_id))]
pub async fn try_acquire_lease(
    pool: &Pool,
    schedule_id: i64,
    now: DateTime<Utc>,
    locked_at: DateTime<Utc>,
    lease_ttl: Duration,
) -> Result<bool> {
    let res = sqlx::query(
        "UPDATE post_schedules SET processing_lock = ? \
         WHERE id = ? AND status = ? AND scheduled_date <= ? \
         AND (processing_lock IS NULL OR processing_lock < ?)",
    )
    .bind(to_millis(locked_at))
    .bind(schedule_id)
    .bind(ScheduleStatus::Pending.as_str())
    .bind(to_millis(now))
    .bind(to_millis(now - lease_ttl))
    .execute(pool)
    .await?;
    Ok(res.rows_affected() == 1)
}

#[instrument(skip_all, fields(schedule_id = schedule_id))]
pub async fn complete_schedule(pool: &Pool, schedule_id: i64) -> Result<()> {
    sqlx::query(
        "UPDATE post_schedules SET status = ?, processing_lock = NULL, error = NULL WHERE id = ?",
    )
    .bind(ScheduleStatus::Completed.as_str())
    .bind(schedule_id)
    .execute(pool)
    .await
    .context("failed to mark schedule completed")?;
    Ok(())
}

#[instrument(skip_all, fields(schedule_id = schedule_id))]
pub async fn fail_schedule(pool: &Pool, schedule_id: i64, error: &str) -> Result<()> {
    sqlx::query(
        "UPDATE post_schedules SET status = ?, processing_lock = NULL, error = ? WHERE id = ?",
    )
    .bind(ScheduleStatus::Failed.as_str())
    .bind(error)
    .bind(schedule_id)
    .execute(pool)
    .await
    .context("failed to mark schedule failed")?;
    Ok(())
}

pub async fn schedule_counts(pool: &Pool) -> Result<ScheduleCounts> {
    let row = sqlx::query(
        "SELECT \
           COALESCE(SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END), 0) AS pending, \
           COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0) AS completed, \
           COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0) AS failed, \
           COALESCE(SUM(CASE WHEN status = 'pending' AND processing_lock IS NOT NULL THEN 1 ELSE 0 END), 0) AS leased \
         FROM post_schedules",
    )
    .fetch_one(pool)
    .await?;
    Ok(ScheduleCounts {
        pending: row.try_get("pending")?,
        completed: row.try_get("completed")?,
        failed: row.try_get("failed")?,
        leased: row.try_get("leased")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::postprocess::SeoAnalysis;

    fn article(title: &str) -> ArticleInput {
        ArticleInput {
            main_keyword: "coffee".into(),
            title: title.into(),
            keywords: vec!["beans".into(), "roast".into()],
        }
    }

    async fn seed_artifact(pool: &Pool, owner_id: i64) -> i64 {
        let new = NewArtifact {
            owner_id,
            batch_id: None,
            title: "Coffee".into(),
            main_keyword: "coffee".into(),
            keywords: vec!["beans".into()],
            content: "# Coffee".into(),
            seo: SeoAnalysis::default(),
            settings: ContentSettings::default(),
        };
        insert_artifact(pool, &new, Utc::now()).await.unwrap()
    }

    #[test]
    fn prepare_sqlite_url_passthrough() {
        assert_eq!(prepare_sqlite_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(prepare_sqlite_url("postgres://x"), "postgres://x");
    }

    #[tokio::test]
    async fn batch_round_trip() {
        let pool = memory_pool().await.unwrap();
        let id = insert_batch(&pool, 3, &[article("a"), article("b")], Utc::now())
            .await
            .unwrap();
        let mut batch = fetch_batch(&pool, id).await.unwrap().unwrap();
        assert_eq!(batch.total_articles, 2);
        assert_eq!(batch.status, BatchStatus::Processing);
        assert_eq!(batch.articles()[1].title, "b");

        batch.mark_ready(0, 99).unwrap();
        batch.mark_failed(1, "nope").unwrap();
        batch.complete(Utc::now()).unwrap();
        save_batch(&pool, &batch).await.unwrap();

        let stored = fetch_batch(&pool, id).await.unwrap().unwrap();
        assert_eq!(stored.completed_articles, 1);
        assert_eq!(stored.status, BatchStatus::Completed);
        assert_eq!(stored.articles()[0].artifact_id, Some(99));
        assert_eq!(stored.articles()[1].error.as_deref(), Some("nope"));
        assert!(stored.completed_at.is_some());

        assert!(fetch_batch(&pool, 404).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn users_upsert_and_model() {
        let pool = memory_pool().await.unwrap();
        assert!(fetch_user(&pool, 1).await.unwrap().is_none());
        upsert_user(&pool, 1, "free", None).await.unwrap();
        upsert_user(&pool, 1, "pro", Some(AiModel::Claude3Haiku)).await.unwrap();
        let user = fetch_user(&pool, 1).await.unwrap().unwrap();
        assert_eq!(user.plan, "pro");
        assert_eq!(user.ai_model, Some(AiModel::Claude3Haiku));
    }

    #[tokio::test]
    async fn eligibility_and_conditional_lease() {
        let pool = memory_pool().await.unwrap();
        let artifact_id = seed_artifact(&pool, 1).await;
        let now = Utc::now();
        let ttl = Duration::minutes(5);
        let ids = insert_schedules(
            &pool,
            1,
            artifact_id,
            Some("site-1"),
            Platform::Wordpress,
            &[now - Duration::minutes(1), now + Duration::hours(1)],
            now,
        )
        .await
        .unwrap();

        let eligible = list_eligible_schedules(&pool, now, ttl).await.unwrap();
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].id, ids[0]);

        assert!(try_acquire_lease(&pool, ids[0], now, now, ttl).await.unwrap());
        // a second claimant with the same clock loses
        assert!(!try_acquire_lease(&pool, ids[0], now, now, ttl).await.unwrap());
        assert!(list_eligible_schedules(&pool, now, ttl).await.unwrap().is_empty());

        // lease expires after the TTL
        let later = now + Duration::minutes(6);
        assert_eq!(list_eligible_schedules(&pool, later, ttl).await.unwrap().len(), 1);

        fail_schedule(&pool, ids[0], "boom").await.unwrap();
        let failed = fetch_schedule(&pool, ids[0]).await.unwrap().unwrap();
        assert_eq!(failed.status, ScheduleStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("boom"));
        assert!(failed.processing_lock.is_none());

        let counts = schedule_counts(&pool).await.unwrap();
        assert_eq!(counts, ScheduleCounts { pending: 1, completed: 0, failed: 1, leased: 0 });
    }

    #[tokio::test]
    async fn artifact_counts_by_owner() {
        let pool = memory_pool().await.unwrap();
        seed_artifact(&pool, 1).await;
        seed_artifact(&pool, 1).await;
        seed_artifact(&pool, 2).await;
        let since = Utc::now() - Duration::days(1);
        assert_eq!(count_artifacts_since(&pool, 1, since).await.unwrap(), 2);
        assert_eq!(count_artifacts_since(&pool, 2, since).await.unwrap(), 1);
    }
}

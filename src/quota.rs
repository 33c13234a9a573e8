//! Plan tiers and the quota gate consulted before creating content.
use crate::db;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::instrument;

pub const FREE_MONTHLY_POSTS: i64 = 5;
pub const PRO_MONTHLY_POSTS: i64 = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaDecision {
    pub allowed: bool,
    pub message: String,
}

impl QuotaDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            message: String::new(),
        }
    }

    pub fn deny(message: impl Into<String>) -> Self {
        Self {
            allowed: false,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanTier {
    Free,
    Pro,
    Visitor,
}

impl PlanTier {
    /// Unknown or missing plans are treated as visitors.
    pub fn from_plan(plan: Option<&str>) -> Self {
        match plan.map(|p| p.trim().to_ascii_lowercase()).as_deref() {
            Some("free") => PlanTier::Free,
            Some("pro") => PlanTier::Pro,
            _ => PlanTier::Visitor,
        }
    }

    pub fn can_create_bulk_posts(&self) -> QuotaDecision {
        match self {
            PlanTier::Pro => QuotaDecision::allow(),
            PlanTier::Free => QuotaDecision::deny("Bulk generation requires a Pro plan"),
            PlanTier::Visitor => QuotaDecision::deny("Sign up to generate content"),
        }
    }

    pub fn can_create_single_post(&self, used_this_month: i64) -> QuotaDecision {
        let limit = match self {
            PlanTier::Visitor => return QuotaDecision::deny("Sign up to generate content"),
            PlanTier::Free => FREE_MONTHLY_POSTS,
            PlanTier::Pro => PRO_MONTHLY_POSTS,
        };
        if used_this_month >= limit {
            QuotaDecision::deny(format!(
                "Monthly limit of {} posts reached ({} used)",
                limit, used_this_month
            ))
        } else {
            QuotaDecision::allow()
        }
    }
}

#[async_trait]
pub trait QuotaGate: Send + Sync {
    async fn can_create_bulk_posts(&self, owner_id: i64) -> Result<QuotaDecision>;
    async fn can_create_single_post(&self, owner_id: i64) -> Result<QuotaDecision>;
}

/// Quota gate backed by the stored user plan and artifact counts.
#[derive(Debug, Clone)]
pub struct PlanQuotaGate {
    pool: SqlitePool,
}

impl PlanQuotaGate {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn tier(&self, owner_id: i64) -> Result<PlanTier> {
        let user = db::fetch_user(&self.pool, owner_id).await?;
        Ok(PlanTier::from_plan(user.as_ref().map(|u| u.plan.as_str())))
    }
}

pub fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now)
}

#[async_trait]
impl QuotaGate for PlanQuotaGate {
    #[instrument(skip(self))]
    async fn can_create_bulk_posts(&self, owner_id: i64) -> Result<QuotaDecision> {
        Ok(self.tier(owner_id).await?.can_create_bulk_posts())
    }

    #[instrument(skip(self))]
    async fn can_create_single_post(&self, owner_id: i64) -> Result<QuotaDecision> {
        let tier = self.tier(owner_id).await?;
        let used =
            db::count_artifacts_since(&self.pool, owner_id, month_start(Utc::now())).await?;
        Ok(tier.can_create_single_post(used))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_parsing() {
        assert_eq!(PlanTier::from_plan(Some("Pro")), PlanTier::Pro);
        assert_eq!(PlanTier::from_plan(Some(" free ")), PlanTier::Free);
        assert_eq!(PlanTier::from_plan(Some("enterprise")), PlanTier::Visitor);
        assert_eq!(PlanTier::from_plan(None), PlanTier::Visitor);
    }

    #[test]
    fn bulk_only_for_pro() {
        assert!(PlanTier::Pro.can_create_bulk_posts().allowed);
        let denied = PlanTier::Free.can_create_bulk_posts();
        assert!(!denied.allowed);
        assert!(denied.message.contains("Pro"));
        assert!(!PlanTier::Visitor.can_create_bulk_posts().allowed);
    }

    #[test]
    fn single_post_limits() {
        assert!(PlanTier::Free.can_create_single_post(4).allowed);
        assert!(!PlanTier::Free.can_create_single_post(5).allowed);
        assert!(PlanTier::Pro.can_create_single_post(199).allowed);
        assert!(!PlanTier::Visitor.can_create_single_post(0).allowed);
    }

    #[test]
    fn month_start_truncates() {
        let t = Utc.with_ymd_and_hms(2024, 3, 17, 12, 30, 0).unwrap();
        assert_eq!(month_start(t), Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
    }
}

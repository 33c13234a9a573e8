//! Publishing capabilities, one per platform, plus destination ownership checks.
use crate::model::Platform;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Published {
    pub url: String,
    pub slug: String,
}

/// Publishes a stored artifact to a destination site. The error message is
/// recorded verbatim on the schedule when this fails.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(
        &self,
        owner_id: i64,
        site_id: Option<&str>,
        artifact_id: i64,
    ) -> Result<Published>;
}

/// Confirms the owner controls `site_id` on `platform`.
#[async_trait]
pub trait SiteVerifier: Send + Sync {
    async fn has_verified_site(
        &self,
        owner_id: i64,
        platform: Platform,
        site_id: Option<&str>,
    ) -> Result<bool>;
}

#[derive(Clone, Default)]
pub struct PublisherRegistry {
    publishers: HashMap<Platform, Arc<dyn Publisher>>,
}

impl PublisherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, platform: Platform, publisher: Arc<dyn Publisher>) -> Self {
        self.publishers.insert(platform, publisher);
        self
    }

    pub fn get(&self, platform: Platform) -> Option<Arc<dyn Publisher>> {
        self.publishers.get(&platform).cloned()
    }

    pub fn platforms(&self) -> Vec<Platform> {
        let mut platforms: Vec<Platform> = self.publishers.keys().copied().collect();
        platforms.sort();
        platforms
    }
}

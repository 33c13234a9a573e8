//! HTTP adapter for the collaborator sidecar. Every capability the engine
//! consumes (generation, media, publishing, site verification) is one JSON
//! POST against the gateway.
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::ai::{ContentGenerator, GenerationRequest, ModelProvider, ProviderSet};
use crate::config::Config;
use crate::media::MediaResolver;
use crate::model::Platform;
use crate::publisher::{Published, Publisher, PublisherRegistry, SiteVerifier};
use crate::settings::MediaSettings;

#[derive(Clone)]
pub struct HttpGateway {
    http: Client,
    base_url: Url,
    token: String,
}

impl fmt::Debug for HttpGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpGateway")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct GenerateResponse {
    content: String,
}

#[derive(Deserialize)]
struct MediaResponse {
    markdown: String,
}

#[derive(Deserialize)]
struct VerifyResponse {
    verified: bool,
}

impl HttpGateway {
    pub fn new(base_url: Url, token: String, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .user_agent("content-jobs/0.1")
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url,
            token,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        let base_url = Url::parse(&cfg.gateway.base_url).context("invalid gateway.base_url")?;
        Self::new(
            base_url,
            cfg.gateway.token.clone(),
            Duration::from_secs(cfg.gateway.timeout_secs),
        )
    }

    pub fn build_request(&self, path: &str, body: &Value) -> Result<reqwest::Request> {
        let endpoint = self
            .base_url
            .join(path)
            .with_context(|| format!("invalid gateway path {}", path))?;
        self.http
            .post(endpoint)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Content-Type", "application/json")
            .json(body)
            .build()
            .context("failed to build gateway request")
    }

    async fn post_json<T: DeserializeOwned>(&self, path: &str, body: Value) -> Result<T> {
        let request = self.build_request(path, &body)?;
        debug!(url = %request.url(), "gateway request");
        let res = self
            .http
            .execute(request)
            .await
            .with_context(|| format!("failed to reach gateway at {}", path))?;

        let status = res.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            warn!(path, "rate limited by gateway");
            return Err(anyhow!("received 429 from gateway: {}", body));
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            warn!(path, %status, "gateway error");
            return Err(anyhow!("gateway error {}: {}", status, body));
        }

        let text = res.text().await.context("failed to read gateway response")?;
        serde_json::from_str(&text).context("invalid gateway response JSON")
    }

    pub fn generator(&self, provider: ModelProvider) -> HttpGenerator {
        HttpGenerator {
            gateway: self.clone(),
            provider,
        }
    }

    pub fn providers(&self) -> ProviderSet {
        ProviderSet::new(
            Arc::new(self.generator(ModelProvider::OpenAi)),
            Arc::new(self.generator(ModelProvider::Anthropic)),
        )
    }

    pub fn publishers(&self) -> PublisherRegistry {
        [Platform::Wordpress, Platform::Shopify, Platform::Wix]
            .into_iter()
            .fold(PublisherRegistry::new(), |registry, platform| {
                registry.with(
                    platform,
                    Arc::new(HttpPublisher {
                        gateway: self.clone(),
                        platform,
                    }),
                )
            })
    }
}

pub struct HttpGenerator {
    gateway: HttpGateway,
    provider: ModelProvider,
}

pub fn generate_body(provider: ModelProvider, request: &GenerationRequest) -> Value {
    json!({
        "provider": provider.as_str(),
        "model": request.model.as_str(),
        "maxTokens": request.budget.max_tokens,
        "request": request,
    })
}

#[async_trait]
impl ContentGenerator for HttpGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let res: GenerateResponse = self
            .gateway
            .post_json("v1/generate", generate_body(self.provider, request))
            .await?;
        Ok(res.content)
    }
}

#[async_trait]
impl MediaResolver for HttpGateway {
    async fn resolve_placeholders(
        &self,
        markdown: &str,
        settings: &MediaSettings,
    ) -> Result<String> {
        let res: MediaResponse = self
            .post_json(
                "v1/media/resolve",
                json!({ "markdown": markdown, "settings": settings }),
            )
            .await?;
        Ok(res.markdown)
    }
}

pub struct HttpPublisher {
    gateway: HttpGateway,
    platform: Platform,
}

#[async_trait]
impl Publisher for HttpPublisher {
    async fn publish(
        &self,
        owner_id: i64,
        site_id: Option<&str>,
        artifact_id: i64,
    ) -> Result<Published> {
        self.gateway
            .post_json(
                &format!("v1/publish/{}", self.platform.as_str()),
                json!({ "ownerId": owner_id, "siteId": site_id, "artifactId": artifact_id }),
            )
            .await
    }
}

#[async_trait]
impl SiteVerifier for HttpGateway {
    async fn has_verified_site(
        &self,
        owner_id: i64,
        platform: Platform,
        site_id: Option<&str>,
    ) -> Result<bool> {
        let res: VerifyResponse = self
            .post_json(
                "v1/sites/verify",
                json!({ "ownerId": owner_id, "platform": platform.as_str(), "siteId": site_id }),
            )
            .await?;
        Ok(res.verified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::ContentSettings;

    fn gateway() -> HttpGateway {
        HttpGateway::new(
            Url::parse("http://127.0.0.1:8088/api/").unwrap(),
            "secret".into(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn build_request_sets_headers() {
        let request = gateway()
            .build_request("v1/publish/wix", &json!({ "sample": true }))
            .unwrap();
        assert_eq!(request.method(), reqwest::Method::POST);
        assert_eq!(request.url().path(), "/api/v1/publish/wix");
        let headers = request.headers();
        assert_eq!(
            headers
                .get("Authorization")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            "Bearer secret"
        );
        assert_eq!(
            headers
                .get("Content-Type")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            "application/json"
        );
    }

    #[test]
    fn generate_body_carries_budget() {
        let req = GenerationRequest::new("k", "t", vec!["a".into()], &ContentSettings::default());
        let body = generate_body(ModelProvider::OpenAi, &req);
        assert_eq!(body["provider"], "openai");
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["maxTokens"], req.budget.max_tokens);
        assert_eq!(body["request"]["mainKeyword"], "k");
    }

    #[test]
    fn registry_covers_every_platform() {
        let registry = gateway().publishers();
        assert_eq!(
            registry.platforms(),
            vec![Platform::Wordpress, Platform::Shopify, Platform::Wix]
        );
    }

    #[test]
    fn debug_redacts_token() {
        let out = format!("{:?}", gateway());
        assert!(!out.contains("secret"));
    }
}

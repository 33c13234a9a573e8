//! AI generation capability: provider dispatch and token budgeting.
use crate::model::{AiModel, ArticleSize, BatchArticle};
use crate::settings::ContentSettings;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Tokens held back from the output budget for the system prompt.
pub const SYSTEM_PROMPT_RESERVE: u32 = 1_000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ModelProvider {
    OpenAi,
    Anthropic,
}

impl ModelProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelProvider::OpenAi => "openai",
            ModelProvider::Anthropic => "anthropic",
        }
    }
}

impl AiModel {
    pub fn provider(&self) -> ModelProvider {
        match self {
            AiModel::Gpt4o | AiModel::Gpt4oMini => ModelProvider::OpenAi,
            AiModel::Claude35Sonnet | AiModel::Claude3Haiku => ModelProvider::Anthropic,
        }
    }

    /// Maximum completion tokens the model accepts per request.
    pub fn output_token_limit(&self) -> u32 {
        match self {
            AiModel::Gpt4o | AiModel::Gpt4oMini => 16_384,
            AiModel::Claude35Sonnet => 8_192,
            AiModel::Claude3Haiku => 4_096,
        }
    }

    pub fn usd_per_1k_output_tokens(&self) -> f64 {
        match self {
            AiModel::Gpt4o => 0.010,
            AiModel::Gpt4oMini => 0.0006,
            AiModel::Claude35Sonnet => 0.015,
            AiModel::Claude3Haiku => 0.00125,
        }
    }
}

impl ArticleSize {
    /// Target word range for the article body.
    pub fn word_range(&self) -> (u32, u32) {
        match self {
            ArticleSize::Small => (500, 800),
            ArticleSize::Medium => (800, 1_500),
            ArticleSize::Large => (1_500, 2_500),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TokenBudget {
    pub min_tokens: u32,
    pub max_tokens: u32,
    pub total_tokens: u32,
}

pub fn estimate_token_budget(size: ArticleSize, model: AiModel) -> TokenBudget {
    let (min_words, max_words) = size.word_range();
    let ceiling = model
        .output_token_limit()
        .saturating_sub(SYSTEM_PROMPT_RESERVE);
    let max_tokens = (max_words * 4 / 3).min(ceiling);
    let min_tokens = (min_words * 4 / 3).min(max_tokens);
    TokenBudget {
        min_tokens,
        max_tokens,
        total_tokens: max_tokens + SYSTEM_PROMPT_RESERVE,
    }
}

/// Everything a provider needs to write one article.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub main_keyword: String,
    pub title: String,
    pub keywords: Vec<String>,
    pub model: AiModel,
    pub settings: ContentSettings,
    pub budget: TokenBudget,
}

impl GenerationRequest {
    pub fn new(
        main_keyword: impl Into<String>,
        title: impl Into<String>,
        keywords: Vec<String>,
        settings: &ContentSettings,
    ) -> Self {
        let model = settings.settings.ai_model;
        Self {
            main_keyword: main_keyword.into(),
            title: title.into(),
            keywords,
            model,
            budget: estimate_token_budget(settings.settings.article_size, model),
            settings: settings.clone(),
        }
    }

    pub fn for_article(article: &BatchArticle, settings: &ContentSettings) -> Self {
        Self::new(
            article.main_keyword.clone(),
            article.title.clone(),
            article.keywords.clone(),
            settings,
        )
    }
}

/// Produces article markdown. Implementations talk to a concrete provider.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

/// One generator per provider; selection is a pure function of the model.
#[derive(Clone)]
pub struct ProviderSet {
    openai: Arc<dyn ContentGenerator>,
    anthropic: Arc<dyn ContentGenerator>,
}

impl ProviderSet {
    pub fn new(openai: Arc<dyn ContentGenerator>, anthropic: Arc<dyn ContentGenerator>) -> Self {
        Self { openai, anthropic }
    }

    /// Route every provider to the same generator.
    pub fn uniform(generator: Arc<dyn ContentGenerator>) -> Self {
        Self {
            openai: generator.clone(),
            anthropic: generator,
        }
    }

    pub fn select(&self, model: AiModel) -> Arc<dyn ContentGenerator> {
        match model.provider() {
            ModelProvider::OpenAi => self.openai.clone(),
            ModelProvider::Anthropic => self.anthropic.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str);

    #[async_trait]
    impl ContentGenerator for Fixed {
        async fn generate(&self, _request: &GenerationRequest) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn provider_is_pure_function_of_model() {
        assert_eq!(AiModel::Gpt4o.provider(), ModelProvider::OpenAi);
        assert_eq!(AiModel::Gpt4oMini.provider(), ModelProvider::OpenAi);
        assert_eq!(AiModel::Claude35Sonnet.provider(), ModelProvider::Anthropic);
        assert_eq!(AiModel::Claude3Haiku.provider(), ModelProvider::Anthropic);
    }

    #[test]
    fn budget_scales_with_size() {
        let small = estimate_token_budget(ArticleSize::Small, AiModel::Gpt4o);
        let large = estimate_token_budget(ArticleSize::Large, AiModel::Gpt4o);
        assert_eq!(small.min_tokens, 666);
        assert_eq!(small.max_tokens, 1_066);
        assert!(large.max_tokens > small.max_tokens);
        assert_eq!(large.total_tokens, large.max_tokens + SYSTEM_PROMPT_RESERVE);
    }

    #[test]
    fn budget_leaves_headroom_for_system_prompt() {
        let b = estimate_token_budget(ArticleSize::Large, AiModel::Claude3Haiku);
        assert_eq!(b.max_tokens, 4_096 - SYSTEM_PROMPT_RESERVE);
        assert!(b.min_tokens <= b.max_tokens);
        assert_eq!(b.total_tokens, 4_096);
    }

    #[tokio::test]
    async fn select_routes_by_provider() {
        let set = ProviderSet::new(Arc::new(Fixed("openai")), Arc::new(Fixed("anthropic")));
        let req = GenerationRequest::new("k", "t", vec![], &ContentSettings::default());
        let out = set.select(AiModel::Claude3Haiku).generate(&req).await.unwrap();
        assert_eq!(out, "anthropic");
        let out = set.select(AiModel::Gpt4oMini).generate(&req).await.unwrap();
        assert_eq!(out, "openai");
    }
}

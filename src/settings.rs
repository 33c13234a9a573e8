//! Content settings and the settings-change impact classifier.
//!
//! Every known field path maps to an impact tier through [`FIELD_IMPACTS`].
//! Fields missing from the table are still reported as changes, with
//! [`Impact::None`].
use crate::ai::{estimate_token_budget, TokenBudget};
use crate::model::{AiModel, ArticleSize};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ContentSettings {
    #[serde(default)]
    pub settings: CoreSettings,
    #[serde(default)]
    pub media_settings: MediaSettings,
    #[serde(default)]
    pub structure: StructureSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct CoreSettings {
    pub ai_model: AiModel,
    pub language: String,
    pub article_size: ArticleSize,
    pub article_type: String,
    pub tone_of_voice: String,
    pub point_of_view: String,
    pub target_country: String,
    pub humanize_text: bool,
    pub details_to_include: String,
}

impl Default for CoreSettings {
    fn default() -> Self {
        Self {
            ai_model: AiModel::Gpt4o,
            language: "en".into(),
            article_size: ArticleSize::Medium,
            article_type: "blog".into(),
            tone_of_voice: "friendly".into(),
            point_of_view: "second-person".into(),
            target_country: "us".into(),
            humanize_text: false,
            details_to_include: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct MediaSettings {
    pub ai_images: bool,
    pub number_of_images: u8,
    pub image_style: String,
    pub image_size: String,
    pub include_videos: bool,
    pub number_of_videos: u8,
}

impl Default for MediaSettings {
    fn default() -> Self {
        Self {
            ai_images: true,
            number_of_images: 2,
            image_style: "photo".into(),
            image_size: "1024x1024".into(),
            include_videos: false,
            number_of_videos: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct StructureSettings {
    pub include_hook: bool,
    pub include_conclusion: bool,
    pub include_faq: bool,
    pub include_key_takeaways: bool,
    pub include_table_of_contents: bool,
    pub include_tables: bool,
    pub include_lists: bool,
    pub include_quotes: bool,
    pub include_bold: bool,
    pub include_italics: bool,
}

impl Default for StructureSettings {
    fn default() -> Self {
        Self {
            include_hook: true,
            include_conclusion: true,
            include_faq: false,
            include_key_takeaways: false,
            include_table_of_contents: false,
            include_tables: false,
            include_lists: true,
            include_quotes: false,
            include_bold: true,
            include_italics: false,
        }
    }
}

/// Sparse update: only the keys present are compared and applied.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_settings: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structure: Option<Map<String, Value>>,
}

impl SettingsPatch {
    /// A patch carrying every field of `settings`.
    pub fn full(settings: &ContentSettings) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::to_value(settings)?)
    }

    fn category(&self, category: Category) -> Option<&Map<String, Value>> {
        match category {
            Category::Core => self.settings.as_ref(),
            Category::Media => self.media_settings.as_ref(),
            Category::Structure => self.structure.as_ref(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Category {
    Core,
    Media,
    Structure,
}

impl Category {
    const ALL: [Category; 3] = [Category::Core, Category::Media, Category::Structure];

    fn key(&self) -> &'static str {
        match self {
            Category::Core => "settings",
            Category::Media => "mediaSettings",
            Category::Structure => "structure",
        }
    }
}

/// Ordered so that `Full` is the maximum.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    None,
    Style,
    Partial,
    Full,
}

/// Field path, impact tier, and the section a partial change touches.
pub const FIELD_IMPACTS: &[(&str, Impact, Option<&str>)] = &[
    ("settings.aiModel", Impact::Full, None),
    ("settings.language", Impact::Full, None),
    ("settings.articleSize", Impact::Full, None),
    ("settings.articleType", Impact::Full, None),
    ("settings.toneOfVoice", Impact::Full, None),
    ("settings.pointOfView", Impact::Full, None),
    ("settings.targetCountry", Impact::Full, None),
    ("settings.humanizeText", Impact::Full, None),
    ("settings.detailsToInclude", Impact::Full, None),
    ("structure.includeHook", Impact::Partial, Some("introduction")),
    ("structure.includeConclusion", Impact::Partial, Some("conclusion")),
    ("structure.includeFaq", Impact::Partial, Some("faq")),
    ("structure.includeKeyTakeaways", Impact::Partial, Some("keyTakeaways")),
    ("structure.includeTableOfContents", Impact::Partial, Some("tableOfContents")),
    ("mediaSettings.aiImages", Impact::Partial, Some("images")),
    ("mediaSettings.numberOfImages", Impact::Partial, Some("images")),
    ("mediaSettings.includeVideos", Impact::Partial, Some("videos")),
    ("mediaSettings.numberOfVideos", Impact::Partial, Some("videos")),
    ("structure.includeTables", Impact::Style, None),
    ("structure.includeLists", Impact::Style, None),
    ("structure.includeQuotes", Impact::Style, None),
    ("structure.includeBold", Impact::Style, None),
    ("structure.includeItalics", Impact::Style, None),
    ("mediaSettings.imageStyle", Impact::Style, None),
    ("mediaSettings.imageSize", Impact::Style, None),
];

pub fn impact_of(field: &str) -> Impact {
    FIELD_IMPACTS
        .iter()
        .find(|(path, _, _)| *path == field)
        .map_or(Impact::None, |(_, impact, _)| *impact)
}

fn section_of(field: &str) -> Option<&'static str> {
    FIELD_IMPACTS
        .iter()
        .find(|(path, _, _)| *path == field)
        .and_then(|(_, _, section)| *section)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SettingsChange {
    pub field: String,
    pub from: Value,
    pub to: Value,
    pub impact: Impact,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CostEstimate {
    pub model: AiModel,
    pub budget: TokenBudget,
    pub estimated_usd: f64,
}

impl CostEstimate {
    pub fn for_settings(settings: &ContentSettings) -> Self {
        let model = settings.settings.ai_model;
        let budget = estimate_token_budget(settings.settings.article_size, model);
        Self {
            model,
            budget,
            estimated_usd: budget.total_tokens as f64 / 1_000.0
                * model.usd_per_1k_output_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChangeAnalysis {
    pub change_type: Impact,
    pub changes: Vec<SettingsChange>,
    pub affected_sections: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimate: Option<CostEstimate>,
}

impl ChangeAnalysis {
    pub fn requires_regeneration(&self) -> bool {
        self.change_type == Impact::Full
    }

    /// Attach a cost estimate computed from the settings that would be used
    /// for regeneration. Only `Full` analyses carry one.
    pub fn with_estimate(mut self, next: &ContentSettings) -> Self {
        if self.requires_regeneration() {
            self.estimate = Some(CostEstimate::for_settings(next));
        }
        self
    }
}

/// Compare every key of `patch` against `old`; unchanged keys are skipped.
pub fn detect_changes(old: &ContentSettings, patch: &SettingsPatch) -> Vec<SettingsChange> {
    let old_json = serde_json::to_value(old).unwrap_or(Value::Null);
    let mut changes = Vec::new();
    for category in Category::ALL {
        let Some(fields) = patch.category(category) else {
            continue;
        };
        for (key, to) in fields {
            let from = old_json
                .get(category.key())
                .and_then(|c| c.get(key))
                .cloned()
                .unwrap_or(Value::Null);
            if &from == to {
                continue;
            }
            let field = format!("{}.{}", category.key(), key);
            changes.push(SettingsChange {
                impact: impact_of(&field),
                field,
                from,
                to: to.clone(),
            });
        }
    }
    changes
}

pub fn analyze_impact(changes: Vec<SettingsChange>) -> ChangeAnalysis {
    let change_type = changes
        .iter()
        .map(|c| c.impact)
        .max()
        .unwrap_or(Impact::None);
    let affected_sections: BTreeSet<&str> = changes
        .iter()
        .filter(|c| c.impact == Impact::Partial)
        .filter_map(|c| section_of(&c.field))
        .collect();
    ChangeAnalysis {
        change_type,
        affected_sections: affected_sections.into_iter().map(str::to_string).collect(),
        changes,
        estimate: None,
    }
}

pub fn classify(old: &ContentSettings, patch: &SettingsPatch) -> ChangeAnalysis {
    analyze_impact(detect_changes(old, patch))
}

/// Merge `patch` into `old`. Unknown keys are dropped; values of the wrong
/// shape are rejected.
pub fn apply_patch(
    old: &ContentSettings,
    patch: &SettingsPatch,
) -> Result<ContentSettings, serde_json::Error> {
    let mut merged = serde_json::to_value(old)?;
    for category in Category::ALL {
        let Some(fields) = patch.category(category) else {
            continue;
        };
        if let Some(Value::Object(target)) = merged.get_mut(category.key()) {
            for (key, value) in fields {
                target.insert(key.clone(), value.clone());
            }
        }
    }
    serde_json::from_value(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn patch(v: Value) -> SettingsPatch {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn full_dominates_lower_tiers() {
        let old = ContentSettings::default();
        let p = patch(json!({
            "settings": { "aiModel": "claude-3-haiku" },
            "structure": { "includeBold": false, "includeFaq": true }
        }));
        let analysis = classify(&old, &p);
        assert_eq!(analysis.change_type, Impact::Full);
        assert_eq!(analysis.changes.len(), 3);
        assert_eq!(analysis.affected_sections, vec!["faq".to_string()]);
        assert!(analysis.requires_regeneration());
    }

    #[test]
    fn identical_patch_yields_none() {
        let old = ContentSettings::default();
        let p = SettingsPatch::full(&old).unwrap();
        let analysis = classify(&old, &p);
        assert_eq!(analysis.change_type, Impact::None);
        assert!(analysis.changes.is_empty());
        assert!(analysis.affected_sections.is_empty());

        let empty = classify(&old, &SettingsPatch::default());
        assert_eq!(empty.change_type, Impact::None);
        assert!(empty.changes.is_empty());
    }

    #[test]
    fn partial_collects_sections_without_duplicates() {
        let old = ContentSettings::default();
        let p = patch(json!({
            "mediaSettings": { "aiImages": false, "numberOfImages": 4 },
            "structure": { "includeConclusion": false, "includeItalics": true }
        }));
        let analysis = classify(&old, &p);
        assert_eq!(analysis.change_type, Impact::Partial);
        assert_eq!(
            analysis.affected_sections,
            vec!["conclusion".to_string(), "images".to_string()]
        );
        assert!(analysis.with_estimate(&old).estimate.is_none());
    }

    #[test]
    fn style_only_change() {
        let old = ContentSettings::default();
        let p = patch(json!({ "structure": { "includeBold": false } }));
        let analysis = classify(&old, &p);
        assert_eq!(analysis.change_type, Impact::Style);
        assert!(analysis.affected_sections.is_empty());
        assert_eq!(analysis.changes[0].from, json!(true));
        assert_eq!(analysis.changes[0].to, json!(false));
    }

    #[test]
    fn unknown_field_is_recorded_with_no_impact() {
        let old = ContentSettings::default();
        let p = patch(json!({ "settings": { "customNote": "hello" } }));
        let analysis = classify(&old, &p);
        assert_eq!(analysis.change_type, Impact::None);
        assert_eq!(analysis.changes.len(), 1);
        assert_eq!(analysis.changes[0].field, "settings.customNote");
        assert_eq!(analysis.changes[0].from, Value::Null);
    }

    #[test]
    fn every_table_entry_is_a_real_field() {
        let json = serde_json::to_value(ContentSettings::default()).unwrap();
        for (path, impact, section) in FIELD_IMPACTS {
            let (cat, key) = path.split_once('.').unwrap();
            assert!(json[cat].get(key).is_some(), "{} missing", path);
            assert_eq!(section.is_some(), *impact == Impact::Partial, "{}", path);
        }
    }

    #[test]
    fn apply_patch_merges_and_estimates() {
        let old = ContentSettings::default();
        let p = patch(json!({
            "settings": { "aiModel": "claude-3-5-sonnet", "articleSize": "large" }
        }));
        let next = apply_patch(&old, &p).unwrap();
        assert_eq!(next.settings.ai_model, AiModel::Claude35Sonnet);
        assert_eq!(next.settings.article_size, ArticleSize::Large);
        assert_eq!(next.structure, old.structure);

        let analysis = classify(&old, &p).with_estimate(&next);
        let estimate = analysis.estimate.unwrap();
        assert_eq!(estimate.model, AiModel::Claude35Sonnet);
        assert!(estimate.estimated_usd > 0.0);
    }

    #[test]
    fn apply_patch_rejects_bad_values() {
        let old = ContentSettings::default();
        let p = patch(json!({ "settings": { "aiModel": 42 } }));
        assert!(apply_patch(&old, &p).is_err());
    }
}

//! Turns raw provider markdown into a stored article: media substitution,
//! heading anchors, and an SEO/readability report.
use crate::ai::GenerationRequest;
use crate::media::{resolve_media, MediaResolver};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use slug::slugify;
use std::collections::HashMap;

static ANCHOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\{#[^}]*\}\s*$").expect("valid anchor regex"));
static IMAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"!\[[^\]]*\]\([^)]*\)").expect("valid image regex"));
static LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").expect("valid link regex"));
static INLINE_ANCHOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{#[^}]*\}").expect("valid inline anchor regex"));

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SeoAnalysis {
    pub word_count: usize,
    pub heading_count: usize,
    pub keyword_occurrences: usize,
    pub keyword_density: f64,
    pub covered_keywords: Vec<String>,
    pub missing_keywords: Vec<String>,
    pub readability_score: f64,
    pub title_has_keyword: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedArticle {
    pub content: String,
    pub seo: SeoAnalysis,
}

pub async fn render_article(
    media: &dyn MediaResolver,
    request: &GenerationRequest,
    raw: &str,
) -> RenderedArticle {
    let with_media = resolve_media(media, raw, &request.settings.media_settings).await;
    let content = annotate_markdown(&with_media, &request.title);
    let seo = analyze_seo(&content, &request.title, &request.main_keyword, &request.keywords);
    RenderedArticle { content, seo }
}

/// Ensure an H1 title and give every `##`/`###` heading a unique anchor.
/// Headings that already carry an anchor are left alone.
pub fn annotate_markdown(markdown: &str, title: &str) -> String {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut lines = Vec::new();
    let has_h1 = markdown.lines().any(|l| l.trim_start().starts_with("# "));
    if !has_h1 && !title.trim().is_empty() {
        lines.push(format!("# {}", title.trim()));
        lines.push(String::new());
    }
    for line in markdown.lines() {
        let trimmed = line.trim_start();
        let is_section = trimmed.starts_with("## ") || trimmed.starts_with("### ");
        if !is_section || ANCHOR.is_match(trimmed) {
            lines.push(line.to_string());
            continue;
        }
        let text = trimmed.trim_start_matches('#').trim();
        let base = slugify(text);
        if base.is_empty() {
            lines.push(line.to_string());
            continue;
        }
        let n = seen.entry(base.clone()).or_insert(0);
        *n += 1;
        let anchor = if *n == 1 {
            base
        } else {
            format!("{}-{}", base, n)
        };
        lines.push(format!("{} {{#{}}}", line.trim_end(), anchor));
    }
    lines.join("\n")
}

fn plain_text(markdown: &str) -> String {
    let text = IMAGE.replace_all(markdown, "");
    let text = LINK.replace_all(&text, "$1");
    let text = INLINE_ANCHOR.replace_all(&text, "");
    text.lines()
        .map(|l| l.trim_start_matches(|c: char| c == '#' || c == '>' || c == '-' || c == '*' || c.is_whitespace()))
        .collect::<Vec<_>>()
        .join("\n")
        .replace(['*', '_', '`'], "")
}

fn words(text: &str) -> Vec<&str> {
    text.split_whitespace()
        .filter(|w| w.chars().any(char::is_alphanumeric))
        .collect()
}

fn syllables(word: &str) -> usize {
    let lower: Vec<char> = word
        .chars()
        .filter(|c| c.is_alphabetic())
        .flat_map(char::to_lowercase)
        .collect();
    let vowel = |c: char| matches!(c, 'a' | 'e' | 'i' | 'o' | 'u' | 'y');
    let mut count: usize = 0;
    let mut prev = false;
    for &c in &lower {
        let v = vowel(c);
        if v && !prev {
            count += 1;
        }
        prev = v;
    }
    if lower.len() > 2 && lower.ends_with(&['e']) && !lower.ends_with(&['l', 'e']) {
        count = count.saturating_sub(1);
    }
    count.max(1)
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

pub fn analyze_seo(
    markdown: &str,
    title: &str,
    main_keyword: &str,
    keywords: &[String],
) -> SeoAnalysis {
    let text = plain_text(markdown);
    let lower = text.to_lowercase();
    let all_words = words(&text);
    let word_count = all_words.len();
    let heading_count = markdown
        .lines()
        .filter(|l| l.trim_start().starts_with('#'))
        .count();

    let needle = main_keyword.trim().to_lowercase();
    let keyword_occurrences = if needle.is_empty() {
        0
    } else {
        lower.matches(needle.as_str()).count()
    };
    let keyword_density = if word_count == 0 {
        0.0
    } else {
        let kw_words = needle.split_whitespace().count().max(1);
        round2((keyword_occurrences * kw_words) as f64 / word_count as f64 * 100.0)
    };

    let (covered_keywords, missing_keywords): (Vec<String>, Vec<String>) = keywords
        .iter()
        .filter(|k| !k.trim().is_empty())
        .cloned()
        .partition(|k| lower.contains(&k.trim().to_lowercase()));

    let sentences = text
        .split(['.', '!', '?'])
        .filter(|s| s.chars().any(char::is_alphanumeric))
        .count()
        .max(1);
    let readability_score = if word_count == 0 {
        0.0
    } else {
        let syl: usize = all_words.iter().map(|w| syllables(w)).sum();
        round2(
            206.835
                - 1.015 * (word_count as f64 / sentences as f64)
                - 84.6 * (syl as f64 / word_count as f64),
        )
    };

    SeoAnalysis {
        word_count,
        heading_count,
        keyword_occurrences,
        keyword_density,
        covered_keywords,
        missing_keywords,
        readability_score,
        title_has_keyword: !needle.is_empty() && title.to_lowercase().contains(&needle),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::NoMedia;
    use crate::settings::ContentSettings;

    #[test]
    fn anchors_collapse_punctuation() {
        let out = annotate_markdown("# T\n## Why Rust? Speed & Safety!\n##  --  ", "T");
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[1], "## Why Rust? Speed & Safety! {#why-rust-speed-safety}");
        assert_eq!(lines[2], "##  --  ");
    }

    #[test]
    fn syllable_heuristics() {
        assert_eq!(syllables("rust"), 1);
        assert_eq!(syllables("table"), 2);
        assert_eq!(syllables("make"), 1);
        assert_eq!(syllables("the"), 1);
        assert_eq!(syllables("42"), 1);
    }

    #[test]
    fn annotate_adds_title_and_unique_anchors() {
        let md = "## Setup\ntext\n## Setup\n### Done {#custom}\n#### Deep";
        let out = annotate_markdown(md, "Rust Guide");
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "# Rust Guide");
        assert_eq!(lines[2], "## Setup {#setup}");
        assert_eq!(lines[4], "## Setup {#setup-2}");
        assert_eq!(lines[5], "### Done {#custom}");
        assert_eq!(lines[6], "#### Deep");
    }

    #[test]
    fn annotate_keeps_existing_h1() {
        let out = annotate_markdown("# Own title\n\nbody", "Ignored");
        assert!(out.starts_with("# Own title"));
        assert!(!out.contains("Ignored"));
    }

    #[test]
    fn seo_counts_keywords_and_readability() {
        let md = "# Rust async\n\nRust async is fun. Learn Rust async today!\n\n![x](http://img) [tokio](http://t)";
        let seo = analyze_seo(
            md,
            "Rust async guide",
            "rust async",
            &["tokio".into(), "futures".into()],
        );
        assert_eq!(seo.keyword_occurrences, 3);
        assert_eq!(seo.heading_count, 1);
        assert_eq!(seo.covered_keywords, vec!["tokio".to_string()]);
        assert_eq!(seo.missing_keywords, vec!["futures".to_string()]);
        assert!(seo.title_has_keyword);
        assert!(seo.word_count >= 10);
        assert!(seo.keyword_density > 0.0);
        assert!(seo.readability_score != 0.0);
    }

    #[test]
    fn seo_of_empty_document() {
        let seo = analyze_seo("", "", "", &[]);
        assert_eq!(seo, SeoAnalysis::default());
    }

    #[tokio::test]
    async fn render_runs_full_pipeline() {
        let req = GenerationRequest::new("rust", "Rust tips", vec![], &ContentSettings::default());
        let out = render_article(&NoMedia, &req, "[IMAGE: crab]\n## Intro\nRust is nice.").await;
        assert!(out.content.starts_with("# Rust tips"));
        assert!(out.content.contains("## Intro {#intro}"));
        assert!(!out.content.contains("[IMAGE"));
        assert_eq!(out.seo.keyword_occurrences, 2);
    }
}

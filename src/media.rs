use crate::settings::MediaSettings;
use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

static PLACEHOLDER_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*\[(?:IMAGE|VIDEO):[^\]\n]*\][ \t]*(?:\r?\n|$)")
        .expect("valid placeholder line regex")
});
static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(?:IMAGE|VIDEO):[^\]\n]*\]").expect("valid placeholder regex"));

/// Replaces `[IMAGE: ...]` / `[VIDEO: ...]` placeholders with real media.
/// Placeholders the resolver cannot handle may be left in place; callers
/// strip whatever remains.
#[async_trait]
pub trait MediaResolver: Send + Sync {
    async fn resolve_placeholders(&self, markdown: &str, settings: &MediaSettings)
        -> Result<String>;
}

/// Resolver that never produces media.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMedia;

#[async_trait]
impl MediaResolver for NoMedia {
    async fn resolve_placeholders(
        &self,
        markdown: &str,
        _settings: &MediaSettings,
    ) -> Result<String> {
        Ok(markdown.to_string())
    }
}

pub fn count_placeholders(markdown: &str) -> usize {
    PLACEHOLDER.find_iter(markdown).count()
}

pub fn strip_placeholders(markdown: &str) -> String {
    let without_lines = PLACEHOLDER_LINE.replace_all(markdown, "");
    PLACEHOLDER.replace_all(&without_lines, "").into_owned()
}

/// Best-effort media substitution. Never fails and never leaves a
/// placeholder behind.
pub async fn resolve_media(
    resolver: &dyn MediaResolver,
    markdown: &str,
    settings: &MediaSettings,
) -> String {
    if count_placeholders(markdown) == 0 {
        return markdown.to_string();
    }
    if !settings.ai_images && !settings.include_videos {
        return strip_placeholders(markdown);
    }
    match resolver.resolve_placeholders(markdown, settings).await {
        Ok(resolved) => {
            let leftover = count_placeholders(&resolved);
            if leftover > 0 {
                warn!(leftover, "stripping unresolved media placeholders");
            }
            strip_placeholders(&resolved)
        }
        Err(err) => {
            warn!(?err, "media resolution failed; stripping placeholders");
            strip_placeholders(markdown)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    struct Failing;

    #[async_trait]
    impl MediaResolver for Failing {
        async fn resolve_placeholders(&self, _: &str, _: &MediaSettings) -> Result<String> {
            Err(anyhow!("image service down"))
        }
    }

    struct FirstOnly;

    #[async_trait]
    impl MediaResolver for FirstOnly {
        async fn resolve_placeholders(&self, md: &str, _: &MediaSettings) -> Result<String> {
            Ok(PLACEHOLDER
                .replace(md, "![cat](https://cdn.example/cat.png)")
                .into_owned())
        }
    }

    const MD: &str = "# Title\n\n[IMAGE: a cat]\n\nSome text [IMAGE: inline dog] here.\n[VIDEO: intro]\nEnd.";

    #[test]
    fn strip_removes_lines_and_inline_markers() {
        let out = strip_placeholders(MD);
        assert_eq!(count_placeholders(&out), 0);
        assert!(out.contains("Some text  here."));
        assert!(out.contains("# Title\n\n\nSome text"));
        assert!(out.ends_with("End."));
    }

    #[tokio::test]
    async fn resolver_error_still_strips() {
        let out = resolve_media(&Failing, MD, &MediaSettings::default()).await;
        assert_eq!(count_placeholders(&out), 0);
    }

    #[tokio::test]
    async fn partial_resolution_keeps_resolved_media() {
        let out = resolve_media(&FirstOnly, MD, &MediaSettings::default()).await;
        assert!(out.contains("![cat](https://cdn.example/cat.png)"));
        assert_eq!(count_placeholders(&out), 0);
    }

    #[tokio::test]
    async fn media_disabled_skips_resolver() {
        let settings = MediaSettings {
            ai_images: false,
            include_videos: false,
            ..MediaSettings::default()
        };
        let out = resolve_media(&FirstOnly, MD, &settings).await;
        assert!(!out.contains("cdn.example"));
        assert_eq!(count_placeholders(&out), 0);
    }
}

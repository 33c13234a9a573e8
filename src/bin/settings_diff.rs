use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use content_jobs::settings::{apply_patch, classify, ContentSettings, SettingsPatch};

/// Classify a settings change without touching any stored artifact.
#[derive(Parser, Debug)]
struct Args {
    /// JSON file with the current settings snapshot
    #[arg(long)]
    old: PathBuf,

    /// JSON file with the partial settings update
    #[arg(long)]
    patch: PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let old: ContentSettings = serde_json::from_str(
        &fs::read_to_string(&args.old).with_context(|| format!("reading {}", args.old.display()))?,
    )
    .context("invalid settings snapshot")?;
    let patch: SettingsPatch = serde_json::from_str(
        &fs::read_to_string(&args.patch)
            .with_context(|| format!("reading {}", args.patch.display()))?,
    )
    .context("invalid settings patch")?;

    let next = apply_patch(&old, &patch).context("patch does not produce valid settings")?;
    let analysis = classify(&old, &patch).with_estimate(&next);
    println!("{}", serde_json::to_string_pretty(&analysis)?);
    Ok(())
}

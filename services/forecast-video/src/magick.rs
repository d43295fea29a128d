//! ImageMagick `convert` wrappers: the image-filter/annotation engine.
//!
//! Three command-style operations are used: alpha-scale (in place),
//! flatten-composite over a background, and text annotation. Argument
//! construction is separated from execution so the exact invocations stay
//! testable without ImageMagick installed.

use std::path::Path;
use std::process::Stdio;

use anyhow::{anyhow, Context, Result};
use tokio::process::Command;

/// `convert img -alpha set -background none -channel A -evaluate multiply F
/// +channel img` — scales the alpha channel in place.
pub fn alpha_scale_args(image: &Path, opacity: f64) -> Vec<String> {
    vec![
        image.display().to_string(),
        "-alpha".to_string(),
        "set".to_string(),
        "-background".to_string(),
        "none".to_string(),
        "-channel".to_string(),
        "A".to_string(),
        "-evaluate".to_string(),
        "multiply".to_string(),
        opacity.to_string(),
        "+channel".to_string(),
        image.display().to_string(),
    ]
}

/// `convert bg overlay -gravity center -background None -layers Flatten out`
pub fn flatten_composite_args(background: &Path, overlay: &Path, output: &Path) -> Vec<String> {
    vec![
        background.display().to_string(),
        overlay.display().to_string(),
        "-gravity".to_string(),
        "center".to_string(),
        "-background".to_string(),
        "None".to_string(),
        "-layers".to_string(),
        "Flatten".to_string(),
        output.display().to_string(),
    ]
}

/// `convert img -background Khaki ... -annotate +10+10 text out`
pub fn annotate_text_args(image: &Path, output: &Path, text: &str) -> Vec<String> {
    vec![
        image.display().to_string(),
        "-background".to_string(),
        "Khaki".to_string(),
        "-font".to_string(),
        "Times-New-Roman".to_string(),
        "-pointsize".to_string(),
        "48".to_string(),
        "-weight".to_string(),
        "Bold".to_string(),
        "-gravity".to_string(),
        "north".to_string(),
        "-annotate".to_string(),
        "+10+10".to_string(),
        text.to_string(),
        output.display().to_string(),
    ]
}

pub async fn alpha_scale(image: &Path, opacity: f64) -> Result<()> {
    run_convert(alpha_scale_args(image, opacity)).await
}

pub async fn flatten_composite(background: &Path, overlay: &Path, output: &Path) -> Result<()> {
    run_convert(flatten_composite_args(background, overlay, output)).await
}

pub async fn annotate_text(image: &Path, output: &Path, text: &str) -> Result<()> {
    run_convert(annotate_text_args(image, output, text)).await
}

async fn run_convert(args: Vec<String>) -> Result<()> {
    let output = Command::new("convert")
        .args(&args)
        .stdin(Stdio::null())
        .output()
        .await
        .context("failed to spawn convert (is ImageMagick installed and on PATH?)")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!(
            "convert exited with {}: {}",
            output.status,
            stderr.trim()
        ));
    }

    Ok(())
}

use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use log::info;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use crate::{
    http::Transport,
    provider::Capability,
    request::{ChatPayload, Request},
    runtime::Runtime,
};

use super::{config::Config, failure, select_chain};

pub const DEFAULT_PROMPT: &str = "Describe this image in detail: the subject, its colors, \
    its style and any distinctive features.";

#[derive(Debug, Clone)]
pub struct AnalyzeOptions {
    pub image: PathBuf,
    pub prompt: Option<String>,
    pub chain: Option<String>,
}

#[tracing::instrument(skip(config, cancel))]
pub(crate) async fn run<R: Runtime, T: Transport>(
    config: &Config<R, T>,
    options: AnalyzeOptions,
    cancel: &CancellationToken,
) -> Result<()> {
    let text = analyze_image(config, &options, cancel).await?;
    println!("{}", text);
    Ok(())
}

pub(crate) async fn analyze_image<R: Runtime, T: Transport>(
    config: &Config<R, T>,
    options: &AnalyzeOptions,
    cancel: &CancellationToken,
) -> Result<String> {
    let chain = select_chain(config, options.chain.as_deref(), Capability::Analyze)?;
    let image = data_url(config.runtime(), &options.image)?;
    let prompt = options.prompt.as_deref().unwrap_or(DEFAULT_PROMPT);

    let request = Request::chat(ChatPayload::vision(prompt, image));
    let outcome = config
        .client
        .call(&request, &chain, cancel)
        .await
        .map_err(failure)?;

    info!(
        "Analysis served by {} after {} attempt(s)",
        outcome.provider,
        outcome.attempts.len()
    );
    outcome
        .output
        .into_text()
        .context("Provider returned images instead of text")
}

/// Reads an image file into a base64 `data:` URL.
fn data_url<R: Runtime>(runtime: &R, path: &Path) -> Result<String> {
    let mime = image_mime(path)?;
    let bytes = runtime
        .read(path)
        .with_context(|| format!("Failed to read image {}", path.display()))?;
    if bytes.is_empty() {
        bail!("Image file {} is empty", path.display());
    }
    Ok(format!("data:{};base64,{}", mime, STANDARD.encode(bytes)))
}

fn image_mime(path: &Path) -> Result<&'static str> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match extension.as_str() {
        "png" => Ok("image/png"),
        "jpg" | "jpeg" => Ok("image/jpeg"),
        "webp" => Ok("image/webp"),
        "gif" => Ok("image/gif"),
        _ => bail!(
            "Unsupported image type: {}. Expected png, jpg, webp or gif.",
            path.display()
        ),
    }
}

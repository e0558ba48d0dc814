use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures_util::future::join_all;
use log::{info, warn};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use crate::{
    error::ErrorKind,
    http::Transport,
    provider::Capability,
    request::{Image, ImagePayload, Request},
    runtime::Runtime,
};

use super::{config::Config, failure, select_chain};

/// File stem used when `--out` is not given
const DEFAULT_OUTPUT_STEM: &str = "mintcall";

#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub seed: Option<i64>,
    pub variations: u32,
    /// Reference image; switches generation to image-to-image
    pub init_image: Option<PathBuf>,
    pub denoising_strength: Option<f64>,
    pub out: Option<PathBuf>,
    pub chain: Option<String>,
}

impl GenerateOptions {
    pub fn new(prompt: impl Into<String>) -> Self {
        let defaults = ImagePayload::new("");
        Self {
            prompt: prompt.into(),
            negative_prompt: None,
            width: defaults.width,
            height: defaults.height,
            steps: defaults.steps,
            seed: None,
            variations: 1,
            init_image: None,
            denoising_strength: None,
            out: None,
            chain: None,
        }
    }

    /// Payload for the `index`-th variation. A fixed seed is offset per
    /// variation so variations differ.
    fn payload(&self, index: u32, init_image: Option<&str>) -> Result<ImagePayload> {
        let seed = match self.seed {
            Some(seed) => Some(seed.checked_add(i64::from(index)).with_context(|| {
                format!("Seed {} is too large for variation {}", seed, index + 1)
            })?),
            None => None,
        };
        Ok(ImagePayload {
            negative_prompt: self.negative_prompt.clone(),
            width: self.width,
            height: self.height,
            steps: self.steps,
            seed,
            init_image: init_image.map(str::to_string),
            denoising_strength: self.denoising_strength,
            ..ImagePayload::new(self.prompt.clone())
        })
    }
}

#[tracing::instrument(skip(config, cancel))]
pub(crate) async fn run<R: Runtime, T: Transport>(
    config: &Config<R, T>,
    options: GenerateOptions,
    cancel: &CancellationToken,
) -> Result<()> {
    for path in generate_images(config, &options, cancel).await? {
        println!("{}", path.display());
    }
    Ok(())
}

/// Runs all variations concurrently and writes every image produced.
/// Returns the written paths. Fails only when no variation succeeded.
pub(crate) async fn generate_images<R: Runtime, T: Transport>(
    config: &Config<R, T>,
    options: &GenerateOptions,
    cancel: &CancellationToken,
) -> Result<Vec<PathBuf>> {
    if options.variations == 0 {
        bail!("--variations must be at least 1");
    }
    if let Some(strength) = options.denoising_strength {
        if options.init_image.is_none() {
            bail!("--denoise requires --init-image");
        }
        if !(0.0..=1.0).contains(&strength) {
            bail!("--denoise must be between 0.0 and 1.0, got {}", strength);
        }
    }
    let chain = select_chain(config, options.chain.as_deref(), Capability::Generate)?;

    let init_image = match &options.init_image {
        Some(path) => Some(encode_image(config.runtime(), path)?),
        None => None,
    };
    let requests = (0..options.variations)
        .map(|index| options.payload(index, init_image.as_deref()).map(Request::image))
        .collect::<Result<Vec<_>>>()?;
    let results = join_all(
        requests
            .iter()
            .map(|request| config.client.call(request, &chain, cancel)),
    )
    .await;

    let mut images = Vec::new();
    let mut first_error = None;
    for (index, result) in results.into_iter().enumerate() {
        match result {
            Ok(outcome) => {
                info!(
                    "Variation {} served by {} after {} attempt(s)",
                    index + 1,
                    outcome.provider,
                    outcome.attempts.len()
                );
                let produced = outcome
                    .output
                    .into_images()
                    .context("Provider returned text instead of images")?;
                images.extend(produced);
            }
            Err(err) => {
                if err.kind != ErrorKind::Cancelled {
                    warn!("Variation {} failed: {}", index + 1, err);
                }
                first_error.get_or_insert(err);
            }
        }
    }

    if images.is_empty() {
        return Err(match first_error {
            Some(err) => failure(err),
            None => anyhow::anyhow!("No image generated"),
        });
    }

    let base = options
        .out
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_STEM));
    write_images(config.runtime(), &base, &images)
}

/// Reads a reference image as plain base64.
fn encode_image<R: Runtime>(runtime: &R, path: &Path) -> Result<String> {
    let bytes = runtime
        .read(path)
        .with_context(|| format!("Failed to read init image {}", path.display()))?;
    if bytes.is_empty() {
        bail!("Init image {} is empty", path.display());
    }
    Ok(STANDARD.encode(bytes))
}

fn write_images<R: Runtime>(runtime: &R, base: &Path, images: &[Image]) -> Result<Vec<PathBuf>> {
    if let Some(parent) = base.parent()
        && !parent.as_os_str().is_empty()
        && !runtime.exists(parent)
    {
        runtime.create_dir_all(parent)?;
    }

    let mut written = Vec::with_capacity(images.len());
    for (index, image) in images.iter().enumerate() {
        let path = output_path(base, image, index, images.len());
        runtime
            .write(&path, &image.bytes)
            .with_context(|| format!("Failed to save image to {}", path.display()))?;
        info!("Saved {}", path.display());
        written.push(path);
    }
    Ok(written)
}

/// `out.png` for a single image, `out-1.png`, `out-2.png`... otherwise. A
/// missing extension is taken from the image type.
fn output_path(base: &Path, image: &Image, index: usize, total: usize) -> PathBuf {
    let extension = base
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or(image.extension())
        .to_string();
    if total == 1 {
        return base.with_extension(extension);
    }
    let stem = base
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(DEFAULT_OUTPUT_STEM);
    base.with_file_name(format!("{}-{}.{}", stem, index + 1, extension))
}

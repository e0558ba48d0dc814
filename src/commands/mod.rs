use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{CallError, ErrorKind},
    http::{HttpClient, Transport},
    provider::{Capability, ProviderConfig},
    runtime::Runtime,
};

mod analyze;
mod check;
pub mod config;
mod generate;
mod providers;

pub use analyze::AnalyzeOptions;
pub use generate::GenerateOptions;

use config::Config;

/// Analyze an image with the vision chain and print the model's answer.
#[tracing::instrument(skip(runtime, options, cancel))]
pub async fn analyze<R: Runtime>(
    runtime: R,
    config_path: Option<&Path>,
    options: AnalyzeOptions,
    cancel: CancellationToken,
) -> Result<()> {
    let config: Config<R, HttpClient> = Config::new(runtime, config_path)?;
    analyze::run(&config, options, &cancel).await
}

/// Generate one or more images and write them to disk.
#[tracing::instrument(skip(runtime, options, cancel))]
pub async fn generate<R: Runtime>(
    runtime: R,
    config_path: Option<&Path>,
    options: GenerateOptions,
    cancel: CancellationToken,
) -> Result<()> {
    let config: Config<R, HttpClient> = Config::new(runtime, config_path)?;
    generate::run(&config, options, &cancel).await
}

/// List configured providers and chains
#[tracing::instrument(skip(runtime))]
pub fn providers<R: Runtime>(runtime: R, config_path: Option<&Path>) -> Result<()> {
    let config: Config<R, HttpClient> = Config::new(runtime, config_path)?;
    providers::run(&config);
    Ok(())
}

/// Probe every configured provider
#[tracing::instrument(skip(runtime, cancel))]
pub async fn check<R: Runtime>(
    runtime: R,
    config_path: Option<&Path>,
    cancel: CancellationToken,
) -> Result<()> {
    let config: Config<R, HttpClient> = Config::new(runtime, config_path)?;
    check::run(&config, &cancel).await
}

/// Resolves `--chain` or the default chain for a capability.
fn select_chain<R: Runtime, T: Transport>(
    config: &Config<R, T>,
    chain: Option<&str>,
    capability: Capability,
) -> Result<Vec<Arc<ProviderConfig>>> {
    let providers = match chain {
        Some(name) => config.registry.chain(name)?,
        None => config.registry.chain_for(capability),
    };
    if providers.is_empty() {
        anyhow::bail!("No provider is configured for {}", capability);
    }
    Ok(providers)
}

/// Turns a call failure into an error carrying a hint for the user.
fn failure(err: CallError) -> anyhow::Error {
    let message = match err.kind {
        ErrorKind::AllProvidersExhausted => {
            format!("All providers failed. {}", hint(err.root_kind()))
        }
        kind => hint(kind).to_string(),
    };
    anyhow::Error::new(err).context(message)
}

fn hint(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Timeout => {
            "The provider did not respond in time. Try again or raise timeout_secs."
        }
        ErrorKind::AuthFailure => {
            "The provider rejected the credential. Check the API key configured for it."
        }
        ErrorKind::RateLimited => "Rate limit reached. Wait a moment and try again.",
        ErrorKind::ServiceUnavailable => {
            "The service is unavailable. Check that it is running and reachable."
        }
        ErrorKind::BadRequest => {
            "The provider rejected the request. Check the prompt and parameters."
        }
        ErrorKind::ParseFailure => "The provider returned a response that could not be read.",
        ErrorKind::Upstream => "The provider returned an unexpected error.",
        ErrorKind::AllProvidersExhausted => "All providers failed.",
        ErrorKind::ConfigurationError => "The provider chain is misconfigured.",
        ErrorKind::Cancelled => "Cancelled.",
    }
}

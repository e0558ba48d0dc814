use anyhow::{Result, bail};
use futures_util::future::join_all;
use log::debug;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::{error::CallError, http::Transport, runtime::Runtime};

use super::{config::Config, failure};

/// Reachability of one provider.
#[derive(Debug)]
pub(crate) struct Health {
    pub name: String,
    pub result: Result<Duration, CallError>,
}

impl Health {
    fn line(&self) -> String {
        match &self.result {
            Ok(elapsed) => format!("{}: online ({} ms)", self.name, elapsed.as_millis()),
            Err(err) => format!("{}: offline ({})", self.name, err),
        }
    }
}

#[tracing::instrument(skip(config, cancel))]
pub(crate) async fn run<R: Runtime, T: Transport>(
    config: &Config<R, T>,
    cancel: &CancellationToken,
) -> Result<()> {
    let report = probe_all(config, cancel).await;
    if cancel.is_cancelled() {
        return Err(failure(CallError::cancelled()));
    }
    for health in &report {
        println!("{}", health.line());
    }

    let online = report.iter().filter(|h| h.result.is_ok()).count();
    println!("{}/{} providers online", online, report.len());
    if online == 0 && !report.is_empty() {
        bail!("No provider is reachable");
    }
    Ok(())
}

pub(crate) async fn probe_all<R: Runtime, T: Transport>(
    config: &Config<R, T>,
    cancel: &CancellationToken,
) -> Vec<Health> {
    let providers = config.registry.providers();
    let results = join_all(providers.iter().map(|p| config.client.probe(p, cancel))).await;

    providers
        .iter()
        .zip(results)
        .map(|(provider, result)| {
            debug!("Probe {}: {:?}", provider.name, result);
            Health {
                name: provider.name.clone(),
                result,
            }
        })
        .collect()
}

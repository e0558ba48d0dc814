use crate::{
    http::Transport,
    provider::{ProviderConfig, ProviderRegistry},
    runtime::Runtime,
};

use super::config::Config;

pub(crate) fn run<R: Runtime, T: Transport>(config: &Config<R, T>) {
    for line in render(&config.registry) {
        println!("{}", line);
    }
}

/// One line per provider, then one line per chain. Never includes secrets.
fn render(registry: &ProviderRegistry) -> Vec<String> {
    if registry.is_empty() {
        return vec!["No providers configured.".to_string()];
    }

    let width = registry
        .providers()
        .iter()
        .map(|p| p.name.len())
        .max()
        .unwrap_or(0);

    let mut lines = Vec::new();
    for provider in registry.providers() {
        let model = provider
            .model
            .as_deref()
            .map(|m| format!(" model={}", m))
            .unwrap_or_default();
        lines.push(format!(
            "{:width$}  {:<8}  {:<11}  {}{}  [{}]",
            provider.name,
            provider.capability.to_string(),
            provider.kind.to_string(),
            provider.base_url,
            model,
            credential_status(provider),
            width = width
        ));
    }

    let chains = registry.chain_names();
    if !chains.is_empty() {
        lines.push(String::new());
        for name in chains {
            let members = registry.chain_members(name).unwrap_or_default();
            lines.push(format!("{}: {}", name, members.join(" -> ")));
        }
    }
    lines
}

fn credential_status(provider: &ProviderConfig) -> String {
    match (&provider.credential, &provider.credential_env) {
        (Some(_), _) => "credential set".to_string(),
        (None, _) if !provider.requires_credential() => "no credential needed".to_string(),
        (None, Some(var)) => format!("missing {}", var),
        (None, None) => "missing credential".to_string(),
    }
}

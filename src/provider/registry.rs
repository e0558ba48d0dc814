//! Registry of configured providers and named provider chains.
//!
//! Built once from configuration and read-only afterwards. Chains are
//! resolved to ordered lists of shared provider descriptors that callers
//! hand to [`crate::client::ResilientClient::call`].

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result, bail};

use super::{Capability, ProviderConfig};

#[derive(Debug, Default)]
pub struct ProviderRegistry {
    /// Providers in registration order
    providers: Vec<Arc<ProviderConfig>>,
    chains: HashMap<String, Vec<String>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider. Names must be unique.
    pub fn register(&mut self, provider: ProviderConfig) -> Result<()> {
        if self.get(&provider.name).is_some() {
            bail!("Duplicate provider name: {}", provider.name);
        }
        self.providers.push(Arc::new(provider));
        Ok(())
    }

    /// Define a named chain. Every member must already be registered.
    pub fn define_chain(&mut self, name: impl Into<String>, members: Vec<String>) -> Result<()> {
        let name = name.into();
        if members.is_empty() {
            bail!("Chain '{}' has no providers", name);
        }
        for member in &members {
            if self.get(member).is_none() {
                bail!("Chain '{}' references unknown provider '{}'", name, member);
            }
        }
        self.chains.insert(name, members);
        Ok(())
    }

    /// Get a registered provider by name.
    pub fn get(&self, name: &str) -> Option<&Arc<ProviderConfig>> {
        self.providers.iter().find(|p| p.name == name)
    }

    /// All providers in registration order.
    pub fn providers(&self) -> &[Arc<ProviderConfig>] {
        &self.providers
    }

    /// Chain names, sorted.
    pub fn chain_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.chains.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Member names of a chain.
    pub fn chain_members(&self, name: &str) -> Option<&[String]> {
        self.chains.get(name).map(Vec::as_slice)
    }

    /// Resolve a named chain into provider descriptors.
    pub fn chain(&self, name: &str) -> Result<Vec<Arc<ProviderConfig>>> {
        let members = self
            .chains
            .get(name)
            .with_context(|| format!("No provider chain named '{}'", name))?;
        self.resolve(members)
    }

    /// Resolve explicit provider names into descriptors, keeping order.
    pub fn resolve(&self, names: &[String]) -> Result<Vec<Arc<ProviderConfig>>> {
        names
            .iter()
            .map(|name| {
                self.get(name)
                    .cloned()
                    .with_context(|| format!("No provider registered with name: {}", name))
            })
            .collect()
    }

    /// Default chain for a capability: the chain named after it if defined,
    /// otherwise every provider with that capability in registration order.
    pub fn chain_for(&self, capability: Capability) -> Vec<Arc<ProviderConfig>> {
        if let Ok(chain) = self.chain(&capability.to_string()) {
            return chain;
        }
        self.providers
            .iter()
            .filter(|p| p.capability == capability)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

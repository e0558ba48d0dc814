use anyhow::Result;
use log::debug;
use reqwest::Client;

use std::path::Path;

use crate::{
    client::ResilientClient,
    config::Settings,
    http::{HttpClient, Transport},
    provider::ProviderRegistry,
    runtime::Runtime,
};

pub struct Config<R: Runtime, T: Transport> {
    pub client: ResilientClient<T, R>,
    pub registry: ProviderRegistry,
    pub settings: Settings,
}

impl<R: Runtime> Config<R, HttpClient> {
    pub fn new(runtime: R, config_path: Option<&Path>) -> Result<Self> {
        let settings = Settings::load(&runtime, config_path)?;
        debug!("Using user agent {}", settings.user_agent);

        let client = Client::builder().user_agent(settings.user_agent.as_str()).build()?;
        Self::from_parts(settings, HttpClient::new(client), runtime)
    }
}

impl<R: Runtime, T: Transport> Config<R, T> {
    pub fn from_parts(settings: Settings, transport: T, runtime: R) -> Result<Self> {
        let registry = settings.registry()?;
        let client = ResilientClient::new(
            transport,
            runtime,
            settings.retry_policy(),
            settings.timeout(),
        );
        Ok(Self {
            client,
            registry,
            settings,
        })
    }

    pub fn runtime(&self) -> &R {
        self.client.runtime()
    }
}

use crate::{
    errors::ConfigError,
    registry::{Client, DefaultRegistry},
};
use reqwest::header::HeaderValue;
use std::{convert::TryInto, time::Duration};

/// Builder for configuring custom [Client] instances
#[derive(Debug)]
pub struct ClientBuilder {
    req: reqwest::ClientBuilder,
    default_registry: Option<DefaultRegistry>,
    max_concurrent_downloads: usize,
}

impl ClientBuilder {
    /// Start constructing a custom registry client
    pub fn new() -> Self {
        ClientBuilder {
            req: reqwest::Client::builder().user_agent(Client::default_user_agent()),
            default_registry: None,
            max_concurrent_downloads: Client::DEFAULT_CONCURRENT_DOWNLOADS,
        }
    }

    /// Set a timeout for each network request
    ///
    /// This timeout applies from the beginning of a request until the last
    /// byte has been received, so it also bounds each layer download. By
    /// default there is no timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.req = self.req.timeout(timeout);
        self
    }

    /// Set a timeout for only the initial connect phase of each network request
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.req = self.req.connect_timeout(timeout);
        self
    }

    /// Sets the `User-Agent` header used by this client
    ///
    /// By default, the value returned by [Client::default_user_agent()] is
    /// used.
    pub fn user_agent<V>(mut self, value: V) -> Self
    where
        V: TryInto<HeaderValue>,
        V::Error: Into<http::Error>,
    {
        self.req = self.req.user_agent(value);
        self
    }

    /// How many layer downloads may be in flight at once
    ///
    /// Layers are always extracted one at a time in manifest order, no matter
    /// which download finishes first. Values below one are treated as one.
    pub fn max_concurrent_downloads(mut self, count: usize) -> Self {
        self.max_concurrent_downloads = count.max(1);
        self
    }

    /// Change the registry server
    ///
    /// The default if unset comes from [Client::default_registry()].
    pub fn registry(mut self, default_registry: &DefaultRegistry) -> Self {
        self.default_registry = Some(default_registry.clone());
        self
    }

    /// Construct a Client using the parameters from this Builder
    pub fn build(self) -> Result<Client, ConfigError> {
        let registry = match self.default_registry {
            Some(registry) => registry,
            None => Client::default_registry()?,
        };
        log::debug!("using registry {}", registry.registry_url);
        Ok(Client::from_parts(
            self.req.build()?,
            registry,
            self.max_concurrent_downloads,
        ))
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        ClientBuilder::new()
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! High-level entry-point – "turn the key and go".
//!
//! The [`ErrataLoader`] assembles the layered configuration, initializes
//! logging, starts the filter with the `filter` payload and returns an
//! [`Errata`] whose server is ready to [`start`](Errata::start).
//!
//! ```rust,no_run
//! # async fn run() -> Result<(), errata::LoaderError> {
//! let errata = errata::ErrataLoader::new()
//!     .with_config_file("config.toml")
//!     .with_env_vars()
//!     .build()?;
//! errata.start().await
//! # }
//! ```


use log::LevelFilter;
use std::env;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{Config, ConfigError, ConfigProvider, EnvConfigProvider, FileConfigProvider};
use crate::core::{ProxyError, RootContext};
use crate::filter::ProblemDetailsFilter;
use crate::logging::config::LoggingConfig;
use crate::logging::{init, init_with_config};
use crate::proxy::ProxyCore;
use crate::server::{ProxyServer, ServerConfig};
use crate::{error_fmt, info_fmt};

/// Default prefix of configuration environment variables.
pub const DEFAULT_ENV_PREFIX: &str = "ERRATA_";

/// Errors that can occur during Errata initialization.
#[derive(Error, Debug)]
pub enum LoaderError {
    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigError(#[from] ConfigError),

    /// Proxy error
    #[error("proxy error: {0}")]
    ProxyError(#[from] ProxyError),
}

/// Builder for initializing and configuring Errata.
#[derive(Debug, Default)]
pub struct ErrataLoader {
    config: Option<Config>,
    config_file_path: Option<String>,
    use_env_vars: bool,
    env_prefix: Option<String>,
    providers: Vec<Arc<dyn ConfigProvider>>,
    filter: Option<Box<dyn RootContext>>,
}

impl ErrataLoader {
    /// Create a new loader with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a ready-made configuration; file, env and provider sources are ignored.
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Set a configuration file to load.
    pub fn with_config_file(mut self, file_path: &str) -> Self {
        self.config_file_path = Some(file_path.to_string());
        self
    }

    /// Enable environment variable configuration.
    pub fn with_env_vars(mut self) -> Self {
        self.use_env_vars = true;
        self
    }

    /// Set a custom prefix for environment variables (default is "ERRATA_").
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_string());
        self.use_env_vars = true;
        self
    }

    /// Add a configuration provider. Providers added later take precedence.
    pub fn with_provider<P: ConfigProvider + 'static>(mut self, provider: P) -> Self {
        self.providers.push(Arc::new(provider));
        self
    }

    /// Run `filter` instead of the problem details filter.
    pub fn with_filter<R: RootContext + 'static>(mut self, filter: R) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }

    /// Build and initialize Errata.
    ///
    /// Precedence, lowest first: config file, environment, added providers.
    pub fn build(self) -> Result<Errata, LoaderError> {
        let config = match self.config {
            Some(config) => config,
            None => {
                let mut builder = Config::builder();

                if let Some(file_path) = &self.config_file_path {
                    builder = builder.with_provider(FileConfigProvider::new(file_path)?);
                }

                if self.use_env_vars {
                    let prefix = self.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
                    builder = builder.with_provider(EnvConfigProvider::new(prefix));
                }

                for provider in self.providers {
                    builder = builder.with_shared_provider(provider);
                }

                builder.build()
            }
        };

        init_logging_from(&config);
        info_fmt!(
            "Startup",
            "Errata starting up with providers {:?}",
            config.provider_names()
        );

        let payload = config.plugin_payload()?;
        let mut filter = self
            .filter
            .unwrap_or_else(|| Box::new(ProblemDetailsFilter::default()));
        filter.on_plugin_start(&payload).map_err(|e| {
            error_fmt!("Startup", "Filter '{}' refused its configuration: {}", filter.name(), e);
            e
        })?;
        let filter: Arc<dyn RootContext> = Arc::from(filter);

        let config = Arc::new(config);
        let core = ProxyCore::new(&config, filter)?;

        let server_config = ServerConfig {
            host: config.get_or_default("server.host", ServerConfig::default().host)?,
            port: config.get_or_default("server.port", ServerConfig::default().port)?,
            health_port: config
                .get_or_default("server.health_port", ServerConfig::default().health_port)?,
        };

        Ok(Errata {
            config,
            server: ProxyServer::new(server_config, Arc::new(core)),
        })
    }
}

fn init_logging_from(config: &Config) {
    let env_level = env::var("RUST_LOG_LEVEL")
        .ok()
        .and_then(|level| level.parse::<LevelFilter>().ok());

    match config.get::<LoggingConfig>("logging") {
        Ok(Some(logging_config)) => {
            let level = env_level.unwrap_or_else(|| logging_config.level_filter());
            init_with_config(level, &logging_config);
        }
        Ok(None) => init(env_level),
        Err(e) => {
            init(env_level);
            error_fmt!("Startup", "Failed to read logging configuration: {}", e);
        }
    }
}

/// An initialized proxy, ready to serve.
#[derive(Debug, Clone)]
pub struct Errata {
    config: Arc<Config>,
    server: ProxyServer,
}

impl Errata {
    /// Create a new loader for initializing Errata.
    pub fn loader() -> ErrataLoader {
        ErrataLoader::new()
    }

    /// Get the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the server.
    pub fn server(&self) -> &ProxyServer {
        &self.server
    }

    /// Start the proxy server and run until shutdown.
    pub async fn start(&self) -> Result<(), LoaderError> {
        self.server.start().await.map_err(LoaderError::ProxyError)
    }
}

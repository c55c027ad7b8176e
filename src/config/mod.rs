// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Errata configuration subsystem
//!
//! Two kinds of configuration live here:
//!
//! * the **host** configuration, assembled from an ordered list of
//!   [`ConfigProvider`]s where later providers override earlier ones
//!   (`FileConfigProvider` for `errata.{toml,json,yaml}`, `EnvConfigProvider`
//!   for `ERRATA_SERVER__PORT=…`, or your own provider);
//! * the **plugin** configuration ([`PluginConfiguration`]), the immutable
//!   filter settings decoded from the `filter` key once at startup.
//!
//! | key | type | default | description |
//! |-----|------|---------|-------------|
//! | `server.host`        | string  | `127.0.0.1` | Address to bind                         |
//! | `server.port`        | integer | `8080`      | Port to bind                            |
//! | `server.health_port` | integer | `8081`      | Port for `/health` and `/ready`         |
//! | `server.body_limit`  | integer | `5242880`   | Max buffered response bytes per exchange|
//! | `upstream.url`       | string  | –           | Base URL every request is forwarded to  |
//! | `upstream.timeout`   | integer | `30`        | Upstream timeout in seconds             |
//! | `proxy.generate_request_id` | bool | `true` | Add `x-request-id` when missing        |
//! | `filter`             | object  | –           | The plugin configuration                |
//! | `logging`            | object  | –           | See [`crate::logging::config::LoggingConfig`] |

mod env;
pub mod error;
mod file;
pub mod plugin;


pub use env::EnvConfigProvider;
pub use error::ConfigError;
pub use file::{FileConfigProvider, FileFormat};
pub use plugin::PluginConfiguration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt::Debug;
use std::sync::Arc;

/// Core configuration provider trait that all configuration sources must implement.
/// This trait is object-safe since it doesn't contain generic methods.
pub trait ConfigProvider: Debug + Send + Sync {
    /// Check if the configuration provider has a value for the given key.
    fn has(&self, key: &str) -> bool;

    /// Get the name of the configuration provider for debugging purposes.
    fn provider_name(&self) -> &str;

    /// Get a raw configuration value by key.
    fn get_raw(&self, key: &str) -> Result<Option<Value>, ConfigError>;
}

/// Extension trait for ConfigProvider that provides methods for typed access.
pub trait ConfigProviderExt: ConfigProvider {
    /// Get a configuration value by key and deserialize it to the specified type.
    fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        match self.get_raw(key)? {
            Some(value) => deserialize(key, value).map(Some),
            None => Ok(None),
        }
    }
}

impl<T: ConfigProvider> ConfigProviderExt for T {}

fn deserialize<T: DeserializeOwned>(key: &str, value: Value) -> Result<T, ConfigError> {
    serde_json::from_value(value)
        .map_err(|e| ConfigError::ParseError(format!("failed to deserialize '{key}': {e}")))
}

/// Builder for the configuration system.
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    providers: Vec<Arc<dyn ConfigProvider>>,
}

impl ConfigBuilder {
    /// Create a new configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a configuration provider.
    pub fn with_provider<P: ConfigProvider + 'static>(mut self, provider: P) -> Self {
        self.providers.push(Arc::new(provider));
        self
    }

    /// Add an already shared configuration provider.
    pub fn with_shared_provider(mut self, provider: Arc<dyn ConfigProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Config {
        Config {
            providers: self.providers,
        }
    }
}

/// Holds all providers and resolves keys across them.
#[derive(Debug, Clone)]
pub struct Config {
    providers: Vec<Arc<dyn ConfigProvider>>,
}

impl Config {
    /// Create a new configuration builder.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Get a raw configuration value. Later providers win.
    pub fn get_raw(&self, key: &str) -> Result<Option<Value>, ConfigError> {
        for provider in self.providers.iter().rev() {
            if provider.has(key) {
                return provider.get_raw(key);
            }
        }
        Ok(None)
    }

    /// Get a configuration value by key.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        match self.get_raw(key)? {
            Some(value) => deserialize(key, value).map(Some),
            None => Ok(None),
        }
    }

    /// Get a configuration value by key with a default fallback value.
    pub fn get_or_default<T: DeserializeOwned>(
        &self,
        key: &str,
        default: T,
    ) -> Result<T, ConfigError> {
        Ok(self.get(key)?.unwrap_or(default))
    }

    /// Names of the providers, lowest priority first.
    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.provider_name()).collect()
    }

    /// Create a default configuration using the file-based provider.
    pub fn default_file(file_path: &str) -> Result<Self, ConfigError> {
        let provider = FileConfigProvider::new(file_path)?;
        Ok(Self::builder().with_provider(provider).build())
    }

    /// Decode the plugin configuration from the `filter` key.
    ///
    /// The section is re-serialized to bytes so file, env and wire payloads
    /// all go through [`PluginConfiguration::from_bytes`]. A missing section
    /// is the same as an empty payload.
    pub fn plugin_configuration(&self) -> Result<PluginConfiguration, ConfigError> {
        let payload = self.plugin_payload()?;
        PluginConfiguration::from_bytes(&payload)
    }

    /// The raw plugin configuration payload, empty when not configured.
    pub fn plugin_payload(&self) -> Result<Vec<u8>, ConfigError> {
        match self.get_raw("filter")? {
            Some(value) => serde_json::to_vec(&value)
                .map_err(|e| ConfigError::ParseError(format!("failed to encode 'filter': {e}"))),
            None => Ok(Vec::new()),
        }
    }
}

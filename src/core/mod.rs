// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Core primitives – the contract between a host and a filter.
//!
//! A host (the bundled proxy, the in-memory emulator, or your own data
//! plane) owns the request and response and exposes them through
//! [`HttpHost`]. A filter is a [`RootContext`] created once per process that
//! hands out one [`HttpContext`] per exchange. The host then calls the
//! exchange's hooks strictly in order:
//!
//! ```text
//! request headers → request body* → response headers → response body* → done
//! ```
//!
//! Every hook has a pass-through default, so a filter only implements the
//! stages it cares about.


use bytes::Bytes;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors raised by the bundled proxy host.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// HTTP client error
    #[error("HTTP client error: {0}")]
    ClientError(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Timeout error
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<ConfigError> for ProxyError {
    fn from(err: ConfigError) -> Self {
        ProxyError::ConfigError(err.to_string())
    }
}

/// Errors a host reports back to a filter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    /// The requested header or buffer does not exist.
    #[error("not found")]
    NotFound,

    /// The call was made with arguments the host cannot honour.
    #[error("bad argument: {0}")]
    BadArgument(String),

    /// The host could not service the call right now.
    #[error("unavailable: {0}")]
    Unavailable(String),
}

/// What a hook asks the host to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Forward whatever the host is holding and keep going.
    Continue,
    /// Keep the data buffered; the hook will be called again with more.
    Pause,
}

/// Host-side access to the exchange a filter is running in.
///
/// Header names are lowercase; HTTP/2 style pseudo-headers (`:scheme`,
/// `:authority`, `:path`, `:method`, `:status`) are always available.
pub trait HttpHost {
    /// Read a request header. `Ok(None)` means the header is absent.
    fn request_header(&self, name: &str) -> Result<Option<String>, HostError>;

    /// Read a response header. `Ok(None)` means the header is absent.
    fn response_header(&self, name: &str) -> Result<Option<String>, HostError>;

    /// Remove a response header. Removing an absent header is not an error.
    fn remove_response_header(&mut self, name: &str) -> Result<(), HostError>;

    /// Set a response header, replacing any existing values.
    fn replace_response_header(&mut self, name: &str, value: &str) -> Result<(), HostError>;

    /// Read `size` bytes of the buffered response body starting at `start`.
    fn response_body(&self, start: usize, size: usize) -> Result<Bytes, HostError>;

    /// Replace the whole buffered response body.
    fn replace_response_body(&mut self, body: &[u8]) -> Result<(), HostError>;
}

/// Per-exchange lifecycle hooks.
///
/// `num_headers` is the number of headers the host holds for that stage and
/// `body_size` the size of the chunk just delivered.
#[allow(unused_variables)]
pub trait HttpContext: fmt::Debug + Send {
    /// Request headers are available.
    fn on_request_headers(
        &mut self,
        host: &mut dyn HttpHost,
        num_headers: usize,
        end_of_stream: bool,
    ) -> Action {
        Action::Continue
    }

    /// A request body chunk is available.
    fn on_request_body(
        &mut self,
        host: &mut dyn HttpHost,
        body_size: usize,
        end_of_stream: bool,
    ) -> Action {
        Action::Continue
    }

    /// Request trailers are available.
    fn on_request_trailers(&mut self, host: &mut dyn HttpHost, num_trailers: usize) -> Action {
        Action::Continue
    }

    /// Response headers are available.
    fn on_response_headers(
        &mut self,
        host: &mut dyn HttpHost,
        num_headers: usize,
        end_of_stream: bool,
    ) -> Action {
        Action::Continue
    }

    /// A response body chunk is available.
    fn on_response_body(
        &mut self,
        host: &mut dyn HttpHost,
        body_size: usize,
        end_of_stream: bool,
    ) -> Action {
        Action::Continue
    }

    /// Response trailers are available.
    fn on_response_trailers(&mut self, host: &mut dyn HttpHost, num_trailers: usize) -> Action {
        Action::Continue
    }

    /// The exchange is complete; the context is dropped right after.
    fn on_done(&mut self) {}
}

/// Process-wide side of a filter.
pub trait RootContext: fmt::Debug + Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Called once at startup with the raw configuration payload, which is
    /// empty when nothing was configured. An error aborts startup.
    fn on_plugin_start(&mut self, configuration: &[u8]) -> Result<(), ConfigError>;

    /// Create the context for a new exchange.
    fn create_http_context(&self, context_id: u32) -> Box<dyn HttpContext>;
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Errata - RFC 9457 problem details for service mesh error responses
//!
//! Errata is an HTTP response filter. It watches responses flowing back from
//! an upstream and, for requests whose URL matches a configured target and
//! whose status code falls in a configured error range, replaces the body
//! with an `application/problem+json` document:
//!
//! ```json
//! {
//!   "type": "https://datatracker.ietf.org/html/rfc9110#section-15.6.4",
//!   "title": "service mesh returned an error",
//!   "status": 503,
//!   "instance": "/api/orders",
//!   "trace_id": "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
//!   "detail": "no healthy upstream"
//! }
//! ```
//!
//! # Pieces
//!
//! - **Filter**: [`ProblemDetailsFilter`] and its per-exchange
//!   [`ExchangeContext`] implement the host callback traits in [`core`]
//!   ([`RootContext`], [`HttpContext`], [`HttpHost`]). They never touch the
//!   network themselves.
//! - **Hosts**: [`HostEmulator`] drives a filter in memory, which is what
//!   the unit tests use. [`ProxyCore`] is a real host: it forwards requests
//!   to an upstream with reqwest and pumps the response through the filter.
//! - **Server**: [`ProxyServer`] serves a [`ProxyCore`] over hyper with
//!   graceful shutdown and a separate health port.
//! - **Configuration**: layered providers (file, env, custom) where later
//!   providers win. The `filter` key holds the plugin configuration.
//!
//! # Running
//!
//! ```rust,no_run
//! # async fn run() -> Result<(), errata::LoaderError> {
//! let errata = errata::Errata::loader()
//!     .with_config_file("/etc/errata/config.toml")
//!     .with_env_vars()
//!     .build()?;
//! errata.start().await
//! # }
//! ```
//!
//! # Driving the filter directly
//!
//! ```rust
//! use errata::{HostEmulator, ProblemDetailsFilter};
//!
//! let mut host = HostEmulator::new(ProblemDetailsFilter::default());
//! host.start_plugin(br#"{"targetURLPrefixes": ["/api/"]}"#).unwrap();
//!
//! let id = host.initialize_http_context();
//! host.call_on_request_headers(id, &[(":scheme", "http"), (":authority", "svc"), (":path", "/api/orders")], false);
//! host.call_on_response_headers(id, &[(":status", "404"), ("content-type", "text/plain")], false);
//! host.call_on_response_body(id, b"not found", true);
//!
//! let body: serde_json::Value = serde_json::from_slice(&host.current_response_body(id)).unwrap();
//! assert_eq!(body["status"], 404);
//! assert_eq!(body["instance"], "/api/orders");
//! ```

// Module declarations
pub mod config;
pub mod core;
pub mod filter;
pub mod host;
pub mod loader;
pub mod logging;
pub mod problem;
pub mod proxy;
pub mod server;

// Re-export key types at the crate root for convenience
pub use config::{ConfigError, ConfigProvider, ConfigProviderExt, PluginConfiguration};
pub use core::{Action, HostError, HttpContext, HttpHost, ProxyError, RootContext};
pub use filter::matcher::matches_target;
pub use filter::{BodyState, ExchangeContext, ProblemDetailsFilter};
pub use host::emulator::HostEmulator;
pub use loader::{Errata, ErrataLoader, LoaderError};
pub use logging::init as init_logging;
pub use problem::{ProblemResponse, resolve_problem_type};
pub use proxy::ProxyCore;
pub use server::{ProxyServer, ServerConfig};

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The problem-details filter.
//!
//! [`ProblemDetailsFilter`] is the process-wide side: it validates the
//! configuration once and hands a shared reference to every
//! [`ExchangeContext`] it creates. An exchange then runs three stages:
//!
//! 1. **request headers** – capture `scheme://authority/path` and resolve the
//!    trace id (`traceparent`, then `x-request-id`, then a fixed default);
//! 2. **response headers** – decide whether the response is in scope and, if
//!    so, drop `content-length` and set `content-type` to
//!    `application/problem+json`;
//! 3. **response body** – buffer every chunk until end of stream, then
//!    replace the body with a problem details document whose `detail` is the
//!    original body.
//!
//! Every host failure is logged and the exchange continues with whatever
//! the host already holds; a request is never failed because of this filter.

pub mod matcher;


use std::sync::Arc;
use thiserror::Error;

use crate::config::{ConfigError, PluginConfiguration};
use crate::core::{Action, HostError, HttpContext, HttpHost, RootContext};
use crate::problem::{PROBLEM_JSON_CONTENT_TYPE, ProblemResponse, defaults, resolve_problem_type};
use crate::{debug_fmt, error_fmt, info_fmt, warn_fmt};
use matcher::matches_target;

/// Name the filter registers and logs under.
pub const FILTER_NAME: &str = "problem_details";

const LOG_CONTEXT: &str = "ProblemDetails";

/// Header names the filter reads or writes.
pub mod headers {
    pub const SCHEME: &str = ":scheme";
    pub const AUTHORITY: &str = ":authority";
    pub const PATH: &str = ":path";
    pub const STATUS: &str = ":status";
    pub const TRACEPARENT: &str = "traceparent";
    pub const X_REQUEST_ID: &str = "x-request-id";
    pub const CONTENT_TYPE: &str = "content-type";
    pub const CONTENT_LENGTH: &str = "content-length";
}

/// Process-wide side of the filter.
#[derive(Debug, Default)]
pub struct ProblemDetailsFilter {
    configuration: Arc<PluginConfiguration>,
}

impl ProblemDetailsFilter {
    /// Create a filter around an already validated configuration.
    pub fn new(configuration: PluginConfiguration) -> Self {
        Self {
            configuration: Arc::new(configuration),
        }
    }

    /// The configuration shared with every exchange.
    pub fn configuration(&self) -> &Arc<PluginConfiguration> {
        &self.configuration
    }
}

impl RootContext for ProblemDetailsFilter {
    fn name(&self) -> &str {
        FILTER_NAME
    }

    fn on_plugin_start(&mut self, configuration: &[u8]) -> Result<(), ConfigError> {
        let parsed = PluginConfiguration::from_bytes(configuration).map_err(|e| {
            error_fmt!(LOG_CONTEXT, "error parsing plugin configuration: {}", e);
            e
        })?;

        if parsed.target_url_prefixes().is_empty() {
            warn_fmt!(
                LOG_CONTEXT,
                "No targetURLPrefixes configured; responses will pass through untouched"
            );
        }
        info_fmt!(
            LOG_CONTEXT,
            "Plugin started: targets={:?} status={}-{}",
            parsed.target_url_prefixes(),
            parsed.start_status_code(),
            parsed.end_status_code()
        );

        self.configuration = Arc::new(parsed);
        Ok(())
    }

    fn create_http_context(&self, context_id: u32) -> Box<dyn HttpContext> {
        Box::new(ExchangeContext::new(context_id, self.configuration.clone()))
    }
}

/// Where an exchange is in the response body stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyState {
    /// Not intervening; every chunk passes straight through.
    Idle,
    /// Intervening; chunks are held until end of stream.
    Accumulating,
    /// End of stream seen; the replacement body is being built.
    Rewriting,
    /// The one rewrite attempt has been made.
    Done,
}

/// Why a body rewrite was abandoned.
#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("failed to get response body: {0}")]
    ReadBody(#[source] HostError),

    #[error("failed to marshal problem response to JSON: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to replace response body: {0}")]
    ReplaceBody(#[source] HostError),
}

/// State of one request/response exchange.
#[derive(Debug)]
pub struct ExchangeContext {
    context_id: u32,
    configuration: Arc<PluginConfiguration>,
    request_url: String,
    request_path: String,
    trace_id: String,
    status_code: u16,
    body_state: BodyState,
    total_response_body_size: usize,
}

impl ExchangeContext {
    /// Create the context for a new exchange.
    pub fn new(context_id: u32, configuration: Arc<PluginConfiguration>) -> Self {
        Self {
            context_id,
            configuration,
            request_url: String::new(),
            request_path: String::new(),
            trace_id: String::new(),
            status_code: 0,
            body_state: BodyState::Idle,
            total_response_body_size: 0,
        }
    }

    pub fn context_id(&self) -> u32 {
        self.context_id
    }

    /// `scheme://authority/path` captured from the request.
    pub fn request_url(&self) -> &str {
        &self.request_url
    }

    pub fn request_path(&self) -> &str {
        &self.request_path
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Parsed response status, 0 when it could not be read.
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    /// True once the response gate decided to rewrite this response.
    pub fn modify_response(&self) -> bool {
        self.body_state != BodyState::Idle
    }

    pub fn body_state(&self) -> BodyState {
        self.body_state
    }

    /// Bytes seen by the body stage so far.
    pub fn total_response_body_size(&self) -> usize {
        self.total_response_body_size
    }

    /// Read a request header, substituting an empty string on failure.
    fn request_header_or_empty(&self, host: &dyn HttpHost, name: &str) -> String {
        match host.request_header(name) {
            Ok(value) => value.unwrap_or_default(),
            Err(e) => {
                error_fmt!(
                    LOG_CONTEXT,
                    "[{}] failed to get request header {}: {}",
                    self.context_id,
                    name,
                    e
                );
                String::new()
            }
        }
    }

    /// Read a response header, substituting an empty string on failure.
    fn response_header_or_empty(&self, host: &dyn HttpHost, name: &str) -> String {
        match host.response_header(name) {
            Ok(value) => value.unwrap_or_default(),
            Err(e) => {
                error_fmt!(
                    LOG_CONTEXT,
                    "[{}] failed to get response header {}: {}",
                    self.context_id,
                    name,
                    e
                );
                String::new()
            }
        }
    }

    /// First non-empty of `traceparent` and `x-request-id`, else the default.
    fn resolve_trace_id(&self, host: &dyn HttpHost) -> String {
        for name in [headers::TRACEPARENT, headers::X_REQUEST_ID] {
            match host.request_header(name) {
                Ok(Some(value)) if !value.is_empty() => return value,
                Ok(_) => debug_fmt!(
                    LOG_CONTEXT,
                    "[{}] request header {} not present",
                    self.context_id,
                    name
                ),
                Err(e) => info_fmt!(
                    LOG_CONTEXT,
                    "[{}] failed to get request header {}: {}",
                    self.context_id,
                    name,
                    e
                ),
            }
        }
        defaults().trace_id.to_string()
    }

    /// Whether the response is in scope for rewriting.
    fn is_eligible(&self) -> bool {
        self.configuration.status_range().contains(&self.status_code)
            && matches_target(&self.request_url, self.configuration.target_url_prefixes())
    }

    /// Replace the buffered body with its problem details rendering.
    fn rewrite_body(&self, host: &mut dyn HttpHost) -> Result<usize, RewriteError> {
        let original = host
            .response_body(0, self.total_response_body_size)
            .map_err(RewriteError::ReadBody)?;

        let problem = ProblemResponse {
            type_uri: resolve_problem_type(
                &self.status_code.to_string(),
                self.configuration.problem_type_uri_map(),
            ),
            title: self.configuration.problem_title().to_string(),
            status: self.status_code,
            instance: self.request_path.clone(),
            trace_id: self.trace_id.clone(),
            detail: String::from_utf8_lossy(&original).into_owned(),
        };
        let body = problem.to_json()?;

        host.replace_response_body(&body)
            .map_err(RewriteError::ReplaceBody)?;
        Ok(body.len())
    }
}

impl HttpContext for ExchangeContext {
    fn on_request_headers(
        &mut self,
        host: &mut dyn HttpHost,
        _num_headers: usize,
        _end_of_stream: bool,
    ) -> Action {
        let scheme = self.request_header_or_empty(host, headers::SCHEME);
        let authority = self.request_header_or_empty(host, headers::AUTHORITY);
        let path = self.request_header_or_empty(host, headers::PATH);

        self.trace_id = self.resolve_trace_id(host);
        self.request_url = format!("{scheme}://{authority}{path}");
        self.request_path = path;

        debug_fmt!(
            LOG_CONTEXT,
            "[{}] request url: {}, trace id: {}",
            self.context_id,
            self.request_url,
            self.trace_id
        );
        Action::Continue
    }

    fn on_response_headers(
        &mut self,
        host: &mut dyn HttpHost,
        _num_headers: usize,
        _end_of_stream: bool,
    ) -> Action {
        let status = self.response_header_or_empty(host, headers::STATUS);
        self.status_code = status.parse().unwrap_or_else(|e| {
            error_fmt!(
                LOG_CONTEXT,
                "[{}] failed to convert status code {:?} to an integer: {}",
                self.context_id,
                status,
                e
            );
            0
        });

        let content_type = self.response_header_or_empty(host, headers::CONTENT_TYPE);

        if self.body_state != BodyState::Idle || !self.is_eligible() {
            return Action::Continue;
        }

        if content_type == PROBLEM_JSON_CONTENT_TYPE {
            debug_fmt!(
                LOG_CONTEXT,
                "[{}] response is already {}; leaving it alone",
                self.context_id,
                PROBLEM_JSON_CONTENT_TYPE
            );
            return Action::Continue;
        }

        // The stored length describes the body we are about to replace
        if let Err(e) = host.remove_response_header(headers::CONTENT_LENGTH) {
            error_fmt!(
                LOG_CONTEXT,
                "[{}] failed to remove content length: {}",
                self.context_id,
                e
            );
        }

        if let Err(e) = host.replace_response_header(headers::CONTENT_TYPE, PROBLEM_JSON_CONTENT_TYPE) {
            error_fmt!(
                LOG_CONTEXT,
                "[{}] failed to set content type to {}: {}",
                self.context_id,
                PROBLEM_JSON_CONTENT_TYPE,
                e
            );
            return Action::Continue;
        }

        self.body_state = BodyState::Accumulating;
        info_fmt!(
            LOG_CONTEXT,
            "[{}] Response eligible for modification to rfc9457 format",
            self.context_id
        );
        Action::Continue
    }

    fn on_response_body(
        &mut self,
        host: &mut dyn HttpHost,
        body_size: usize,
        end_of_stream: bool,
    ) -> Action {
        if self.body_state != BodyState::Accumulating {
            return Action::Continue;
        }

        self.total_response_body_size += body_size;
        if !end_of_stream {
            return Action::Pause;
        }

        self.body_state = BodyState::Rewriting;
        match self.rewrite_body(host) {
            Ok(size) => info_fmt!(
                LOG_CONTEXT,
                "[{}] Successfully transformed the response to rfc9457 format ({} bytes)",
                self.context_id,
                size
            ),
            Err(e) => error_fmt!(LOG_CONTEXT, "[{}] {}", self.context_id, e),
        }
        self.body_state = BodyState::Done;
        Action::Continue
    }

    fn on_done(&mut self) {
        debug_fmt!(
            LOG_CONTEXT,
            "[{}] exchange complete: status={} rewritten={}",
            self.context_id,
            self.status_code,
            self.body_state == BodyState::Done
        );
    }
}

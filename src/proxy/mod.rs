// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The bundled proxy host.
//!
//! [`ProxyCore`] forwards every request to a single upstream base URL and runs
//! the exchange hooks of the configured filter around it:
//!
//! 1. request headers (with `:method`, `:scheme`, `:authority` and `:path`
//!    pseudo-headers) go to `on_request_headers` before the request is sent;
//! 2. response headers (with `:status`) go to `on_response_headers` before the
//!    first body byte is written downstream;
//! 3. the upstream body is streamed through `on_response_body` by
//!    [`body::BodyPump`].
//!
//! When the upstream cannot be reached or does not answer in time the proxy
//! produces a local `502`/`504` reply and runs it through the same hooks, so
//! those errors are rewritten like any upstream error.

mod body;

#[cfg(test)]
mod tests;

use bytes::Bytes;
use futures_util::stream::{self, BoxStream};
use futures_util::{StreamExt, TryStreamExt};
use http_body_util::BodyExt;
use hyper::body::Body as HttpBody;
use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use hyper::{Request, Response, StatusCode};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use uuid::Uuid;

use crate::config::Config;
use crate::core::{Action, HttpContext, ProxyError, RootContext};
use crate::host::ExchangeHost;
use crate::{debug_fmt, error_fmt, warn_fmt};
use body::BodyPump;

/// Default for `server.body_limit`: 5 MiB.
pub const DEFAULT_BODY_LIMIT: usize = 5 * 1024 * 1024;

/// Default for `upstream.timeout`, in seconds.
pub const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 30;

const LOG_CONTEXT: &str = "Proxy";

/// Connection-scoped headers that are never forwarded.
const HOP_BY_HOP_HEADERS: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
}

/// Forwards requests upstream and drives the filter over each exchange.
#[derive(Debug)]
pub struct ProxyCore {
    client: reqwest::Client,
    upstream_url: String,
    timeout: Duration,
    body_limit: usize,
    generate_request_id: bool,
    root: Arc<dyn RootContext>,
    next_context_id: AtomicU32,
}

impl ProxyCore {
    /// Create the proxy from the host configuration and a started filter.
    pub fn new(config: &Config, root: Arc<dyn RootContext>) -> Result<Self, ProxyError> {
        let upstream_url: String = config
            .get("upstream.url")?
            .ok_or_else(|| ProxyError::ConfigError("upstream.url is required".to_string()))?;

        let parsed = reqwest::Url::parse(&upstream_url).map_err(|e| {
            ProxyError::ConfigError(format!("invalid upstream.url {upstream_url:?}: {e}"))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ProxyError::ConfigError(format!(
                "upstream.url must be http or https, got {:?}",
                parsed.scheme()
            )));
        }

        let timeout_secs: u64 =
            config.get_or_default("upstream.timeout", DEFAULT_UPSTREAM_TIMEOUT_SECS)?;
        let body_limit: usize = config.get_or_default("server.body_limit", DEFAULT_BODY_LIMIT)?;
        let generate_request_id: bool =
            config.get_or_default("proxy.generate_request_id", true)?;

        let timeout = Duration::from_secs(timeout_secs);
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(ProxyError::ClientError)?;

        Ok(Self {
            client,
            upstream_url: upstream_url.trim_end_matches('/').to_string(),
            timeout,
            body_limit,
            generate_request_id,
            root,
            next_context_id: AtomicU32::new(1),
        })
    }

    /// Base URL requests are forwarded to, without a trailing slash.
    pub fn upstream_url(&self) -> &str {
        &self.upstream_url
    }

    /// Upstream timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Max response bytes buffered per exchange before the filter is bypassed.
    pub fn body_limit(&self) -> usize {
        self.body_limit
    }

    /// Name of the filter this proxy runs.
    pub fn filter_name(&self) -> &str {
        self.root.name()
    }

    /// Process one request. Always produces a response.
    pub async fn process_request<B>(&self, request: Request<B>, client_ip: &str) -> Response<reqwest::Body>
    where
        B: HttpBody<Data = Bytes> + Send + 'static,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let started = Instant::now();
        let context_id = self.next_context_id.fetch_add(1, Ordering::Relaxed);
        let mut context = self.root.create_http_context(context_id);
        let mut host = ExchangeHost::new();

        let (mut parts, body) = request.into_parts();
        let method = parts.method.clone();
        let path = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());
        let authority = parts
            .uri
            .authority()
            .map(|a| a.to_string())
            .or_else(|| header_string(&parts.headers, "host"))
            .unwrap_or_default();
        let scheme = parts.uri.scheme_str().unwrap_or("http").to_string();

        strip_hop_by_hop(&mut parts.headers);
        parts.headers.remove("host");
        self.ensure_request_id(&mut parts.headers);
        if let Ok(ip) = HeaderValue::from_str(client_ip) {
            parts.headers.append("x-forwarded-for", ip);
        }

        let mut request_headers = vec![
            (":method".to_string(), method.as_str().to_string()),
            (":scheme".to_string(), scheme),
            (":authority".to_string(), authority),
            (":path".to_string(), path.clone()),
        ];
        request_headers.extend(header_pairs(&parts.headers));
        let num_headers = request_headers.len();
        host.set_request_headers(request_headers);

        if context.on_request_headers(&mut host, num_headers, body.is_end_stream()) == Action::Pause {
            debug_fmt!(
                LOG_CONTEXT,
                "[{}] filter paused request headers; the proxy does not hold requests",
                context_id
            );
        }

        let url = format!("{}{}", self.upstream_url, path);
        let outbound = self
            .client
            .request(method.clone(), &url)
            .headers(parts.headers)
            .body(reqwest::Body::wrap_stream(body.into_data_stream()));

        let upstream_started = Instant::now();
        let result = match timeout(self.timeout, outbound.send()).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) if e.is_timeout() => Err(ProxyError::Timeout(self.timeout)),
            Ok(Err(e)) => Err(ProxyError::ClientError(e)),
            Err(_) => Err(ProxyError::Timeout(self.timeout)),
        };
        let upstream_elapsed = upstream_started.elapsed();

        let (status, headers, upstream_body) = match result {
            Ok(response) => {
                let status = response.status();
                let headers = response.headers().clone();
                let stream = response.bytes_stream().map_err(io::Error::other).boxed();
                (status, headers, stream)
            }
            Err(e) => local_reply(context_id, &method, &path, &e),
        };

        let response = self.respond(context_id, context, host, status, &headers, upstream_body);

        debug_fmt!(
            LOG_CONTEXT,
            "[timing] {} {} -> {} | total={:?} upstream={:?}",
            method,
            path,
            response.status(),
            started.elapsed(),
            upstream_elapsed
        );
        response
    }

    /// Run the response header stage and wire the body through the pump.
    fn respond(
        &self,
        context_id: u32,
        mut context: Box<dyn HttpContext>,
        mut host: ExchangeHost,
        status: StatusCode,
        headers: &HeaderMap,
        upstream_body: BoxStream<'static, io::Result<Bytes>>,
    ) -> Response<reqwest::Body> {
        let mut response_headers = vec![(":status".to_string(), status.as_str().to_string())];
        response_headers.extend(
            header_pairs(headers).filter(|(name, _)| !is_hop_by_hop(name)),
        );
        let num_headers = response_headers.len();
        host.set_response_headers(response_headers);

        if context.on_response_headers(&mut host, num_headers, false) == Action::Pause {
            debug_fmt!(
                LOG_CONTEXT,
                "[{}] filter paused response headers; sending them with the body",
                context_id
            );
        }

        let (status, headers) = downstream_head(context_id, &host, status);
        let pump = BodyPump::new(context_id, host, context, upstream_body, self.body_limit);

        let mut response = Response::new(reqwest::Body::wrap_stream(pump.into_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }

    /// Give requests without any correlation header a fresh `x-request-id`.
    fn ensure_request_id(&self, headers: &mut HeaderMap) {
        if !self.generate_request_id {
            return;
        }
        let present = |name: &str| headers.get(name).is_some_and(|v| !v.is_empty());
        if present("traceparent") || present("x-request-id") {
            return;
        }
        if let Ok(value) = HeaderValue::from_str(&Uuid::new_v4().to_string()) {
            headers.insert("x-request-id", value);
        }
    }
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
}

fn header_pairs(headers: &HeaderMap) -> impl Iterator<Item = (String, String)> + '_ {
    headers.iter().map(|(name, value)| {
        (
            name.as_str().to_string(),
            String::from_utf8_lossy(value.as_bytes()).into_owned(),
        )
    })
}

/// Status and headers as they go to the client, after the filter ran.
fn downstream_head(context_id: u32, host: &ExchangeHost, fallback: StatusCode) -> (StatusCode, HeaderMap) {
    let mut status = fallback;
    let mut headers = HeaderMap::new();

    for (name, value) in host.response_headers() {
        if name == ":status" {
            match value.parse::<u16>().ok().and_then(|c| StatusCode::from_u16(c).ok()) {
                Some(code) => status = code,
                None => warn_fmt!(LOG_CONTEXT, "[{}] ignoring invalid :status {:?}", context_id, value),
            }
            continue;
        }
        if name.starts_with(':') {
            continue;
        }
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => warn_fmt!(
                LOG_CONTEXT,
                "[{}] dropping invalid response header {:?}",
                context_id,
                name
            ),
        }
    }

    (status, headers)
}

/// The reply the proxy sends on behalf of an upstream it could not use.
fn local_reply(
    context_id: u32,
    method: &hyper::Method,
    path: &str,
    error: &ProxyError,
) -> (StatusCode, HeaderMap, BoxStream<'static, io::Result<Bytes>>) {
    let (status, message) = match error {
        ProxyError::Timeout(d) => {
            warn_fmt!(
                LOG_CONTEXT,
                "[{}] {} {} timed out after {:?}",
                context_id,
                method,
                path,
                d
            );
            (StatusCode::GATEWAY_TIMEOUT, "upstream request timeout")
        }
        ProxyError::ClientError(e) => {
            error_fmt!(
                LOG_CONTEXT,
                "[{}] {} {} upstream error: {}",
                context_id,
                method,
                path,
                e
            );
            (
                StatusCode::BAD_GATEWAY,
                "upstream connect error or disconnect/reset before headers",
            )
        }
        other => {
            error_fmt!(
                LOG_CONTEXT,
                "[{}] {} {} failed: {}",
                context_id,
                method,
                path,
                other
            );
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    };

    let mut headers = HeaderMap::new();
    headers.insert(
        hyper::header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain"),
    );
    headers.insert(hyper::header::CONTENT_LENGTH, HeaderValue::from(message.len()));

    let body = stream::iter([Ok(Bytes::from_static(message.as_bytes()))]).boxed();
    (status, headers, body)
}

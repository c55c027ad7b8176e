// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host-side exchange state.
//!
//! [`ExchangeHost`] is the in-memory [`HttpHost`] both the bundled proxy and
//! the [`emulator::HostEmulator`] hand to filters. It holds the header lists
//! of one exchange and the response bytes that have been delivered but not
//! yet forwarded downstream.

pub mod emulator;


use bytes::{Bytes, BytesMut};
use std::collections::HashSet;

use crate::core::{HostError, HttpHost};

/// A host call that can be made to fail, to exercise fail-open paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HostCall {
    /// Reading the named request header.
    RequestHeader(String),
    /// Reading the named response header.
    ResponseHeader(String),
    /// Removing the named response header.
    RemoveResponseHeader(String),
    /// Replacing the named response header.
    ReplaceResponseHeader(String),
    /// Reading the buffered response body.
    ResponseBody,
    /// Replacing the buffered response body.
    ReplaceResponseBody,
}

/// Header lists and buffered response body of a single exchange.
#[derive(Debug, Default)]
pub struct ExchangeHost {
    request_headers: Vec<(String, String)>,
    response_headers: Vec<(String, String)>,
    response_body: BytesMut,
    faults: HashSet<HostCall>,
}

impl ExchangeHost {
    /// Create an empty exchange.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the request headers. Names are stored lowercase.
    pub fn set_request_headers<I, K, V>(&mut self, headers: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        self.request_headers = normalise(headers);
    }

    /// Set the response headers. Names are stored lowercase.
    pub fn set_response_headers<I, K, V>(&mut self, headers: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        self.response_headers = normalise(headers);
    }

    /// Current request headers.
    pub fn request_headers(&self) -> &[(String, String)] {
        &self.request_headers
    }

    /// Current response headers, including any filter modifications.
    pub fn response_headers(&self) -> &[(String, String)] {
        &self.response_headers
    }

    /// Append a delivered chunk to the buffered response body.
    pub fn push_response_body(&mut self, chunk: &[u8]) {
        self.response_body.extend_from_slice(chunk);
    }

    /// Bytes buffered and not yet forwarded.
    pub fn buffered_response_body(&self) -> &[u8] {
        &self.response_body
    }

    /// Take everything buffered so it can be forwarded downstream.
    pub fn take_response_body(&mut self) -> Bytes {
        self.response_body.split().freeze()
    }

    /// Make every subsequent `call` fail with [`HostError::Unavailable`].
    pub fn inject_fault(&mut self, call: HostCall) {
        self.faults.insert(call);
    }

    /// Remove all injected faults.
    pub fn clear_faults(&mut self) {
        self.faults.clear();
    }

    fn check(&self, call: HostCall) -> Result<(), HostError> {
        if self.faults.contains(&call) {
            return Err(HostError::Unavailable(format!("injected fault for {call:?}")));
        }
        Ok(())
    }
}

fn normalise<I, K, V>(headers: I) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Into<String>,
{
    headers
        .into_iter()
        .map(|(name, value)| (name.as_ref().to_ascii_lowercase(), value.into()))
        .collect()
}

fn find(headers: &[(String, String)], name: &str) -> Option<String> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.clone())
}

impl HttpHost for ExchangeHost {
    fn request_header(&self, name: &str) -> Result<Option<String>, HostError> {
        if !self.faults.is_empty() {
            self.check(HostCall::RequestHeader(name.to_string()))?;
        }
        Ok(find(&self.request_headers, name))
    }

    fn response_header(&self, name: &str) -> Result<Option<String>, HostError> {
        if !self.faults.is_empty() {
            self.check(HostCall::ResponseHeader(name.to_string()))?;
        }
        Ok(find(&self.response_headers, name))
    }

    fn remove_response_header(&mut self, name: &str) -> Result<(), HostError> {
        if !self.faults.is_empty() {
            self.check(HostCall::RemoveResponseHeader(name.to_string()))?;
        }
        self.response_headers
            .retain(|(key, _)| !key.eq_ignore_ascii_case(name));
        Ok(())
    }

    fn replace_response_header(&mut self, name: &str, value: &str) -> Result<(), HostError> {
        if !self.faults.is_empty() {
            self.check(HostCall::ReplaceResponseHeader(name.to_string()))?;
        }
        if name.is_empty() {
            return Err(HostError::BadArgument("empty header name".to_string()));
        }
        self.response_headers
            .retain(|(key, _)| !key.eq_ignore_ascii_case(name));
        self.response_headers
            .push((name.to_ascii_lowercase(), value.to_string()));
        Ok(())
    }

    fn response_body(&self, start: usize, size: usize) -> Result<Bytes, HostError> {
        self.check(HostCall::ResponseBody)?;
        let end = start
            .checked_add(size)
            .filter(|end| *end <= self.response_body.len())
            .ok_or_else(|| {
                HostError::BadArgument(format!(
                    "range {start}+{size} exceeds buffered body of {} bytes",
                    self.response_body.len()
                ))
            })?;
        Ok(Bytes::copy_from_slice(&self.response_body[start..end]))
    }

    fn replace_response_body(&mut self, body: &[u8]) -> Result<(), HostError> {
        self.check(HostCall::ReplaceResponseBody)?;
        self.response_body.clear();
        self.response_body.extend_from_slice(body);
        Ok(())
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! RFC 9457 problem details – the output contract and its built-in defaults.
//!
//! The defaults live in a single read-only table that is initialised on
//! first use and shared by the whole process; nothing here is ever mutated.

#[cfg(test)]
mod tests;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Media type of a problem details document.
pub const PROBLEM_JSON_CONTENT_TYPE: &str = "application/problem+json";

/// Process-wide defaults applied when configuration or request data is missing.
#[derive(Debug)]
pub struct ProblemDefaults {
    /// Title used when the configuration does not provide one.
    pub title: &'static str,
    /// Trace id used when neither `traceparent` nor `x-request-id` is present.
    pub trace_id: &'static str,
    /// Type URI for 4xx codes that have no entry in the type table.
    pub client_error_type_uri: &'static str,
    /// Type URI for 5xx codes that have no entry in the type table.
    pub server_error_type_uri: &'static str,
    /// Status code to type URI table used when none is configured.
    pub type_uri_map: HashMap<String, String>,
}

static DEFAULTS: Lazy<ProblemDefaults> = Lazy::new(|| {
    let type_uri_map = [
        ("400", "https://datatracker.ietf.org/html/rfc9110#section-15.5.1"),
        ("401", "https://datatracker.ietf.org/html/rfc9110#section-15.5.2"),
        ("403", "https://datatracker.ietf.org/html/rfc9110#section-15.5.4"),
        ("404", "https://datatracker.ietf.org/html/rfc9110#section-15.5.5"),
        ("405", "https://datatracker.ietf.org/html/rfc9110#section-15.5.6"),
        ("406", "https://datatracker.ietf.org/html/rfc9110#section-15.5.7"),
        ("408", "https://datatracker.ietf.org/html/rfc9110#section-15.5.9"),
        ("409", "https://datatracker.ietf.org/html/rfc9110#section-15.5.10"),
        ("412", "https://datatracker.ietf.org/html/rfc9110#section-15.5.13"),
        ("415", "https://datatracker.ietf.org/html/rfc9110#section-15.5.16"),
        ("422", "https://datatracker.ietf.org/html/rfc4918#section-11.2"),
        ("426", "https://datatracker.ietf.org/html/rfc9110#section-15.5.22"),
        ("500", "https://datatracker.ietf.org/html/rfc9110#section-15.6.1"),
        ("502", "https://datatracker.ietf.org/html/rfc9110#section-15.6.3"),
        ("503", "https://datatracker.ietf.org/html/rfc9110#section-15.6.4"),
        ("504", "https://datatracker.ietf.org/html/rfc9110#section-15.6.5"),
    ]
    .into_iter()
    .map(|(code, uri)| (code.to_string(), uri.to_string()))
    .collect();

    ProblemDefaults {
        title: "service mesh returned an error",
        trace_id: "00-0aa0000000aa00aa0000aa000a00000a-a0aa0a0000000000-00",
        client_error_type_uri: "https://datatracker.ietf.org/doc/html/rfc9110#name-client-error-4xx",
        server_error_type_uri: "https://datatracker.ietf.org/doc/html/rfc9110#name-server-error-5xx",
        type_uri_map,
    }
});

/// The built-in defaults.
pub fn defaults() -> &'static ProblemDefaults {
    &DEFAULTS
}

/// The problem details document written in place of an error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemResponse {
    /// URI identifying the problem type, possibly empty.
    #[serde(rename = "type")]
    pub type_uri: String,
    /// Short human readable summary.
    pub title: String,
    /// The HTTP status code of the response.
    pub status: u16,
    /// The request path.
    pub instance: String,
    /// Correlation id taken from the request.
    pub trace_id: String,
    /// The original response body, verbatim.
    pub detail: String,
}

impl ProblemResponse {
    /// Serialize to the wire form.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Resolve the problem type URI for a status code.
///
/// A non-empty entry in `type_uri_map` wins; otherwise 4xx and 5xx codes fall
/// back to their class URI and anything else resolves to an empty string.
pub fn resolve_problem_type(status_code: &str, type_uri_map: &HashMap<String, String>) -> String {
    if let Some(uri) = type_uri_map.get(status_code).filter(|uri| !uri.is_empty()) {
        return uri.clone();
    }

    match status_code.chars().next() {
        Some('4') => defaults().client_error_type_uri.to_string(),
        Some('5') => defaults().server_error_type_uri.to_string(),
        _ => String::new(),
    }
}

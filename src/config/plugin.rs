// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Plugin configuration – the settings the problem-details filter runs with.
//!
//! The payload is JSON with camelCase keys:
//!
//! ```json
//! {
//!   "targetURLPrefixes": ["my-host.com"],
//!   "startStatusCode": 400,
//!   "endStatusCode": 599,
//!   "problemTypeURIMap": { "404": "https://example.com/not-found" },
//!   "problemTitle": "service mesh returned an error"
//! }
//! ```
//!
//! A [`PluginConfiguration`] is built once at startup and never mutated;
//! every exchange holds it through an `Arc`.

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::ops::RangeInclusive;

use super::ConfigError;
use crate::problem::defaults;

/// Lowest status code the filter will ever consider.
pub const MIN_STATUS_CODE: i64 = 400;
/// Highest status code the filter will ever consider.
pub const MAX_STATUS_CODE: i64 = 599;

/// Wire shape of the payload. Everything is optional so that defaults and
/// clamping can be applied after decoding. The optional settings are kept as
/// raw JSON and coerced, so a value of the wrong type falls back to its
/// default instead of failing startup.
#[derive(Debug, Default, Deserialize)]
struct RawPluginConfiguration {
    #[serde(rename = "targetURLPrefixes", default)]
    target_url_prefixes: Option<Vec<String>>,
    #[serde(rename = "startStatusCode", default)]
    start_status_code: Option<Value>,
    #[serde(rename = "endStatusCode", default)]
    end_status_code: Option<Value>,
    #[serde(rename = "problemTypeURIMap", default)]
    problem_type_uri_map: Option<Value>,
    #[serde(rename = "problemTitle", default)]
    problem_title: Option<Value>,
}

/// Integer view of a setting: numbers truncate, numeric strings parse.
fn coerce_int(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f as i64))
        }
        _ => None,
    }
}

/// String view of a scalar setting.
fn coerce_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Status code to URI table; entries whose value is not a scalar are skipped.
fn coerce_map(value: Option<&Value>) -> Option<HashMap<String, String>> {
    match value? {
        Value::Object(entries) => Some(
            entries
                .iter()
                .filter_map(|(code, uri)| coerce_string(Some(uri)).map(|uri| (code.clone(), uri)))
                .collect(),
        ),
        _ => None,
    }
}

/// Validated, immutable filter configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginConfiguration {
    target_url_prefixes: Vec<String>,
    start_status_code: u16,
    end_status_code: u16,
    problem_type_uri_map: HashMap<String, String>,
    problem_title: String,
}

impl Default for PluginConfiguration {
    /// The configuration used when no payload is supplied: every default and
    /// no target prefixes, so nothing is ever rewritten.
    fn default() -> Self {
        Self {
            target_url_prefixes: Vec::new(),
            start_status_code: MIN_STATUS_CODE as u16,
            end_status_code: MAX_STATUS_CODE as u16,
            problem_type_uri_map: defaults().type_uri_map.clone(),
            problem_title: defaults().title.to_string(),
        }
    }
}

impl PluginConfiguration {
    /// Build the configuration from the raw payload handed over by the host.
    ///
    /// A zero-length payload means "not configured" and yields
    /// [`PluginConfiguration::default`]. Any other payload must be valid JSON
    /// carrying at least one target prefix.
    pub fn from_bytes(payload: &[u8]) -> Result<Self, ConfigError> {
        if payload.is_empty() {
            return Ok(Self::default());
        }

        let raw: RawPluginConfiguration = serde_json::from_slice(payload)
            .map_err(|e| ConfigError::malformed_payload(e, payload))?;

        let target_url_prefixes = match raw.target_url_prefixes {
            Some(prefixes) if !prefixes.is_empty() => prefixes,
            _ => return Err(ConfigError::missing_target_prefixes(payload)),
        };

        let start = match coerce_int(raw.start_status_code.as_ref()) {
            Some(code) if code >= MIN_STATUS_CODE => code,
            _ => MIN_STATUS_CODE,
        };
        let end = match coerce_int(raw.end_status_code.as_ref()) {
            Some(code) if (MIN_STATUS_CODE..=MAX_STATUS_CODE).contains(&code) => code,
            _ => MAX_STATUS_CODE,
        };
        if start > end {
            return Err(ConfigError::InvalidStatusRange { start, end });
        }

        let problem_type_uri_map = match coerce_map(raw.problem_type_uri_map.as_ref()) {
            Some(map) if !map.is_empty() => map,
            _ => defaults().type_uri_map.clone(),
        };

        let problem_title = match coerce_string(raw.problem_title.as_ref()) {
            Some(title) if !title.is_empty() => title,
            _ => defaults().title.to_string(),
        };

        // Both bounds are inside [400, 599] at this point.
        Ok(Self {
            target_url_prefixes,
            start_status_code: start as u16,
            end_status_code: end as u16,
            problem_type_uri_map,
            problem_title,
        })
    }

    /// Substrings selecting which request URLs are in scope.
    pub fn target_url_prefixes(&self) -> &[String] {
        &self.target_url_prefixes
    }

    /// First status code eligible for rewriting.
    pub fn start_status_code(&self) -> u16 {
        self.start_status_code
    }

    /// Last status code eligible for rewriting.
    pub fn end_status_code(&self) -> u16 {
        self.end_status_code
    }

    /// The inclusive eligible status range.
    pub fn status_range(&self) -> RangeInclusive<u16> {
        self.start_status_code..=self.end_status_code
    }

    /// Status code to problem type URI table.
    pub fn problem_type_uri_map(&self) -> &HashMap<String, String> {
        &self.problem_type_uri_map
    }

    /// Title written into every problem response.
    pub fn problem_title(&self) -> &str {
        &self.problem_title
    }
}

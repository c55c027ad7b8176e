// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory host for driving a filter without a network.
//!
//! The emulator plays the part of the data plane: it starts the plugin with
//! a configuration payload, opens exchanges, feeds them headers and body
//! chunks, and buffers paused body data the way a proxy would. Once a stage
//! continues, buffered bytes count as forwarded.
//!
//! ```rust
//! use errata::host::emulator::HostEmulator;
//! use errata::ProblemDetailsFilter;
//!
//! let mut host = HostEmulator::new(ProblemDetailsFilter::default());
//! host.start_plugin(br#"{"targetURLPrefixes": ["my-host.com"]}"#).unwrap();
//!
//! let id = host.initialize_http_context();
//! host.call_on_request_headers(id, &[(":scheme", "https"), (":authority", "my-host.com"), (":path", "/")], false);
//! host.call_on_response_headers(id, &[(":status", "503")], false);
//! host.call_on_response_body(id, b"no healthy upstream", true);
//! host.complete_http_context(id);
//!
//! let body: serde_json::Value = serde_json::from_slice(&host.current_response_body(id)).unwrap();
//! assert_eq!(body["status"], 503);
//! ```

use bytes::{Bytes, BytesMut};
use std::collections::HashMap;

use super::{ExchangeHost, HostCall};
use crate::config::ConfigError;
use crate::core::{Action, HttpContext, RootContext};
use crate::debug_fmt;

#[derive(Debug)]
struct EmulatedExchange {
    host: ExchangeHost,
    context: Box<dyn HttpContext>,
    forwarded: BytesMut,
    completed: bool,
}

/// A single-threaded host that runs one filter.
///
/// Stage calls with a context id that was never initialized panic.
#[derive(Debug)]
pub struct HostEmulator {
    root: Box<dyn RootContext>,
    exchanges: HashMap<u32, EmulatedExchange>,
    next_context_id: u32,
}

impl HostEmulator {
    /// Create an emulator around a filter. The plugin is not started yet.
    pub fn new<R: RootContext + 'static>(root: R) -> Self {
        Self {
            root: Box::new(root),
            exchanges: HashMap::new(),
            // Context id 0 is the root context
            next_context_id: 1,
        }
    }

    /// Start the plugin with the given configuration payload.
    pub fn start_plugin(&mut self, configuration: &[u8]) -> Result<(), ConfigError> {
        debug_fmt!("HostEmulator", "Starting plugin '{}'", self.root.name());
        self.root.on_plugin_start(configuration)
    }

    /// Open a new exchange and return its context id.
    pub fn initialize_http_context(&mut self) -> u32 {
        let id = self.next_context_id;
        self.next_context_id += 1;

        let context = self.root.create_http_context(id);
        self.exchanges.insert(
            id,
            EmulatedExchange {
                host: ExchangeHost::new(),
                context,
                forwarded: BytesMut::new(),
                completed: false,
            },
        );
        id
    }

    /// Make a host call fail for one exchange.
    pub fn inject_fault(&mut self, context_id: u32, call: HostCall) {
        self.exchange_mut(context_id).host.inject_fault(call);
    }

    /// Deliver request headers.
    pub fn call_on_request_headers(
        &mut self,
        context_id: u32,
        headers: &[(&str, &str)],
        end_of_stream: bool,
    ) -> Action {
        let exchange = self.exchange_mut(context_id);
        exchange.host.set_request_headers(headers.iter().copied());
        exchange
            .context
            .on_request_headers(&mut exchange.host, headers.len(), end_of_stream)
    }

    /// Deliver response headers.
    pub fn call_on_response_headers(
        &mut self,
        context_id: u32,
        headers: &[(&str, &str)],
        end_of_stream: bool,
    ) -> Action {
        let exchange = self.exchange_mut(context_id);
        exchange.host.set_response_headers(headers.iter().copied());
        exchange
            .context
            .on_response_headers(&mut exchange.host, headers.len(), end_of_stream)
    }

    /// Deliver a response body chunk. On [`Action::Continue`] everything the
    /// host is buffering is forwarded.
    pub fn call_on_response_body(
        &mut self,
        context_id: u32,
        chunk: &[u8],
        end_of_stream: bool,
    ) -> Action {
        let exchange = self.exchange_mut(context_id);
        exchange.host.push_response_body(chunk);
        let action = exchange
            .context
            .on_response_body(&mut exchange.host, chunk.len(), end_of_stream);

        if action == Action::Continue {
            let flushed = exchange.host.take_response_body();
            exchange.forwarded.extend_from_slice(&flushed);
        }
        action
    }

    /// Finish the exchange. Its state stays inspectable.
    pub fn complete_http_context(&mut self, context_id: u32) {
        let exchange = self.exchange_mut(context_id);
        if !exchange.completed {
            exchange.context.on_done();
            exchange.completed = true;
        }
    }

    /// Response headers as the client would see them.
    pub fn current_response_headers(&self, context_id: u32) -> Vec<(String, String)> {
        self.exchange(context_id)
            .map(|e| e.host.response_headers().to_vec())
            .unwrap_or_default()
    }

    /// Response body as the client would see it: everything forwarded plus
    /// anything still buffered.
    pub fn current_response_body(&self, context_id: u32) -> Bytes {
        match self.exchange(context_id) {
            Some(e) => {
                let mut body = e.forwarded.clone();
                body.extend_from_slice(e.host.buffered_response_body());
                body.freeze()
            }
            None => Bytes::new(),
        }
    }

    fn exchange(&self, context_id: u32) -> Option<&EmulatedExchange> {
        self.exchanges.get(&context_id)
    }

    fn exchange_mut(&mut self, context_id: u32) -> &mut EmulatedExchange {
        let next = self.next_context_id;
        self.exchanges
            .get_mut(&context_id)
            .unwrap_or_else(|| panic!("unknown context id {context_id} (next is {next})"))
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Drives the response body stage over a streamed upstream body.
//!
//! Every upstream chunk is appended to the exchange buffer and offered to the
//! filter with `end_of_stream = false`; the end of the upstream stream is
//! delivered as a final empty chunk with `end_of_stream = true`. On
//! [`Action::Continue`] the buffer is flushed downstream, on
//! [`Action::Pause`] it is held and the next chunk is pulled.
//!
//! If the buffer grows past the body limit the pump stops calling the filter
//! and forwards everything unmodified from then on.

use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream, Stream};
use std::io;

use crate::core::{Action, HttpContext};
use crate::host::ExchangeHost;
use crate::{error_fmt, trace_fmt, warn_fmt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PumpState {
    /// Chunks go through the filter.
    Filtering,
    /// Limit exceeded; chunks go straight downstream.
    Bypass,
    /// Stream ended and `on_done` has run.
    Finished,
}

/// One exchange's response body in flight.
pub(crate) struct BodyPump {
    context_id: u32,
    host: ExchangeHost,
    context: Box<dyn HttpContext>,
    upstream: BoxStream<'static, io::Result<Bytes>>,
    body_limit: usize,
    state: PumpState,
}

impl BodyPump {
    pub(crate) fn new(
        context_id: u32,
        host: ExchangeHost,
        context: Box<dyn HttpContext>,
        upstream: BoxStream<'static, io::Result<Bytes>>,
        body_limit: usize,
    ) -> Self {
        Self {
            context_id,
            host,
            context,
            upstream,
            body_limit,
            state: PumpState::Filtering,
        }
    }

    /// Turn the pump into the downstream body stream.
    pub(crate) fn into_stream(self) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
        stream::unfold(self, |mut pump| async move {
            let item = pump.next_chunk().await?;
            Some((item, pump))
        })
    }

    async fn next_chunk(&mut self) -> Option<io::Result<Bytes>> {
        loop {
            match self.state {
                PumpState::Finished => return None,
                PumpState::Bypass => {
                    return match self.upstream.next().await {
                        Some(Ok(chunk)) => Some(Ok(chunk)),
                        Some(Err(e)) => {
                            self.finish();
                            Some(Err(e))
                        }
                        None => {
                            self.finish();
                            None
                        }
                    };
                }
                PumpState::Filtering => {}
            }

            let (chunk_size, end_of_stream) = match self.upstream.next().await {
                Some(Ok(chunk)) => {
                    self.host.push_response_body(&chunk);
                    (chunk.len(), false)
                }
                Some(Err(e)) => {
                    error_fmt!(
                        "Proxy",
                        "[{}] upstream body failed after {} buffered bytes: {}",
                        self.context_id,
                        self.host.buffered_response_body().len(),
                        e
                    );
                    self.finish();
                    return Some(Err(e));
                }
                None => (0, true),
            };

            if self.host.buffered_response_body().len() > self.body_limit {
                warn_fmt!(
                    "Proxy",
                    "[{}] buffered response body exceeds {} bytes; forwarding it unmodified",
                    self.context_id,
                    self.body_limit
                );
                let buffered = self.host.take_response_body();
                if end_of_stream {
                    self.finish();
                } else {
                    self.state = PumpState::Bypass;
                }
                return Some(Ok(buffered));
            }

            let action = self
                .context
                .on_response_body(&mut self.host, chunk_size, end_of_stream);
            trace_fmt!(
                "Proxy",
                "[{}] body chunk of {} bytes (eos={}) -> {:?}",
                self.context_id,
                chunk_size,
                end_of_stream,
                action
            );

            if end_of_stream {
                // Nothing more will arrive, so whatever is held goes out now
                let remaining = self.host.take_response_body();
                self.finish();
                return (!remaining.is_empty()).then_some(Ok(remaining));
            }

            if action == Action::Continue {
                let flushed = self.host.take_response_body();
                if !flushed.is_empty() {
                    return Some(Ok(flushed));
                }
            }
        }
    }

    fn finish(&mut self) {
        if self.state != PumpState::Finished {
            self.state = PumpState::Finished;
            self.context.on_done();
        }
    }
}

impl Drop for BodyPump {
    // A client that goes away mid-body still completes the exchange
    fn drop(&mut self) {
        self.finish();
    }
}

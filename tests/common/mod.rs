// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Common test utilities and helpers for Errata integration tests.

use errata::config::{FileConfigProvider, FileFormat};
use errata::{Errata, ProxyError};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// A proxy serving on an ephemeral port.
#[allow(dead_code)]
pub struct RunningProxy {
    pub addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<Result<(), ProxyError>>>,
}

#[allow(dead_code)]
impl RunningProxy {
    /// URL of `path` on the proxy.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Stop accepting and wait for the drain to finish.
    pub async fn shutdown(mut self) -> Result<(), ProxyError> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        match self.handle.take() {
            Some(handle) => tokio::time::timeout(Duration::from_secs(10), handle)
                .await
                .expect("proxy did not shut down in time")
                .expect("proxy task panicked"),
            None => Ok(()),
        }
    }
}

impl Drop for RunningProxy {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Base configuration document pointing at `upstream`.
#[allow(dead_code)]
pub fn base_config(upstream: &str, filter: Value) -> Value {
    json!({
        "server": {"host": "127.0.0.1", "port": 0},
        "upstream": {"url": upstream, "timeout": 2},
        "filter": filter
    })
}

/// Build Errata from an inline JSON document and serve it on an ephemeral port.
#[allow(dead_code)]
pub async fn spawn_proxy(document: Value) -> RunningProxy {
    let provider = FileConfigProvider::from_content(&document.to_string(), FileFormat::Json)
        .expect("inline configuration should parse");
    let errata = Errata::loader()
        .with_provider(provider)
        .build()
        .expect("errata should build");

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stopped) = oneshot::channel::<()>();

    let handle = tokio::spawn(async move {
        errata
            .server()
            .serve(listener, async {
                let _ = stopped.await;
            })
            .await
    });

    RunningProxy {
        addr,
        stop: Some(stop),
        handle: Some(handle),
    }
}

/// Find a local port nothing is listening on.
#[allow(dead_code)]
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Minimal CLI wrapper so the library can run as a stand-alone proxy.
//!
//!  Build it with `cargo build --release --bin errata`
//!  The binary honours ERRATA_CONFIG_FILE or falls back to /etc/errata/config.toml.

use errata::{Errata, error_fmt, info_fmt};
use std::env;
use std::error::Error;

const FALLBACK_CONFIG_PATH: &str = "/etc/errata/config.toml";

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    println!("Starting Errata");

    // Env vars always apply and override the file
    let mut loader = Errata::loader().with_env_vars();
    match env::var("ERRATA_CONFIG_FILE") {
        Ok(path) => {
            println!("Using configuration from {path}");
            loader = loader.with_config_file(&path);
        }
        Err(_) => {
            println!(
                "No ERRATA_CONFIG_FILE env var found. Attempting to use default configuration path: {FALLBACK_CONFIG_PATH}"
            );

            if std::path::Path::new(FALLBACK_CONFIG_PATH).exists() {
                loader = loader.with_config_file(FALLBACK_CONFIG_PATH);
            } else {
                println!(
                    "Default configuration file {FALLBACK_CONFIG_PATH} does not exist; using environment only."
                );
            }
        }
    }

    let proxy = match loader.build() {
        Ok(p) => p,
        Err(e) => {
            println!("Failed to build proxy: {e}");
            return Err(e.into());
        }
    };

    match proxy.start().await {
        Ok(()) => {
            info_fmt!("Errata", "Proxy server stopped gracefully");
        }
        Err(e) => {
            error_fmt!("Errata", "Proxy server failed: {}", e);
            return Err(e.into());
        }
    }

    Ok(())
}

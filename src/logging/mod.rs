// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Logging setup for Errata.
//!
//! Everything in the crate logs through the `log` facade, mostly via the
//! `*_fmt!` context macros. At startup exactly one backend is installed:
//! `env_logger` for plain output, or a `slog` drain (terminal or JSON) bridged
//! through `slog-stdlog` when `logging.structured` is set.

pub mod config;
pub mod structured;
mod wrapper;


use log::{LevelFilter, info, warn};
use once_cell::sync::OnceCell;
use std::sync::Once;
use std::sync::atomic::{AtomicBool, Ordering};

use config::LoggingConfig;
use structured::{LoggerGuard, init_global_logger};

static INIT: Once = Once::new();
static USING_STRUCTURED: AtomicBool = AtomicBool::new(false);
static STRUCTURED_GUARD: OnceCell<LoggerGuard> = OnceCell::new();

/// Initialize plain logging with the specified level.
///
/// `RUST_LOG` still wins when set. Only the first call has any effect.
pub fn init(level: Option<LevelFilter>) {
    INIT.call_once(|| install_env_logger(level.unwrap_or(LevelFilter::Info)));
}

/// Initialize logging from the `logging` configuration section.
///
/// Only the first call has any effect.
pub fn init_with_config(level: LevelFilter, config: &LoggingConfig) {
    INIT.call_once(|| {
        if !config.structured {
            install_env_logger(level);
            return;
        }

        let logger_config = config.to_logger_config();
        let guard = STRUCTURED_GUARD.get_or_init(|| init_global_logger(&logger_config));
        let bridge_level = level.to_level().unwrap_or(log::Level::Error);

        match slog_stdlog::init_with_level(bridge_level) {
            Ok(()) => {
                log::set_max_level(level);
                USING_STRUCTURED.store(true, Ordering::SeqCst);
                info!(
                    "Structured logging initialized ({:?}, level {})",
                    guard.format(),
                    level
                );
            }
            Err(e) => warn!("A logger is already installed, keeping it: {}", e),
        }
    });
}

/// True when the `slog` backend is the one receiving log records.
pub fn is_structured_logging() -> bool {
    USING_STRUCTURED.load(Ordering::SeqCst)
}

fn install_env_logger(level: LevelFilter) {
    let env = env_logger::Env::default().filter_or("RUST_LOG", level.as_str().to_lowercase());

    // Test harnesses may already have installed a logger
    if env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .format_target(true)
        .try_init()
        .is_ok()
    {
        info!("Logging initialized at level: {}", log::max_level());
    }
}

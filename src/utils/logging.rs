//! Per-module switchable logging.
//!
//! The sampler and channel run on short timers and would flood the log at
//! `info`. Modules that use these macros declare a local flag:
//!
//! ```ignore
//! const ENABLE_LOGS: bool = true;
//! use crate::{log_debug, log_info, log_warn};
//! ```
//!
//! Setting the flag to `false` silences the module without touching
//! `RUST_LOG` for the rest of the app.

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::debug!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!($($arg)*);
        }
    };
}

/// Errors are always worth seeing, but the flag still applies so a module can
/// be muted completely while it is being worked on.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!($($arg)*);
        }
    };
}

/// Initialise `env_logger` once. `RUST_LOG` overrides the `info` default.
/// Safe to call from tests; repeated calls are ignored.
pub fn init_logging() {
    let _ = env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .try_init();
}

//! Logging setup
//!
//! Logs go to the systemd journal when its socket exists, otherwise to
//! stdout. The filter comes from `BMCFAN_LOG`; without it `BMCFAN_DEBUG`
//! selects `debug` and the default is `info`. The filter is revisited after
//! the configuration file has been read, since the file may set either key.

use std::path::Path;

use tracing_subscriber::prelude::*;
use tracing_subscriber::{reload, EnvFilter, Registry};

const JOURNAL_SOCKET: &str = "/run/systemd/journal/socket";
const LOG_ENV: &str = "BMCFAN_LOG";
const DEBUG_ENV: &str = "BMCFAN_DEBUG";

/// Handle kept by `main` to adjust verbosity after startup
pub struct LogHandle {
    reload: reload::Handle<EnvFilter, Registry>,
    explicit_filter: bool,
    pub journald: bool,
    pub filter: String,
}

impl LogHandle {
    /// Replace the filter with a directive from the configuration file.
    /// Invalid directives leave the current filter in place.
    pub fn set_filter(&mut self, directive: &str) -> bool {
        if directive == self.filter {
            return true;
        }
        let filter = match EnvFilter::try_new(directive) {
            Ok(filter) => filter,
            Err(e) => {
                tracing::warn!("Ignoring invalid {} '{}': {}", LOG_ENV, directive, e);
                return false;
            }
        };
        if self.reload.modify(|f| *f = filter).is_err() {
            return false;
        }
        self.filter = directive.to_string();
        self.explicit_filter = true;
        true
    }

    /// Switch to debug verbosity unless `BMCFAN_LOG` pinned the filter
    pub fn enable_debug(&mut self) {
        if self.explicit_filter || self.filter == "debug" {
            return;
        }
        if self.reload.modify(|f| *f = EnvFilter::new("debug")).is_ok() {
            self.filter = "debug".to_string();
        }
    }
}

fn initial_filter() -> (String, bool) {
    if let Ok(filter) = std::env::var(LOG_ENV) {
        return (filter, true);
    }
    let debug = std::env::var(DEBUG_ENV)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false);
    (if debug { "debug" } else { "info" }.to_string(), false)
}

pub fn init() -> LogHandle {
    let (filter, explicit_filter) = initial_filter();
    let (filter_layer, reload) = reload::Layer::new(EnvFilter::new(&filter));

    let mut journald = Path::new(JOURNAL_SOCKET).exists();
    if journald {
        match tracing_journald::layer() {
            Ok(journald_layer) => {
                tracing_subscriber::registry()
                    .with(filter_layer)
                    .with(journald_layer)
                    .init();
            }
            Err(e) => {
                eprintln!("Failed to create journald layer: {}, falling back to stdout", e);
                journald = false;
                tracing_subscriber::registry()
                    .with(filter_layer)
                    .with(tracing_subscriber::fmt::layer().with_target(false))
                    .init();
            }
        }
    } else {
        tracing_subscriber::registry()
            .with(filter_layer)
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    }

    LogHandle {
        reload,
        explicit_filter,
        journald,
        filter,
    }
}

/// Log panics before unwinding; the service manager restarts the daemon
pub fn install_panic_hook() {
    std::panic::set_hook(Box::new(|panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());

        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        eprintln!("PANIC at {}: {}", location, message);
        eprintln!("Fans stay at the last applied duty until the daemon restarts");
        tracing::error!("PANIC at {}: {}", location, message);
    }));
}

// tabbridge — Browser Tab Discovery and Diagnostics Proxy Bridge
// Copyright (C) 2026  Martin Gehrken (IamLumae)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::fmt;
use std::sync::Arc;

use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::errors::Diagnostic;

pub const LOG_ENV: &str = "TABBRIDGE_LOG";

/// Install the process-wide subscriber. Output goes to stderr; stdout belongs
/// to the `serve` protocol.
pub fn init_logging(quiet: bool) {
    let directive = if quiet { "tabbridge=error" } else { "tabbridge=info" };
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(directive));

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(filter)
        .try_init();
}

pub type TextCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// The host's `onLog` callback. Every absorbed failure passes through here.
pub struct LogSink {
    callback: TextCallback,
}

impl LogSink {
    pub fn new(callback: TextCallback) -> Self {
        Self { callback }
    }

    pub fn line(&self, text: &str) {
        (self.callback)(text);
    }

    pub fn report(&self, diagnostic: &Diagnostic) {
        warn!(
            event = "bridge.diagnostic",
            code = diagnostic.error_code(),
            detail = %diagnostic
        );
        self.line(&diagnostic.log_line());
    }
}

impl fmt::Debug for LogSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LogSink")
    }
}

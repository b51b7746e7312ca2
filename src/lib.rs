// tabbridge — Browser Tab Discovery and Diagnostics Proxy Bridge
// Copyright (C) 2026  Martin Gehrken (IamLumae)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Find browser tab surfaces, attach a diagnostics proxy into them, and talk
//! to that proxy over `WM_COPYDATA`.

pub mod attach;
pub mod bridge;
pub mod channel;
pub mod config;
pub mod discovery;
pub mod errors;
pub mod host;
pub mod ids;
pub mod inject;
pub mod logging;
pub mod platform;

pub use bridge::Bridge;
pub use channel::Dispatcher;
pub use config::BridgeConfig;
pub use discovery::Instance;
pub use errors::{BridgeError, ConfigError, Diagnostic};
pub use ids::{EndpointId, TabId, WindowHandle};
pub use logging::{init_logging, TextCallback};
pub use platform::Platform;

#[cfg(windows)]
pub use platform::NativePlatform;

// tabbridge — Browser Tab Discovery and Diagnostics Proxy Bridge
// Copyright (C) 2026  Martin Gehrken (IamLumae)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Attach negotiation: pick the companion module matching the tab process,
//! start diagnostics mode in it, and return the proxy's endpoint.
//!
//! Not idempotent. Attaching twice to the same tab negotiates twice and may
//! yield two independent endpoints; callers attach at most once per tab.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::{parse_guid, BridgeConfig};
use crate::discovery::is_tab_surface;
use crate::errors::Diagnostic;
use crate::ids::{EndpointId, TabId};
use crate::platform::{ActivationFailure, ActivationRequest, Bitness, Platform};

pub const E_ACCESSDENIED: u32 = 0x8007_0005;
/// `HRESULT_FROM_WIN32(ERROR_MOD_NOT_FOUND)`
pub const E_MOD_NOT_FOUND: u32 = 0x8007_007E;

/// 64-bit only when the OS is 64-bit and the tab process is not emulated.
pub fn effective_bitness(host: Bitness, emulated: bool) -> Bitness {
    match (host, emulated) {
        (Bitness::X64, false) => Bitness::X64,
        _ => Bitness::X86,
    }
}

pub fn module_file_name(config: &BridgeConfig, bitness: Bitness) -> String {
    let stem = match bitness {
        Bitness::X64 => &config.companion.module_64,
        Bitness::X86 => &config.companion.module_32,
    };
    if config.companion.extension.is_empty() {
        stem.clone()
    } else {
        format!("{}.{}", stem, config.companion.extension)
    }
}

/// `<root>/<lib_dir>/<module>.<ext>`; `lib_dir` defaults to `../../lib`.
pub fn companion_module_path(root: &Path, config: &BridgeConfig, bitness: Bitness) -> PathBuf {
    let mut path = root.to_path_buf();
    for part in config.companion.lib_dir.split(['/', '\\']).filter(|p| !p.is_empty()) {
        path.push(part);
    }
    path.push(module_file_name(config, bitness));
    path
}

/// Map a failed activation to the guidance the operator should see.
pub fn classify_failure(
    failure: &ActivationFailure,
    bitness: Bitness,
    app_containers: bool,
    config: &BridgeConfig,
) -> Diagnostic {
    let module = module_file_name(config, bitness);
    match failure.code {
        E_ACCESSDENIED if bitness == Bitness::X64 && app_containers => {
            Diagnostic::AccessDenied64 { module }
        }
        E_MOD_NOT_FOUND => Diagnostic::ModuleNotFound {
            module,
            lib_dir: config.companion.lib_dir.clone(),
        },
        code => Diagnostic::Activation {
            code,
            message: failure.message.clone(),
        },
    }
}

fn activation_request(
    root: &Path,
    config: &BridgeConfig,
    bitness: Bitness,
) -> Result<ActivationRequest, Diagnostic> {
    let guid = |text: &str| {
        parse_guid(text).ok_or_else(|| Diagnostic::Activation {
            code: 0x8007_0057, // E_INVALIDARG
            message: format!("'{}' is not a GUID", text),
        })
    };
    Ok(ActivationRequest {
        host_service_iid: guid(&config.activation.host_service_iid)?,
        proxy_site_clsid: guid(&config.activation.proxy_site_clsid)?,
        site_iid: guid(&config.activation.site_iid)?,
        module_path: companion_module_path(root, config, bitness),
    })
}

/// Steps 1-5 of attach. Receiver setup is the caller's business.
pub fn negotiate<P: Platform>(
    platform: &P,
    root: &Path,
    config: &BridgeConfig,
    tab: TabId,
) -> Result<EndpointId, Diagnostic> {
    let hwnd = tab.handle();
    // Handles get reused; the id must still name a tab of the content process.
    if !is_tab_surface(platform, config, hwnd) {
        info!(event = "bridge.attach.tab_mismatch", tab = %tab);
        return Err(Diagnostic::TabNotFound { id: tab.to_string() });
    }
    let document = platform.document(hwnd).map_err(|e| {
        info!(event = "bridge.attach.tab_unresolved", tab = %tab, error = %e);
        Diagnostic::TabNotFound { id: tab.to_string() }
    })?;

    let emulated = platform.is_emulated(hwnd)?;
    let bitness = effective_bitness(platform.host_bitness(), emulated);
    let request = activation_request(root, config, bitness)?;
    info!(
        event = "bridge.attach.started",
        tab = %tab,
        bitness = ?bitness,
        module = %request.module_path.display()
    );

    let site = platform
        .start_diagnostics_mode(&document, &request)
        .map_err(|failure| {
            classify_failure(&failure, bitness, platform.app_containers_supported(), config)
        })?;

    let endpoint = EndpointId::new(site);
    info!(event = "bridge.attach.completed", tab = %tab, endpoint = %endpoint);
    Ok(endpoint)
}

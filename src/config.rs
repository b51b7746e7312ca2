// tabbridge — Browser Tab Discovery and Diagnostics Proxy Bridge
// Copyright (C) 2026  Martin Gehrken (IamLumae)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Bridge configuration.
//!
//! Everything here has a working default. A deployment may drop a
//! `tabbridge.toml` next to the bridge root to override any field, e.g. when
//! the content process is renamed or the companion modules move.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

pub const CONFIG_FILE: &str = "tabbridge.toml";

const TAB_WINDOW_CLASS: &str = "Internet Explorer_Server";
const CONTENT_PROCESS_IMAGE: &str = "MicrosoftEdgeCP.exe";
const IOLEWINDOW_IID: &str = "00000114-0000-0000-C000-000000000046";
// Diagnostics-mode host, reached through the document's IServiceProvider
const HOST_SERVICE_IID: &str = "6F6D4F2B-1C7A-4E39-9D3C-5B2F8A0E7C11";
// ProxySite coclass exported by the companion module
const PROXY_SITE_CLSID: &str = "A2D7A2E1-6A0E-4C1B-9B3D-5C7E2F1D8B40";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Window class of a tab render surface.
    pub tab_window_class: String,
    /// Image file name of the process hosting tab content. Matched as a
    /// case-insensitive suffix of the full image path.
    pub content_process_image: String,
    pub companion: CompanionConfig,
    pub activation: ActivationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompanionConfig {
    /// Relative to the bridge root.
    pub lib_dir: String,
    pub module_32: String,
    pub module_64: String,
    pub extension: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivationConfig {
    pub host_service_iid: String,
    pub proxy_site_clsid: String,
    pub site_iid: String,
    /// `COPYDATASTRUCT.dwData` tag carried by every string frame.
    pub copy_data_signature: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            tab_window_class: TAB_WINDOW_CLASS.to_string(),
            content_process_image: CONTENT_PROCESS_IMAGE.to_string(),
            companion: CompanionConfig::default(),
            activation: ActivationConfig::default(),
        }
    }
}

impl Default for CompanionConfig {
    fn default() -> Self {
        Self {
            lib_dir: "../../lib".to_string(),
            module_32: "Proxy".to_string(),
            module_64: "Proxy64".to_string(),
            extension: std::env::consts::DLL_EXTENSION.to_string(),
        }
    }
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self {
            host_service_iid: HOST_SERVICE_IID.to_string(),
            proxy_site_clsid: PROXY_SITE_CLSID.to_string(),
            site_iid: IOLEWINDOW_IID.to_string(),
            copy_data_signature: 0,
        }
    }
}

/// Parse a registry-format GUID (`XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX`,
/// braces optional) into its 128-bit value.
pub fn parse_guid(text: &str) -> Option<u128> {
    let inner = text.trim().trim_start_matches('{').trim_end_matches('}');
    let groups: Vec<&str> = inner.split('-').collect();
    let lengths = [8, 4, 4, 4, 12];
    if groups.len() != lengths.len() {
        return None;
    }
    if groups.iter().zip(lengths).any(|(g, len)| g.len() != len) {
        return None;
    }
    u128::from_str_radix(&groups.concat(), 16).ok()
}

pub fn validate_config(config: &BridgeConfig) -> Result<(), ConfigError> {
    let required = [
        ("tab_window_class", &config.tab_window_class),
        ("content_process_image", &config.content_process_image),
        ("companion.module_32", &config.companion.module_32),
        ("companion.module_64", &config.companion.module_64),
    ];
    for (name, value) in required {
        if value.trim().is_empty() {
            return Err(ConfigError::Invalid {
                message: format!("'{}' must not be empty", name),
            });
        }
    }

    let guids = [
        ("activation.host_service_iid", &config.activation.host_service_iid),
        ("activation.proxy_site_clsid", &config.activation.proxy_site_clsid),
        ("activation.site_iid", &config.activation.site_iid),
    ];
    for (name, value) in guids {
        if parse_guid(value).is_none() {
            return Err(ConfigError::Invalid {
                message: format!("'{}' is not a GUID: '{}'", name, value),
            });
        }
    }

    Ok(())
}

/// Load and validate a single configuration file.
pub fn load_config_file(path: &Path) -> Result<BridgeConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config: BridgeConfig = toml::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    validate_config(&config)?;
    Ok(config)
}

/// `<root>/tabbridge.toml` if present, defaults otherwise.
pub fn load_for_root(root: &Path) -> Result<BridgeConfig, ConfigError> {
    let path: PathBuf = root.join(CONFIG_FILE);
    if !path.exists() {
        return Ok(BridgeConfig::default());
    }
    load_config_file(&path)
}

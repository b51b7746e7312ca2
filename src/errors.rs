// tabbridge — Browser Tab Discovery and Diagnostics Proxy Bridge
// Copyright (C) 2026  Martin Gehrken (IamLumae)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::path::PathBuf;

/// Hard rejections. These are the only failures a caller receives as `Err`;
/// everything else is a [`Diagnostic`] that ends up on the log callback.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Not initialized - you must call initialize(...) before using the bridge.")]
    NotInitialized,

    #[error("Already initialized - you cannot call initialize(...) more than once.")]
    AlreadyInitialized,

    #[error("Incorrect arguments - {usage}")]
    InvalidArgument { usage: &'static str },

    #[error("Unknown operation '{op}'")]
    UnknownOperation { op: String },

    #[error("Platform setup failed: {message}")]
    PlatformInit { message: String },
}

impl BridgeError {
    pub fn error_code(&self) -> &'static str {
        match self {
            BridgeError::NotInitialized => "NOT_INITIALIZED",
            BridgeError::AlreadyInitialized => "ALREADY_INITIALIZED",
            BridgeError::InvalidArgument { .. } => "INVALID_ARGUMENT",
            BridgeError::UnknownOperation { .. } => "UNKNOWN_OPERATION",
            BridgeError::PlatformInit { .. } => "PLATFORM_INIT",
        }
    }
}

/// Absorbed failures. Internal steps return `Result<T, Diagnostic>`; the
/// bridge turns an `Err` into "absent result + one log line".
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Diagnostic {
    #[error("'{id}' is not a window id")]
    MalformedId { id: String },

    #[error("No browser tab found for id {id}")]
    TabNotFound { id: String },

    #[error("Could not query process for window {window}: {message}")]
    ProcessUnavailable { window: String, message: String },

    #[error("Could not reach the document of window {window}: {message}")]
    DocumentUnavailable { window: String, message: String },

    #[error(
        "Access denied while attempting to connect to a 64 bit tab. The most common solution to this \
         problem is to open an Administrator command prompt, navigate to the folder containing this \
         adapter, and type \"icacls {module} /grant \"ALL APPLICATION PACKAGES\":(RX)\""
    )]
    AccessDenied64 { module: String },

    #[error("Module could not be found. Ensure {module} exists in the {lib_dir} folder")]
    ModuleNotFound { module: String, lib_dir: String },

    #[error("HRESULT 0x{code:08x} : {message}")]
    Activation { code: u32, message: String },

    #[error("Message receiver unavailable: {message}")]
    ReceiverUnavailable { message: String },

    #[error("Dropped malformed frame: {reason}")]
    MalformedFrame { reason: String },

    #[error("Failed to get the SID for ALL_APP_PACKAGES. Win32 error code: {code}")]
    AclSid { code: u32 },

    #[error(
        "Could not set ACL on '{}' (Win32 error code: {code}). You can set the ACL manually by adding \
         Read & Execute permissions for 'ALL APPLICATION PACKAGES' to each module.",
        path.display()
    )]
    AclUpdate { path: PathBuf, code: u32 },
}

impl Diagnostic {
    pub fn error_code(&self) -> &'static str {
        match self {
            Diagnostic::MalformedId { .. } => "MALFORMED_ID",
            Diagnostic::TabNotFound { .. } => "TAB_NOT_FOUND",
            Diagnostic::ProcessUnavailable { .. } => "PROCESS_UNAVAILABLE",
            Diagnostic::DocumentUnavailable { .. } => "DOCUMENT_UNAVAILABLE",
            Diagnostic::AccessDenied64 { .. } => "ACCESS_DENIED_64",
            Diagnostic::ModuleNotFound { .. } => "MODULE_NOT_FOUND",
            Diagnostic::Activation { .. } => "ACTIVATION_FAILED",
            Diagnostic::ReceiverUnavailable { .. } => "RECEIVER_UNAVAILABLE",
            Diagnostic::MalformedFrame { .. } => "MALFORMED_FRAME",
            Diagnostic::AclSid { .. } => "ACL_SID",
            Diagnostic::AclUpdate { .. } => "ACL_UPDATE",
        }
    }

    /// Log line handed to the host's `onLog` callback.
    pub fn log_line(&self) -> String {
        format!("ERROR: {}", self)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{}': {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

impl ConfigError {
    pub fn error_code(&self) -> &'static str {
        match self {
            ConfigError::Read { .. } => "CONFIG_READ",
            ConfigError::Parse { .. } => "CONFIG_PARSE",
            ConfigError::Invalid { .. } => "CONFIG_INVALID",
        }
    }
}

// tabbridge — Browser Tab Discovery and Diagnostics Proxy Bridge
// Copyright (C) 2026  Martin Gehrken (IamLumae)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The OS seam. Everything above this trait is platform-neutral.

use std::path::{Path, PathBuf};

use tokio::sync::{mpsc, oneshot};

use crate::errors::Diagnostic;
use crate::ids::WindowHandle;

#[cfg(windows)]
pub mod win32;

#[cfg(test)]
pub mod fake;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bitness {
    X86,
    X64,
}

/// Everything the activation call needs, already resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationRequest {
    /// Service and interface id of the browser's diagnostics-mode host.
    pub host_service_iid: u128,
    pub proxy_site_clsid: u128,
    pub site_iid: u128,
    pub module_path: PathBuf,
}

/// A non-success HRESULT from the activation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationFailure {
    pub code: u32,
    pub message: String,
}

/// One decoded inbound frame and the window that sent it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub from: WindowHandle,
    pub text: String,
}

pub type ReadySignal = oneshot::Sender<Result<WindowHandle, Diagnostic>>;
pub type InboundSender = mpsc::UnboundedSender<InboundMessage>;

pub trait Platform: Send + Sync + 'static {
    /// Live automation object of a tab surface. Only used on the thread that
    /// obtained it.
    type Document;

    /// Per-thread setup (COM apartment) for the thread that will run
    /// discovery and attach.
    fn initialize_thread(&self) -> Result<(), String>;

    fn top_level_windows(&self) -> Vec<WindowHandle>;

    /// All descendants of `parent`, not only direct children.
    fn child_windows(&self, parent: WindowHandle) -> Vec<WindowHandle>;

    fn class_name(&self, window: WindowHandle) -> Option<String>;

    /// Full image path of the process owning `window`.
    fn process_image_path(&self, window: WindowHandle) -> Result<String, Diagnostic>;

    fn document(&self, window: WindowHandle) -> Result<Self::Document, Diagnostic>;

    fn document_url(&self, document: &Self::Document) -> Option<String>;

    fn document_title(&self, document: &Self::Document) -> Option<String>;

    fn host_bitness(&self) -> Bitness;

    /// Whether the process owning `window` runs under 32-bit emulation.
    fn is_emulated(&self, window: WindowHandle) -> Result<bool, Diagnostic>;

    /// Whether the OS sandboxes tab processes in app containers.
    fn app_containers_supported(&self) -> bool;

    /// Inject the companion module via the document and return the window of
    /// the site object it created.
    fn start_diagnostics_mode(
        &self,
        document: &Self::Document,
        request: &ActivationRequest,
    ) -> Result<WindowHandle, ActivationFailure>;

    /// Body of the receiver thread. Creates the message-only window, reports
    /// its handle through `ready`, then pumps messages until process exit,
    /// pushing every decoded frame into `inbound`.
    fn run_receiver(&self, signature: usize, ready: ReadySignal, inbound: InboundSender);

    /// Synchronous cross-process delivery of one frame. Failures are not
    /// observable.
    fn send_frame(&self, target: WindowHandle, from: WindowHandle, signature: usize, frame: &[u8]);

    fn grant_app_container_access(&self, path: &Path) -> Result<(), Diagnostic>;
}

/// The platform this build talks to.
#[cfg(windows)]
pub type NativePlatform = win32::Win32Platform;

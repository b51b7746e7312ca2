// tabbridge — Browser Tab Discovery and Diagnostics Proxy Bridge
// Copyright (C) 2026  Martin Gehrken (IamLumae)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Scripted in-memory platform for tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{mpsc as std_mpsc, Mutex, MutexGuard};

use super::*;

#[derive(Debug, Clone)]
pub struct FakeWindow {
    pub class: String,
    pub image: Option<String>,
    pub url: Option<String>,
    pub title: Option<String>,
    pub has_document: bool,
    pub emulated: bool,
}

impl FakeWindow {
    pub fn tab(image: &str, url: &str, title: &str) -> Self {
        Self {
            class: "Internet Explorer_Server".to_string(),
            image: Some(image.to_string()),
            url: Some(url.to_string()),
            title: Some(title.to_string()),
            has_document: true,
            emulated: false,
        }
    }

    pub fn plain(class: &str) -> Self {
        Self {
            class: class.to_string(),
            image: Some("C:\\Windows\\explorer.exe".to_string()),
            url: None,
            title: None,
            has_document: false,
            emulated: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SentFrame {
    pub target: WindowHandle,
    pub from: WindowHandle,
    pub signature: usize,
    pub frame: Vec<u8>,
}

#[derive(Default)]
struct State {
    tops: Vec<WindowHandle>,
    children: HashMap<WindowHandle, Vec<WindowHandle>>,
    windows: HashMap<WindowHandle, FakeWindow>,
    bitness: Option<Bitness>,
    app_containers: bool,
    init_error: Option<String>,
    activation: Option<Result<WindowHandle, ActivationFailure>>,
    activations: Vec<ActivationRequest>,
    receiver_error: Option<String>,
    receiver_gate: Option<std_mpsc::Receiver<()>>,
    receivers_started: usize,
    inbound: Option<InboundSender>,
    sent: Vec<SentFrame>,
    acl_error: Option<Diagnostic>,
    acl_grants: Vec<PathBuf>,
}

pub struct FakePlatform {
    state: Mutex<State>,
}

impl FakePlatform {
    pub const RECEIVER: WindowHandle = WindowHandle(0xFEED);

    pub fn new() -> Self {
        let state = State {
            bitness: Some(Bitness::X64),
            app_containers: true,
            ..State::default()
        };
        Self { state: Mutex::new(state) }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn add_top(&self, top: WindowHandle, window: FakeWindow) {
        let mut s = self.state();
        s.tops.push(top);
        s.windows.insert(top, window);
    }

    pub fn add_child(&self, parent: WindowHandle, child: WindowHandle, window: FakeWindow) {
        let mut s = self.state();
        s.children.entry(parent).or_default().push(child);
        s.windows.insert(child, window);
    }

    pub fn update(&self, window: WindowHandle, f: impl FnOnce(&mut FakeWindow)) {
        if let Some(w) = self.state().windows.get_mut(&window) {
            f(w);
        }
    }

    pub fn set_bitness(&self, bitness: Bitness) {
        self.state().bitness = Some(bitness);
    }

    pub fn set_app_containers(&self, supported: bool) {
        self.state().app_containers = supported;
    }

    pub fn fail_init(&self, message: &str) {
        self.state().init_error = Some(message.to_string());
    }

    pub fn set_activation(&self, result: Result<WindowHandle, ActivationFailure>) {
        self.state().activation = Some(result);
    }

    pub fn activations(&self) -> Vec<ActivationRequest> {
        self.state().activations.clone()
    }

    pub fn fail_receiver(&self, message: &str) {
        self.state().receiver_error = Some(message.to_string());
    }

    /// Keep the next receiver from reporting ready until the returned
    /// sender fires (or is dropped).
    pub fn hold_receiver(&self) -> std_mpsc::Sender<()> {
        let (release, gate) = std_mpsc::channel();
        self.state().receiver_gate = Some(gate);
        release
    }

    pub fn receivers_started(&self) -> usize {
        self.state().receivers_started
    }

    /// Simulate a peer posting a frame to the receiver window.
    pub fn deliver(&self, from: WindowHandle, text: &str) {
        let inbound = self.state().inbound.clone();
        if let Some(tx) = inbound {
            let _ = tx.send(InboundMessage { from, text: text.to_string() });
        }
    }

    pub fn sent_frames(&self) -> Vec<SentFrame> {
        self.state().sent.clone()
    }

    pub fn fail_acl(&self, diagnostic: Diagnostic) {
        self.state().acl_error = Some(diagnostic);
    }

    pub fn acl_grants(&self) -> Vec<PathBuf> {
        self.state().acl_grants.clone()
    }

    fn window(&self, window: WindowHandle) -> Option<FakeWindow> {
        self.state().windows.get(&window).cloned()
    }

    fn descendants(s: &State, parent: WindowHandle, out: &mut Vec<WindowHandle>) {
        if let Some(kids) = s.children.get(&parent) {
            for &kid in kids {
                out.push(kid);
                Self::descendants(s, kid, out);
            }
        }
    }
}

impl Platform for FakePlatform {
    type Document = WindowHandle;

    fn initialize_thread(&self) -> Result<(), String> {
        match &self.state().init_error {
            Some(message) => Err(message.clone()),
            None => Ok(()),
        }
    }

    fn top_level_windows(&self) -> Vec<WindowHandle> {
        self.state().tops.clone()
    }

    fn child_windows(&self, parent: WindowHandle) -> Vec<WindowHandle> {
        let s = self.state();
        let mut out = Vec::new();
        Self::descendants(&s, parent, &mut out);
        out
    }

    fn class_name(&self, window: WindowHandle) -> Option<String> {
        self.window(window).map(|w| w.class)
    }

    fn process_image_path(&self, window: WindowHandle) -> Result<String, Diagnostic> {
        self.window(window)
            .and_then(|w| w.image)
            .ok_or_else(|| Diagnostic::ProcessUnavailable {
                window: window.to_hex(),
                message: "access denied".to_string(),
            })
    }

    fn document(&self, window: WindowHandle) -> Result<Self::Document, Diagnostic> {
        match self.window(window) {
            Some(w) if w.has_document => Ok(window),
            _ => Err(Diagnostic::DocumentUnavailable {
                window: window.to_hex(),
                message: "no document".to_string(),
            }),
        }
    }

    fn document_url(&self, document: &Self::Document) -> Option<String> {
        self.window(*document).and_then(|w| w.url)
    }

    fn document_title(&self, document: &Self::Document) -> Option<String> {
        self.window(*document).and_then(|w| w.title)
    }

    fn host_bitness(&self) -> Bitness {
        self.state().bitness.unwrap_or(Bitness::X64)
    }

    fn is_emulated(&self, window: WindowHandle) -> Result<bool, Diagnostic> {
        Ok(self.window(window).map(|w| w.emulated).unwrap_or(false))
    }

    fn app_containers_supported(&self) -> bool {
        self.state().app_containers
    }

    fn start_diagnostics_mode(
        &self,
        _document: &Self::Document,
        request: &ActivationRequest,
    ) -> Result<WindowHandle, ActivationFailure> {
        let mut s = self.state();
        s.activations.push(request.clone());
        s.activation.clone().unwrap_or(Ok(WindowHandle(0x5000 + s.activations.len() as isize)))
    }

    fn run_receiver(&self, _signature: usize, ready: ReadySignal, inbound: InboundSender) {
        let mut s = self.state();
        s.receivers_started += 1;
        if let Some(message) = s.receiver_error.clone() {
            drop(s);
            let _ = ready.send(Err(Diagnostic::ReceiverUnavailable { message }));
            return;
        }
        s.inbound = Some(inbound);
        let gate = s.receiver_gate.take();
        drop(s);
        if let Some(gate) = gate {
            let _ = gate.recv();
        }
        let _ = ready.send(Ok(Self::RECEIVER));
    }

    fn send_frame(&self, target: WindowHandle, from: WindowHandle, signature: usize, frame: &[u8]) {
        self.state().sent.push(SentFrame {
            target,
            from,
            signature,
            frame: frame.to_vec(),
        });
    }

    fn grant_app_container_access(&self, path: &Path) -> Result<(), Diagnostic> {
        let mut s = self.state();
        if let Some(diagnostic) = s.acl_error.clone() {
            return Err(diagnostic);
        }
        s.acl_grants.push(path.to_path_buf());
        Ok(())
    }
}

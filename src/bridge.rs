// tabbridge — Browser Tab Discovery and Diagnostics Proxy Bridge
// Copyright (C) 2026  Martin Gehrken (IamLumae)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The service object the host holds for the lifetime of the process.
//!
//! Only argument-shape and lifecycle errors come back as `Err`. Everything
//! else (a stale tab, a failed activation, a missing module) is reported once
//! on the `onLog` callback and surfaces as an absent result.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::info;

use crate::attach::negotiate;
use crate::channel::{Dispatcher, MessageChannel};
use crate::config::BridgeConfig;
use crate::discovery::{resolve_instances, Instance};
use crate::errors::BridgeError;
use crate::ids::{EndpointId, TabId};
use crate::inject::inject_command;
use crate::logging::{LogSink, TextCallback};
use crate::platform::Platform;

struct Session<P: Platform> {
    root_path: PathBuf,
    log: LogSink,
    channel: MessageChannel<P>,
    dispatcher: Mutex<Option<Dispatcher>>,
}

enum BridgeState<P: Platform> {
    Uninitialized,
    Ready(Arc<Session<P>>),
}

pub struct Bridge<P: Platform> {
    platform: Arc<P>,
    config: BridgeConfig,
    state: RwLock<BridgeState<P>>,
}

impl<P: Platform> Bridge<P> {
    pub fn new(platform: P, config: BridgeConfig) -> Self {
        Self {
            platform: Arc::new(platform),
            config,
            state: RwLock::new(BridgeState::Uninitialized),
        }
    }

    #[cfg(test)]
    pub(crate) fn platform_for_tests(&self) -> &P {
        &self.platform
    }

    pub fn is_initialized(&self) -> bool {
        matches!(
            *self.state.read().unwrap_or_else(PoisonError::into_inner),
            BridgeState::Ready(_)
        )
    }

    fn session(&self) -> Result<Arc<Session<P>>, BridgeError> {
        match &*self.state.read().unwrap_or_else(PoisonError::into_inner) {
            BridgeState::Ready(session) => Ok(Arc::clone(session)),
            BridgeState::Uninitialized => Err(BridgeError::NotInitialized),
        }
    }

    /// One-time setup. Discovery and attach must run on the calling thread
    /// afterwards (it owns the COM apartment). A second call fails and leaves
    /// the first call's root path and callbacks untouched.
    pub fn initialize(
        &self,
        root_path: impl Into<PathBuf>,
        on_message: TextCallback,
        on_log: TextCallback,
    ) -> Result<(), BridgeError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if let BridgeState::Ready(_) = *state {
            return Err(BridgeError::AlreadyInitialized);
        }

        self.platform
            .initialize_thread()
            .map_err(|message| BridgeError::PlatformInit { message })?;

        let (channel, inbound) = MessageChannel::new(
            Arc::clone(&self.platform),
            self.config.activation.copy_data_signature,
        );
        let dispatcher = channel.dispatcher(inbound, on_message);
        let root_path = root_path.into();
        info!(event = "bridge.initialized", root = %root_path.display());

        *state = BridgeState::Ready(Arc::new(Session {
            root_path,
            log: LogSink::new(on_log),
            channel,
            dispatcher: Mutex::new(Some(dispatcher)),
        }));
        Ok(())
    }

    pub fn root_path(&self) -> Result<PathBuf, BridgeError> {
        Ok(self.session()?.root_path.clone())
    }

    /// Hand out the inbound dispatcher. Only the first call gets it; the
    /// host drives it on the thread that should observe `onMessage`.
    pub fn take_dispatcher(&self) -> Result<Option<Dispatcher>, BridgeError> {
        let session = self.session()?;
        let taken = session
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(taken)
    }

    pub fn list_instances(&self) -> Result<Vec<Instance>, BridgeError> {
        self.session()?;
        Ok(resolve_instances(self.platform.as_ref(), &self.config))
    }

    /// Attach the diagnostics proxy to `tab`. `Ok(None)` means the attach
    /// failed and the reason went to the log callback.
    pub fn attach(&self, tab: TabId) -> Result<Option<EndpointId>, BridgeError> {
        let session = self.session()?;
        match negotiate(self.platform.as_ref(), &session.root_path, &self.config, tab) {
            Ok(endpoint) => {
                if let Err(d) = session.channel.ensure_active(endpoint) {
                    session.log.report(&d);
                }
                Ok(Some(endpoint))
            }
            Err(d) => {
                session.log.report(&d);
                Ok(None)
            }
        }
    }

    pub fn inject_script(
        &self,
        endpoint: EndpointId,
        engine: &str,
        filename: &str,
        script: &str,
    ) -> Result<(), BridgeError> {
        let session = self.session()?;
        session
            .channel
            .send(endpoint, &inject_command(engine, filename, script));
        Ok(())
    }

    pub fn send_raw(&self, endpoint: EndpointId, message: &str) -> Result<(), BridgeError> {
        self.session()?.channel.send(endpoint, message);
        Ok(())
    }

    /// Grant read/execute on `path` to sandboxed tab processes.
    pub fn harden_module_acl(&self, path: &Path) -> Result<bool, BridgeError> {
        let session = self.session()?;
        match self.platform.grant_app_container_access(path) {
            Ok(()) => {
                info!(event = "bridge.acl.granted", path = %path.display());
                Ok(true)
            }
            Err(d) => {
                session.log.report(&d);
                Ok(false)
            }
        }
    }

    /// Report a failure that happened outside the bridge (e.g. at the host
    /// boundary) through the same log callback.
    pub fn report(&self, diagnostic: &crate::errors::Diagnostic) -> Result<(), BridgeError> {
        self.session()?.log.report(diagnostic);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::decode_frame;
    use crate::errors::Diagnostic;
    use crate::ids::WindowHandle;
    use crate::platform::fake::{FakePlatform, FakeWindow};
    use crate::platform::ActivationFailure;

    const TAB_A: WindowHandle = WindowHandle(0x12);
    const TAB_B: WindowHandle = WindowHandle(0x21);

    type Lines = Arc<Mutex<Vec<String>>>;

    fn capture() -> (Lines, TextCallback) {
        let lines: Lines = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        (lines, Arc::new(move |s: &str| sink.lock().unwrap().push(s.to_string())))
    }

    fn fake() -> FakePlatform {
        let p = FakePlatform::new();
        p.add_top(WindowHandle(0x10), FakeWindow::plain("ApplicationFrameWindow"));
        p.add_child(WindowHandle(0x10), TAB_A, FakeWindow::tab("C:\\x\\MicrosoftEdgeCP.exe", "https://a/", "A"));
        p.add_top(WindowHandle(0x20), FakeWindow::plain("ApplicationFrameWindow"));
        p.add_child(WindowHandle(0x20), TAB_B, FakeWindow::tab("C:\\x\\MicrosoftEdgeCP.exe", "https://b/", "B"));
        p
    }

    struct Harness {
        bridge: Bridge<FakePlatform>,
        messages: Lines,
        logs: Lines,
    }

    fn ready() -> Harness {
        let bridge = Bridge::new(fake(), BridgeConfig::default());
        let (messages, on_message) = capture();
        let (logs, on_log) = capture();
        bridge.initialize("C:\\adapter\\out\\bin", on_message, on_log).unwrap();
        Harness { bridge, messages, logs }
    }

    #[test]
    fn operations_require_initialize() {
        let bridge = Bridge::new(fake(), BridgeConfig::default());
        assert!(matches!(bridge.list_instances(), Err(BridgeError::NotInitialized)));
        assert!(matches!(bridge.attach(TabId::new(TAB_A)), Err(BridgeError::NotInitialized)));
        assert!(matches!(
            bridge.send_raw(EndpointId::new(TAB_A), "x"),
            Err(BridgeError::NotInitialized)
        ));
        assert!(matches!(bridge.take_dispatcher(), Err(BridgeError::NotInitialized)));
    }

    #[test]
    fn second_initialize_fails_and_keeps_first_setup() {
        let h = ready();
        let (_, other) = capture();
        let (other_logs, other_log) = capture();

        let err = h.bridge.initialize("D:\\elsewhere", other, other_log).unwrap_err();
        assert!(matches!(err, BridgeError::AlreadyInitialized));
        assert_eq!(h.bridge.root_path().unwrap(), PathBuf::from("C:\\adapter\\out\\bin"));

        h.bridge.attach(TabId::new(WindowHandle(0x999))).unwrap();
        assert_eq!(h.logs.lock().unwrap().len(), 1);
        assert!(other_logs.lock().unwrap().is_empty());
    }

    #[test]
    fn failed_platform_init_leaves_bridge_uninitialized() {
        let p = fake();
        p.fail_init("CoInitializeEx: RPC_E_CHANGED_MODE");
        let bridge = Bridge::new(p, BridgeConfig::default());
        let (_, on_message) = capture();
        let (_, on_log) = capture();

        let err = bridge.initialize("r", on_message, on_log).unwrap_err();
        assert!(matches!(err, BridgeError::PlatformInit { .. }));
        assert!(!bridge.is_initialized());
    }

    #[test]
    fn list_instances_reports_tabs() {
        let h = ready();
        let instances = h.bridge.list_instances().unwrap();
        assert_eq!(instances.len(), 2);
        assert_eq!(instances[1].title, "B");
    }

    #[test]
    fn receiver_is_created_once_across_attaches() {
        let h = ready();
        assert_eq!(h.bridge.platform.receivers_started(), 0);

        let a = h.bridge.attach(TabId::new(TAB_A)).unwrap().unwrap();
        let b = h.bridge.attach(TabId::new(TAB_B)).unwrap().unwrap();
        let again = h.bridge.attach(TabId::new(TAB_A)).unwrap().unwrap();

        assert_eq!(h.bridge.platform.receivers_started(), 1);
        assert_ne!(a, b);
        // negotiated again, new endpoint
        assert_ne!(a, again);
        assert!(h.logs.lock().unwrap().is_empty());
    }

    #[test]
    fn failed_attach_creates_no_receiver() {
        let h = ready();
        h.bridge.platform.set_activation(Err(ActivationFailure {
            code: 0x8000_4005,
            message: "Unspecified error".to_string(),
        }));

        assert_eq!(h.bridge.attach(TabId::new(TAB_A)).unwrap(), None);
        assert_eq!(h.bridge.platform.receivers_started(), 0);
        assert_eq!(
            h.logs.lock().unwrap().as_slice(),
            ["ERROR: HRESULT 0x80004005 : Unspecified error"]
        );
    }

    #[test]
    fn access_denied_hint_depends_on_app_containers() {
        let h = ready();
        h.bridge.platform.set_activation(Err(ActivationFailure {
            code: crate::attach::E_ACCESSDENIED,
            message: "Access is denied.".to_string(),
        }));

        assert_eq!(h.bridge.attach(TabId::new(TAB_A)).unwrap(), None);
        h.bridge.platform.set_app_containers(false);
        assert_eq!(h.bridge.attach(TabId::new(TAB_A)).unwrap(), None);

        let logs = h.logs.lock().unwrap();
        assert!(logs[0].contains("icacls Proxy64."));
        assert_eq!(logs[1], "ERROR: HRESULT 0x80070005 : Access is denied.");
    }

    #[test]
    fn stale_tab_yields_none_and_a_log_line() {
        let h = ready();
        let result = h.bridge.attach(TabId::new(WindowHandle(0x4242))).unwrap();
        assert_eq!(result, None);
        let logs = h.logs.lock().unwrap();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].contains("No browser tab found"));
    }

    #[test]
    fn reused_handle_of_another_window_is_not_attached() {
        let h = ready();
        h.bridge.platform.add_top(WindowHandle(0x30), FakeWindow::plain("IEFrame"));
        // tab class, foreign process
        h.bridge.platform.add_child(
            WindowHandle(0x30),
            WindowHandle(0x31),
            FakeWindow::tab("C:\\Program Files\\Internet Explorer\\iexplore.exe", "https://c/", "C"),
        );
        // content process, wrong class
        let mut button = FakeWindow::tab("C:\\x\\MicrosoftEdgeCP.exe", "https://d/", "D");
        button.class = "Button".to_string();
        h.bridge.platform.add_child(WindowHandle(0x30), WindowHandle(0x32), button);

        assert_eq!(h.bridge.attach(TabId::new(WindowHandle(0x31))).unwrap(), None);
        assert_eq!(h.bridge.attach(TabId::new(WindowHandle(0x32))).unwrap(), None);

        assert!(h.bridge.platform.activations().is_empty());
        assert_eq!(h.bridge.platform.receivers_started(), 0);
        let logs = h.logs.lock().unwrap();
        assert_eq!(logs.len(), 2);
        assert!(logs.iter().all(|l| l.contains("No browser tab found")));
    }

    #[test]
    fn receiver_failure_is_logged_but_attach_succeeds() {
        let h = ready();
        h.bridge.platform.fail_receiver("CreateWindowExW failed");
        let endpoint = h.bridge.attach(TabId::new(TAB_A)).unwrap();
        assert!(endpoint.is_some());
        assert!(h.logs.lock().unwrap()[0].contains("CreateWindowExW failed"));
    }

    #[test]
    fn inject_script_sends_exactly_one_frame() {
        let h = ready();
        let endpoint = h.bridge.attach(TabId::new(TAB_A)).unwrap().unwrap();

        h.bridge.inject_script(endpoint, "js", "f.js", "1+1").unwrap();

        let sent = h.bridge.platform.sent_frames();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].target, endpoint.handle());
        assert_eq!(sent[0].from, FakePlatform::RECEIVER);
        assert_eq!(decode_frame(&sent[0].frame).unwrap(), "inject:js:f.js:1+1");
    }

    #[test]
    fn send_raw_preserves_order_per_target() {
        let h = ready();
        let endpoint = EndpointId::new(WindowHandle(0x77));
        for text in ["first", "second", "third"] {
            h.bridge.send_raw(endpoint, text).unwrap();
        }
        let texts: Vec<String> = h
            .bridge
            .platform
            .sent_frames()
            .iter()
            .map(|f| decode_frame(&f.frame).unwrap())
            .collect();
        assert_eq!(texts, ["first", "second", "third"]);
    }

    #[test]
    fn inbound_messages_reach_on_message_through_dispatcher() {
        let h = ready();
        let mut dispatcher = h.bridge.take_dispatcher().unwrap().unwrap();
        assert!(h.bridge.take_dispatcher().unwrap().is_none());

        let endpoint = h.bridge.attach(TabId::new(TAB_A)).unwrap().unwrap();
        h.bridge.platform.deliver(endpoint.handle(), "{\"id\":1,\"result\":{}}");

        // nothing runs until the host drives the dispatcher
        assert!(h.messages.lock().unwrap().is_empty());
        assert_eq!(dispatcher.dispatch_pending(), 1);
        assert_eq!(
            h.messages.lock().unwrap().as_slice(),
            ["{\"id\":1,\"result\":{}}"]
        );
    }

    #[test]
    fn harden_reports_success_and_failure() {
        let h = ready();
        assert!(h.bridge.harden_module_acl(Path::new("C:\\lib")).unwrap());
        assert_eq!(h.bridge.platform.acl_grants(), [PathBuf::from("C:\\lib")]);

        h.bridge.platform.fail_acl(Diagnostic::AclSid { code: 1337 });
        assert!(!h.bridge.harden_module_acl(Path::new("C:\\lib")).unwrap());
        assert!(h.logs.lock().unwrap()[0].contains("ALL_APP_PACKAGES"));
    }
}

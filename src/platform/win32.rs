// tabbridge — Browser Tab Discovery and Diagnostics Proxy Bridge
// Copyright (C) 2026  Martin Gehrken (IamLumae)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::ffi::c_void;
use std::mem;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering::SeqCst};
use std::sync::{Mutex, PoisonError};

use tracing::{debug, info, warn};
use windows::core::*;
use windows::Win32::Foundation::*;
use windows::Win32::Security::Authorization::{
    ConvertStringSidToSidW, GetNamedSecurityInfoW, SetEntriesInAclW, SetNamedSecurityInfoW,
    EXPLICIT_ACCESS_W, SE_FILE_OBJECT, SET_ACCESS, TRUSTEE_IS_SID, TRUSTEE_IS_WELL_KNOWN_GROUP,
    TRUSTEE_W,
};
use windows::Win32::Security::{
    ACL, DACL_SECURITY_INFORMATION, PSECURITY_DESCRIPTOR, PSID, SUB_CONTAINERS_AND_OBJECTS_INHERIT,
};
use windows::Win32::System::Com::*;
use windows::Win32::System::DataExchange::COPYDATASTRUCT;
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::System::Ole::IOleWindow;
use windows::Win32::System::SystemInformation::{
    GetNativeSystemInfo, VerSetConditionMask, VerifyVersionInfoW, OSVERSIONINFOEXW,
    PROCESSOR_ARCHITECTURE_AMD64, SYSTEM_INFO, VER_MAJORVERSION, VER_MINORVERSION,
    VER_SERVICEPACKMAJOR,
};
use windows::Win32::System::Threading::{
    IsWow64Process, OpenProcess, QueryFullProcessImageNameW, PROCESS_NAME_FORMAT,
    PROCESS_QUERY_LIMITED_INFORMATION,
};
use windows::Win32::UI::Accessibility::ObjectFromLresult;
use windows::Win32::UI::WindowsAndMessaging::*;

use super::*;
use crate::channel::decode_frame;

const RECEIVER_CLASS: PCWSTR = w!("TabBridgeReceiver");
const DOCUMENT_TIMEOUT_MS: u32 = 1000;
const ALL_APP_PACKAGES_SID: PCWSTR = w!("S-1-15-2-1");
const VER_GREATER_EQUAL: u8 = 3;

// ── MSHTML (not projected by the windows crate) ────
// Vtable order up to get_URL. Slots that are never called keep a
// placeholder signature.
#[windows::core::interface("332C4425-26CB-11D0-B483-00C04FD90119")]
unsafe trait IHTMLDocument2: IDispatch {
    unsafe fn get_script(&self, out: *mut *mut c_void) -> HRESULT;
    unsafe fn get_all(&self, out: *mut *mut c_void) -> HRESULT;
    unsafe fn get_body(&self, out: *mut *mut c_void) -> HRESULT;
    unsafe fn get_active_element(&self, out: *mut *mut c_void) -> HRESULT;
    unsafe fn get_images(&self, out: *mut *mut c_void) -> HRESULT;
    unsafe fn get_applets(&self, out: *mut *mut c_void) -> HRESULT;
    unsafe fn get_links(&self, out: *mut *mut c_void) -> HRESULT;
    unsafe fn get_forms(&self, out: *mut *mut c_void) -> HRESULT;
    unsafe fn get_anchors(&self, out: *mut *mut c_void) -> HRESULT;
    unsafe fn put_title(&self, value: *mut c_void) -> HRESULT;
    unsafe fn get_title(&self, out: *mut BSTR) -> HRESULT;
    unsafe fn get_scripts(&self, out: *mut *mut c_void) -> HRESULT;
    unsafe fn put_design_mode(&self, value: *mut c_void) -> HRESULT;
    unsafe fn get_design_mode(&self, out: *mut *mut c_void) -> HRESULT;
    unsafe fn get_selection(&self, out: *mut *mut c_void) -> HRESULT;
    unsafe fn get_ready_state(&self, out: *mut *mut c_void) -> HRESULT;
    unsafe fn get_frames(&self, out: *mut *mut c_void) -> HRESULT;
    unsafe fn get_embeds(&self, out: *mut *mut c_void) -> HRESULT;
    unsafe fn get_plugins(&self, out: *mut *mut c_void) -> HRESULT;
    unsafe fn put_alink_color(&self, value: *mut c_void) -> HRESULT;
    unsafe fn get_alink_color(&self, out: *mut c_void) -> HRESULT;
    unsafe fn put_bg_color(&self, value: *mut c_void) -> HRESULT;
    unsafe fn get_bg_color(&self, out: *mut c_void) -> HRESULT;
    unsafe fn put_fg_color(&self, value: *mut c_void) -> HRESULT;
    unsafe fn get_fg_color(&self, out: *mut c_void) -> HRESULT;
    unsafe fn put_link_color(&self, value: *mut c_void) -> HRESULT;
    unsafe fn get_link_color(&self, out: *mut c_void) -> HRESULT;
    unsafe fn put_vlink_color(&self, value: *mut c_void) -> HRESULT;
    unsafe fn get_vlink_color(&self, out: *mut c_void) -> HRESULT;
    unsafe fn get_referrer(&self, out: *mut BSTR) -> HRESULT;
    unsafe fn get_location(&self, out: *mut *mut c_void) -> HRESULT;
    unsafe fn get_last_modified(&self, out: *mut BSTR) -> HRESULT;
    unsafe fn put_url(&self, value: *mut c_void) -> HRESULT;
    unsafe fn get_url(&self, out: *mut BSTR) -> HRESULT;
}

fn bstr_property(read: impl FnOnce(*mut BSTR) -> HRESULT) -> Option<String> {
    let mut value = BSTR::new();
    if read(&mut value).is_ok() {
        Some(value.to_string())
    } else {
        None
    }
}

// Browser-side host for diagnostics mode. The IID passed to QueryService
// comes from configuration; this one is only the declaration's default.
#[windows::core::interface("6F6D4F2B-1C7A-4E39-9D3C-5B2F8A0E7C11")]
unsafe trait IDiagnosticsModeHost: IUnknown {
    unsafe fn StartDiagnosticsMode(
        &self,
        clsid: *const GUID,
        module_path: PCWSTR,
        riid: *const GUID,
        site: *mut *mut c_void,
    ) -> HRESULT;
}

// ── Receiver state (one per process) ────────────────
static INBOUND: Mutex<Option<InboundSender>> = Mutex::new(None);
static SIGNATURE: AtomicUsize = AtomicUsize::new(0);

fn hwnd(h: WindowHandle) -> HWND {
    HWND(h.0 as *mut _)
}

fn handle(h: HWND) -> WindowHandle {
    WindowHandle(h.0 as isize)
}

fn hresult_message(code: HRESULT) -> String {
    Error::from(code).message().to_string()
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Win32Platform;

// ── Window walk ─────────────────────────────────────
unsafe extern "system" fn collect_cb(hwnd: HWND, lparam: LPARAM) -> BOOL {
    let vec = &mut *(lparam.0 as *mut Vec<isize>);
    vec.push(hwnd.0 as isize);
    TRUE
}

unsafe fn collect_top_level() -> Vec<WindowHandle> {
    let mut hwnds: Vec<isize> = Vec::new();
    let _ = EnumWindows(Some(collect_cb), LPARAM(&mut hwnds as *mut Vec<isize> as isize));
    hwnds.into_iter().map(WindowHandle).collect()
}

unsafe fn collect_children(parent: HWND) -> Vec<WindowHandle> {
    // EnumChildWindows already recurses into grandchildren
    let mut hwnds: Vec<isize> = Vec::new();
    let _ = EnumChildWindows(parent, Some(collect_cb), LPARAM(&mut hwnds as *mut Vec<isize> as isize));
    hwnds.into_iter().map(WindowHandle).collect()
}

unsafe fn window_pid(window: HWND) -> u32 {
    let mut pid: u32 = 0;
    GetWindowThreadProcessId(window, Some(&mut pid));
    pid
}

unsafe fn open_owner(window: WindowHandle) -> std::result::Result<HANDLE, Diagnostic> {
    let pid = window_pid(hwnd(window));
    if pid == 0 {
        return Err(Diagnostic::ProcessUnavailable {
            window: window.to_hex(),
            message: "window has no owning process".to_string(),
        });
    }
    OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, FALSE, pid).map_err(|e| {
        Diagnostic::ProcessUnavailable {
            window: window.to_hex(),
            message: e.message().to_string(),
        }
    })
}

unsafe fn image_path(window: WindowHandle) -> std::result::Result<String, Diagnostic> {
    let process = open_owner(window)?;
    let mut buf = [0u16; 260];
    let mut len = buf.len() as u32;
    let ok = QueryFullProcessImageNameW(
        process, PROCESS_NAME_FORMAT(0), PWSTR(buf.as_mut_ptr()), &mut len,
    );
    let _ = CloseHandle(process);
    match ok {
        Ok(()) => Ok(String::from_utf16_lossy(&buf[..len as usize])),
        Err(e) => Err(Diagnostic::ProcessUnavailable {
            window: window.to_hex(),
            message: e.message().to_string(),
        }),
    }
}

// ── Document (WM_HTML_GETOBJECT) ────────────────────
unsafe fn document_from_window(window: WindowHandle) -> std::result::Result<IHTMLDocument2, Diagnostic> {
    let unavailable = |message: String| Diagnostic::DocumentUnavailable {
        window: window.to_hex(),
        message,
    };
    let msg = RegisterWindowMessageW(w!("WM_HTML_GETOBJECT"));
    let mut result: usize = 0;
    let sent = SendMessageTimeoutW(
        hwnd(window),
        msg,
        WPARAM(0),
        LPARAM(0),
        SMTO_ABORTIFHUNG,
        DOCUMENT_TIMEOUT_MS,
        Some(&mut result),
    );
    if sent.0 == 0 || result == 0 {
        return Err(unavailable("window did not answer WM_HTML_GETOBJECT".to_string()));
    }
    ObjectFromLresult(LRESULT(result as isize), WPARAM(0))
        .map_err(|e: Error| unavailable(e.message().to_string()))
}

// ── Receiver window ─────────────────────────────────
unsafe extern "system" fn receiver_proc(hwnd: HWND, msg: u32, wp: WPARAM, lp: LPARAM) -> LRESULT {
    match msg {
        WM_COPYDATA => {
            let data = &*(lp.0 as *const COPYDATASTRUCT);
            if data.dwData != SIGNATURE.load(SeqCst) || data.lpData.is_null() {
                debug!(event = "bridge.receiver.foreign_copydata", tag = data.dwData);
                return LRESULT(0);
            }
            let bytes = std::slice::from_raw_parts(data.lpData as *const u8, data.cbData as usize);
            match decode_frame(bytes) {
                Ok(text) => {
                    let inbound = INBOUND.lock().unwrap_or_else(PoisonError::into_inner);
                    if let Some(tx) = inbound.as_ref() {
                        let _ = tx.send(InboundMessage { from: WindowHandle(wp.0 as isize), text });
                    }
                }
                Err(e) => warn!(event = "bridge.receiver.frame_dropped", error = %e),
            }
            LRESULT(1)
        }
        _ => DefWindowProcW(hwnd, msg, wp, lp),
    }
}

unsafe fn create_receiver_window() -> Result<HWND> {
    let inst = GetModuleHandleW(None)?;
    let hinst: HINSTANCE = inst.into();
    let wc = WNDCLASSEXW {
        cbSize: mem::size_of::<WNDCLASSEXW>() as u32,
        lpfnWndProc: Some(receiver_proc),
        hInstance: hinst,
        lpszClassName: RECEIVER_CLASS,
        ..Default::default()
    };
    RegisterClassExW(&wc);

    let receiver = CreateWindowExW(
        WINDOW_EX_STYLE(0),
        RECEIVER_CLASS, w!("tabbridge"),
        WINDOW_STYLE(0),
        0, 0, 0, 0,
        HWND_MESSAGE, HMENU::default(), hinst, None,
    )?;

    // Proxies run inside sandboxed (low integrity) tab processes
    let _ = ChangeWindowMessageFilterEx(receiver, WM_COPYDATA, MSGFLT_ALLOW, None);
    Ok(receiver)
}

impl Platform for Win32Platform {
    type Document = IHTMLDocument2;

    fn initialize_thread(&self) -> std::result::Result<(), String> {
        let hr = unsafe { CoInitializeEx(None, COINIT_APARTMENTTHREADED | COINIT_DISABLE_OLE1DDE) };
        if hr.is_ok() {
            info!(event = "bridge.win32.com_initialized");
            Ok(())
        } else {
            Err(format!("CoInitializeEx: HRESULT 0x{:08x} : {}", hr.0 as u32, hresult_message(hr)))
        }
    }

    fn top_level_windows(&self) -> Vec<WindowHandle> {
        unsafe { collect_top_level() }
    }

    fn child_windows(&self, parent: WindowHandle) -> Vec<WindowHandle> {
        unsafe { collect_children(hwnd(parent)) }
    }

    fn class_name(&self, window: WindowHandle) -> Option<String> {
        let mut buf = [0u16; 256];
        let len = unsafe { GetClassNameW(hwnd(window), &mut buf) };
        if len <= 0 {
            return None;
        }
        Some(String::from_utf16_lossy(&buf[..len as usize]))
    }

    fn process_image_path(&self, window: WindowHandle) -> std::result::Result<String, Diagnostic> {
        unsafe { image_path(window) }
    }

    fn document(&self, window: WindowHandle) -> std::result::Result<IHTMLDocument2, Diagnostic> {
        unsafe {
            if !IsWindow(hwnd(window)).as_bool() {
                return Err(Diagnostic::DocumentUnavailable {
                    window: window.to_hex(),
                    message: "no such window".to_string(),
                });
            }
            document_from_window(window)
        }
    }

    fn document_url(&self, document: &IHTMLDocument2) -> Option<String> {
        bstr_property(|out| unsafe { document.get_url(out) })
    }

    fn document_title(&self, document: &IHTMLDocument2) -> Option<String> {
        bstr_property(|out| unsafe { document.get_title(out) })
    }

    fn host_bitness(&self) -> Bitness {
        let mut sys = SYSTEM_INFO::default();
        unsafe {
            GetNativeSystemInfo(&mut sys);
            if sys.Anonymous.Anonymous.wProcessorArchitecture == PROCESSOR_ARCHITECTURE_AMD64 {
                Bitness::X64
            } else {
                Bitness::X86
            }
        }
    }

    fn is_emulated(&self, window: WindowHandle) -> std::result::Result<bool, Diagnostic> {
        unsafe {
            let process = open_owner(window)?;
            let mut wow = FALSE;
            let result = IsWow64Process(process, &mut wow);
            let _ = CloseHandle(process);
            result.map_err(|e| Diagnostic::ProcessUnavailable {
                window: window.to_hex(),
                message: e.message().to_string(),
            })?;
            Ok(wow.as_bool())
        }
    }

    fn app_containers_supported(&self) -> bool {
        // IsWindows8Point1OrGreater
        unsafe {
            let mut info = OSVERSIONINFOEXW {
                dwOSVersionInfoSize: mem::size_of::<OSVERSIONINFOEXW>() as u32,
                dwMajorVersion: 6,
                dwMinorVersion: 3,
                ..Default::default()
            };
            let mask = VerSetConditionMask(
                VerSetConditionMask(
                    VerSetConditionMask(0, VER_MAJORVERSION, VER_GREATER_EQUAL),
                    VER_MINORVERSION,
                    VER_GREATER_EQUAL,
                ),
                VER_SERVICEPACKMAJOR,
                VER_GREATER_EQUAL,
            );
            VerifyVersionInfoW(&mut info, VER_MAJORVERSION | VER_MINORVERSION | VER_SERVICEPACKMAJOR, mask)
                .is_ok()
        }
    }

    fn start_diagnostics_mode(
        &self,
        document: &IHTMLDocument2,
        request: &ActivationRequest,
    ) -> std::result::Result<WindowHandle, ActivationFailure> {
        let fail = |e: Error| ActivationFailure {
            code: e.code().0 as u32,
            message: e.message().to_string(),
        };
        unsafe {
            let provider: IServiceProvider = document.cast().map_err(fail)?;
            let service = GUID::from_u128(request.host_service_iid);
            let mut raw_host: *mut c_void = std::ptr::null_mut();
            (Interface::vtable(&provider).QueryService)(
                Interface::as_raw(&provider),
                &service,
                &service,
                &mut raw_host,
            )
            .ok()
            .map_err(fail)?;
            if raw_host.is_null() {
                return Err(fail(Error::from(E_NOINTERFACE)));
            }
            let host = IDiagnosticsModeHost::from_raw(raw_host);

            let clsid = GUID::from_u128(request.proxy_site_clsid);
            let iid = GUID::from_u128(request.site_iid);
            let module = HSTRING::from(request.module_path.as_os_str());
            let mut raw: *mut c_void = std::ptr::null_mut();
            let hr = host.StartDiagnosticsMode(&clsid, PCWSTR(module.as_ptr()), &iid, &mut raw);
            if hr.is_err() || raw.is_null() {
                return Err(fail(Error::from(if hr.is_err() { hr } else { E_POINTER })));
            }

            let site = IOleWindow::from_raw(raw);
            let window = site.GetWindow().map_err(fail)?;
            Ok(handle(window))
        }
    }

    fn run_receiver(&self, signature: usize, ready: ReadySignal, inbound: InboundSender) {
        SIGNATURE.store(signature, SeqCst);

        let receiver = match unsafe { create_receiver_window() } {
            Ok(h) => h,
            Err(e) => {
                let _ = ready.send(Err(Diagnostic::ReceiverUnavailable {
                    message: format!("CreateWindowExW: {}", e.message()),
                }));
                return;
            }
        };
        *INBOUND.lock().unwrap_or_else(PoisonError::into_inner) = Some(inbound);
        info!(event = "bridge.receiver.window_created", hwnd = %handle(receiver).to_hex());
        let _ = ready.send(Ok(handle(receiver)));

        unsafe {
            let mut msg = MSG::default();
            while GetMessageW(&mut msg, None, 0, 0).into() {
                let _ = TranslateMessage(&msg);
                DispatchMessageW(&msg);
            }
        }
        warn!(event = "bridge.receiver.loop_exited");
    }

    fn send_frame(&self, target: WindowHandle, from: WindowHandle, signature: usize, frame: &[u8]) {
        let data = COPYDATASTRUCT {
            dwData: signature,
            cbData: frame.len() as u32,
            lpData: frame.as_ptr() as *mut c_void,
        };
        unsafe {
            let _ = SendMessageW(
                hwnd(target),
                WM_COPYDATA,
                WPARAM(from.0 as usize),
                LPARAM(&data as *const COPYDATASTRUCT as isize),
            );
        }
    }

    fn grant_app_container_access(&self, path: &Path) -> std::result::Result<(), Diagnostic> {
        let name = HSTRING::from(path.as_os_str());
        unsafe {
            let mut old_dacl: *mut ACL = std::ptr::null_mut();
            let mut descriptor = PSECURITY_DESCRIPTOR::default();
            // Missing DACL is fine: SetEntriesInAclW builds a fresh one
            let _ = GetNamedSecurityInfoW(
                &name,
                SE_FILE_OBJECT,
                DACL_SECURITY_INFORMATION,
                None,
                None,
                Some(&mut old_dacl),
                None,
                &mut descriptor,
            );

            let mut sid = PSID::default();
            if ConvertStringSidToSidW(ALL_APP_PACKAGES_SID, &mut sid).is_err() {
                if !descriptor.0.is_null() {
                    let _ = LocalFree(HLOCAL(descriptor.0));
                }
                return Err(Diagnostic::AclSid { code: GetLastError().0 });
            }

            let access = EXPLICIT_ACCESS_W {
                grfAccessPermissions: GENERIC_READ.0 | GENERIC_EXECUTE.0,
                grfAccessMode: SET_ACCESS,
                grfInheritance: SUB_CONTAINERS_AND_OBJECTS_INHERIT,
                Trustee: TRUSTEE_W {
                    TrusteeForm: TRUSTEE_IS_SID,
                    TrusteeType: TRUSTEE_IS_WELL_KNOWN_GROUP,
                    ptstrName: PWSTR(sid.0 as *mut u16),
                    ..Default::default()
                },
            };

            let mut new_dacl: *mut ACL = std::ptr::null_mut();
            let mut status = SetEntriesInAclW(Some(&[access]), Some(old_dacl as *const ACL), &mut new_dacl);
            if status == ERROR_SUCCESS {
                status = SetNamedSecurityInfoW(
                    &name,
                    SE_FILE_OBJECT,
                    DACL_SECURITY_INFORMATION,
                    PSID::default(),
                    PSID::default(),
                    Some(new_dacl as *const ACL),
                    None,
                );
            }

            let _ = LocalFree(HLOCAL(sid.0));
            if !descriptor.0.is_null() {
                let _ = LocalFree(HLOCAL(descriptor.0));
            }
            if !new_dacl.is_null() {
                let _ = LocalFree(HLOCAL(new_dacl as *mut c_void));
            }

            if status == ERROR_SUCCESS {
                Ok(())
            } else {
                Err(Diagnostic::AclUpdate { path: path.to_path_buf(), code: status.0 })
            }
        }
    }
}

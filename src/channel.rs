// tabbridge — Browser Tab Discovery and Diagnostics Proxy Bridge
// Copyright (C) 2026  Martin Gehrken (IamLumae)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Message channel between the bridge and attached proxies.
//!
//! Outbound: [`MessageChannel::send`] frames a string and hands it to the OS
//! synchronously, tagged with the channel's own receiver window so the peer
//! can answer. Inbound: one message-only window on a dedicated thread,
//! created lazily by the first successful attach and alive until process
//! exit. Decoded messages travel over an unbounded queue to a
//! [`Dispatcher`], which the host drives on whatever thread should see the
//! `onMessage` callback.

use std::collections::HashSet;
use std::mem::size_of;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::thread;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::errors::Diagnostic;
use crate::ids::{EndpointId, WindowHandle};
use crate::logging::TextCallback;
use crate::platform::{InboundMessage, InboundSender, Platform};

// ── Framing ─────────────────────────────────────────
// [u32 payload offset][UTF-16 payload, NUL-terminated], native byte order.

pub const HEADER_LEN: usize = size_of::<u32>();

pub fn encode_frame(text: &str) -> Vec<u8> {
    let units: Vec<u16> = text.encode_utf16().chain(std::iter::once(0)).collect();
    let mut frame = Vec::with_capacity(HEADER_LEN + units.len() * 2);
    frame.extend_from_slice(&(HEADER_LEN as u32).to_ne_bytes());
    for unit in units {
        frame.extend_from_slice(&unit.to_ne_bytes());
    }
    frame
}

/// Decode up to the first NUL (or the end of the buffer).
pub fn decode_frame(frame: &[u8]) -> Result<String, Diagnostic> {
    let header: [u8; HEADER_LEN] = frame
        .get(..HEADER_LEN)
        .and_then(|h| h.try_into().ok())
        .ok_or_else(|| Diagnostic::MalformedFrame {
            reason: format!("{} bytes is shorter than the header", frame.len()),
        })?;
    let offset = u32::from_ne_bytes(header) as usize;
    if offset < HEADER_LEN || offset > frame.len() {
        return Err(Diagnostic::MalformedFrame {
            reason: format!("payload offset {} outside frame of {} bytes", offset, frame.len()),
        });
    }

    let units: Vec<u16> = frame[offset..]
        .chunks_exact(2)
        .map(|pair| u16::from_ne_bytes([pair[0], pair[1]]))
        .take_while(|&unit| unit != 0)
        .collect();
    Ok(String::from_utf16_lossy(&units))
}

// ── Receiver + send ─────────────────────────────────

type PeerSet = Arc<Mutex<HashSet<WindowHandle>>>;

pub struct MessageChannel<P: Platform> {
    platform: Arc<P>,
    signature: usize,
    inbound: InboundSender,
    /// Unset while the receiver is uncreated. Read without locking.
    address: OnceLock<WindowHandle>,
    /// Serializes receiver creation only.
    starting: Mutex<()>,
    peers: PeerSet,
}

impl<P: Platform> MessageChannel<P> {
    /// Returns the channel and the receiving half of its inbound queue.
    pub fn new(platform: Arc<P>, signature: usize) -> (Self, mpsc::UnboundedReceiver<InboundMessage>) {
        let (inbound, rx) = mpsc::unbounded_channel();
        let channel = Self {
            platform,
            signature,
            inbound,
            address: OnceLock::new(),
            starting: Mutex::new(()),
            peers: Arc::new(Mutex::new(HashSet::new())),
        };
        (channel, rx)
    }

    /// Own receiver window, once active.
    pub fn address(&self) -> Option<WindowHandle> {
        self.address.get().copied()
    }

    pub fn is_active(&self) -> bool {
        self.address().is_some()
    }

    /// Start the receiver thread on first use and record `peer`. Later calls
    /// only record the peer. A failed start leaves the channel uncreated.
    pub fn ensure_active(&self, peer: EndpointId) -> Result<WindowHandle, Diagnostic> {
        self.peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(peer.handle());

        if let Some(address) = self.address() {
            debug!(event = "bridge.channel.peer_added", peer = %peer);
            return Ok(address);
        }

        let _starting = self.starting.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(address) = self.address() {
            return Ok(address);
        }

        let (ready_tx, ready_rx) = oneshot::channel();
        let platform = Arc::clone(&self.platform);
        let inbound = self.inbound.clone();
        let signature = self.signature;
        thread::Builder::new()
            .name("tabbridge-receiver".to_string())
            .spawn(move || platform.run_receiver(signature, ready_tx, inbound))
            .map_err(|e| Diagnostic::ReceiverUnavailable { message: e.to_string() })?;

        let address = ready_rx.blocking_recv().map_err(|_| Diagnostic::ReceiverUnavailable {
            message: "receiver thread exited before reporting its window".to_string(),
        })??;

        info!(
            event = "bridge.channel.receiver_started",
            address = %address.to_hex(),
            first_peer = %peer
        );
        let _ = self.address.set(address);
        Ok(address)
    }

    /// Fire-and-forget. Delivery to a dead window is not reported.
    pub fn send(&self, target: EndpointId, text: &str) {
        let from = self.address().unwrap_or(WindowHandle::NULL);
        let frame = encode_frame(text);
        debug!(
            event = "bridge.channel.send",
            target = %target,
            bytes = frame.len()
        );
        self.platform
            .send_frame(target.handle(), from, self.signature, &frame);
    }

    pub fn dispatcher(
        &self,
        inbound: mpsc::UnboundedReceiver<InboundMessage>,
        on_message: TextCallback,
    ) -> Dispatcher {
        Dispatcher {
            inbound,
            on_message,
            peers: Arc::clone(&self.peers),
        }
    }
}

// ── Dispatch ────────────────────────────────────────

/// Delivers inbound messages to the `onMessage` callback on the thread that
/// drives it. That thread need not be the one that registered the callback,
/// so `onMessage` must be callable from any thread (`TextCallback` is
/// `Send + Sync`). A host that needs delivery on its own thread calls
/// [`Dispatcher::dispatch_pending`] from there instead of [`Dispatcher::run`].
pub struct Dispatcher {
    inbound: mpsc::UnboundedReceiver<InboundMessage>,
    on_message: TextCallback,
    peers: PeerSet,
}

impl Dispatcher {
    fn deliver(&self, message: InboundMessage) {
        let known = self
            .peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&message.from);
        if !known {
            debug!(
                event = "bridge.channel.untracked_sender",
                from = %message.from.to_hex()
            );
        }
        (self.on_message)(&message.text);
    }

    /// Deliver everything queued right now without blocking.
    pub fn dispatch_pending(&mut self) -> usize {
        let mut delivered = 0;
        while let Ok(message) = self.inbound.try_recv() {
            self.deliver(message);
            delivered += 1;
        }
        delivered
    }

    /// Block and deliver for the rest of the process.
    pub fn run(mut self) {
        while let Some(message) = self.inbound.blocking_recv() {
            self.deliver(message);
        }
    }
}

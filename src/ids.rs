// tabbridge — Browser Tab Discovery and Diagnostics Proxy Bridge
// Copyright (C) 2026  Martin Gehrken (IamLumae)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Window handles and the two identifier spaces built on them.
//!
//! A [`TabId`] names a tab render surface found by discovery. An
//! [`EndpointId`] names the receiver window of an attached proxy. Both render
//! as the same pointer-width hex text at the host boundary, but they are
//! different types so one cannot be passed where the other is expected.

use std::fmt;
use std::str::FromStr;

use crate::errors::Diagnostic;

const HEX_WIDTH: usize = std::mem::size_of::<usize>() * 2;

/// Raw OS window handle value. Never owned; may go stale between calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct WindowHandle(pub isize);

impl WindowHandle {
    pub const NULL: WindowHandle = WindowHandle(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// `%p`-style text: zero-padded, uppercase, pointer width.
    pub fn to_hex(self) -> String {
        format!("{:0width$X}", self.0 as usize, width = HEX_WIDTH)
    }

    /// Accepts surrounding whitespace, an optional `0x`, and either case.
    pub fn from_hex(text: &str) -> Result<Self, Diagnostic> {
        let trimmed = text.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        if digits.is_empty() {
            return Err(Diagnostic::MalformedId { id: text.to_string() });
        }
        usize::from_str_radix(digits, 16)
            .map(|raw| WindowHandle(raw as isize))
            .map_err(|_| Diagnostic::MalformedId { id: text.to_string() })
    }
}

macro_rules! handle_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(WindowHandle);

        impl $name {
            pub fn new(handle: WindowHandle) -> Self {
                Self(handle)
            }

            pub fn handle(self) -> WindowHandle {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0.to_hex())
            }
        }

        impl FromStr for $name {
            type Err = Diagnostic;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                WindowHandle::from_hex(s).map(Self)
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }
    };
}

handle_id!(
    /// A tab render surface as reported by `list_instances`.
    TabId
);

handle_id!(
    /// The receiver window of an attached proxy.
    EndpointId
);

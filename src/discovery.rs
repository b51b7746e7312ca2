// tabbridge — Browser Tab Discovery and Diagnostics Proxy Bridge
// Copyright (C) 2026  Martin Gehrken (IamLumae)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use serde::Serialize;
use tracing::{debug, info};

use crate::config::BridgeConfig;
use crate::ids::{TabId, WindowHandle};
use crate::platform::Platform;

/// One tab surface found by a discovery pass. Not cached anywhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub id: TabId,
    pub url: String,
    pub title: String,
    pub process_name: String,
}

// ── Window Enumerator ───────────────────────────────

/// Fresh walk over the descendants of every top-level window. Each top-level
/// window's subtree is only collected when the iterator reaches it.
pub fn enumerate<'a, P, F>(platform: &'a P, predicate: F) -> impl Iterator<Item = WindowHandle> + 'a
where
    P: Platform,
    F: Fn(WindowHandle) -> bool + 'a,
{
    platform
        .top_level_windows()
        .into_iter()
        .flat_map(move |top| platform.child_windows(top))
        .filter(move |&hwnd| predicate(hwnd))
}

// ── Instance Resolver ───────────────────────────────

/// Case-insensitive suffix match of a full image path.
pub fn is_content_process(image_path: &str, expected: &str) -> bool {
    image_path
        .to_lowercase()
        .ends_with(&expected.to_lowercase())
}

/// Last path component, accepting either separator.
pub fn file_name_of(path: &str) -> &str {
    path.rsplit(['\\', '/']).next().unwrap_or(path)
}

/// Whether `hwnd` still is a tab surface: the configured class, owned by the
/// content process.
pub fn is_tab_surface<P: Platform>(platform: &P, config: &BridgeConfig, hwnd: WindowHandle) -> bool {
    platform.class_name(hwnd).as_deref() == Some(config.tab_window_class.as_str())
        && platform
            .process_image_path(hwnd)
            .is_ok_and(|image| is_content_process(&image, &config.content_process_image))
}

pub fn resolve_instances<P: Platform>(platform: &P, config: &BridgeConfig) -> Vec<Instance> {
    let class = config.tab_window_class.as_str();
    let candidates = enumerate(platform, |hwnd| {
        platform.class_name(hwnd).as_deref() == Some(class)
    });

    let mut instances = Vec::new();
    for hwnd in candidates {
        let image = match platform.process_image_path(hwnd) {
            Ok(path) => path,
            Err(e) => {
                debug!(event = "bridge.discovery.process_skipped", window = %hwnd.to_hex(), error = %e);
                continue;
            }
        };
        if !is_content_process(&image, &config.content_process_image) {
            debug!(event = "bridge.discovery.foreign_process", window = %hwnd.to_hex(), image = %image);
            continue;
        }

        let document = match platform.document(hwnd) {
            Ok(doc) => doc,
            Err(e) => {
                debug!(event = "bridge.discovery.document_skipped", window = %hwnd.to_hex(), error = %e);
                continue;
            }
        };

        instances.push(Instance {
            id: TabId::new(hwnd),
            url: platform
                .document_url(&document)
                .unwrap_or_else(|| "unknown".to_string()),
            title: platform.document_title(&document).unwrap_or_default(),
            process_name: file_name_of(&image).to_string(),
        });
    }

    info!(event = "bridge.discovery.completed", count = instances.len());
    instances
}

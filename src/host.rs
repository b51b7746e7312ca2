// tabbridge — Browser Tab Discovery and Diagnostics Proxy Bridge
// Copyright (C) 2026  Martin Gehrken (IamLumae)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Loosely typed host boundary: operation name + JSON argument list in,
//! JSON value out. Shape errors are the only hard failures here.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bridge::Bridge;
use crate::errors::BridgeError;
use crate::ids::{EndpointId, TabId};
use crate::platform::Platform;

const LIST_USAGE: &str =
    "listInstances(): { id: string, url: string, title: string, processName: string }[]";
const HARDEN_USAGE: &str = "hardenModuleAcl(filePath: string): boolean";
const ATTACH_USAGE: &str = "attach(id: string): string";
const INJECT_USAGE: &str =
    "injectScript(endpointId: string, engine: string, filename: string, script: string): void";
const SEND_USAGE: &str = "sendRaw(endpointId: string, message: string): void";

/// One line of the `serve` protocol.
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: Value,
    pub op: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Response {
    Success { id: Value, result: Value },
    Failure { id: Value, error: String, code: &'static str },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum Event<'a> {
    Message(&'a str),
    Log(&'a str),
}

/// The first `N` arguments as strings. Extra trailing arguments are ignored.
fn strings<'a, const N: usize>(args: &'a [Value], usage: &'static str) -> Result<[&'a str; N], BridgeError> {
    let mut out = [""; N];
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = args
            .get(i)
            .and_then(Value::as_str)
            .ok_or(BridgeError::InvalidArgument { usage })?;
    }
    Ok(out)
}

pub fn dispatch<P: Platform>(bridge: &Bridge<P>, op: &str, args: &[Value]) -> Result<Value, BridgeError> {
    if !bridge.is_initialized() {
        return Err(BridgeError::NotInitialized);
    }

    match op {
        "listInstances" => {
            if !args.is_empty() {
                return Err(BridgeError::InvalidArgument { usage: LIST_USAGE });
            }
            let instances = bridge.list_instances()?;
            Ok(serde_json::to_value(instances).unwrap_or(Value::Null))
        }
        "hardenModuleAcl" => {
            let [path] = strings::<1>(args, HARDEN_USAGE)?;
            Ok(Value::Bool(bridge.harden_module_acl(Path::new(path))?))
        }
        "attach" => {
            let [id] = strings::<1>(args, ATTACH_USAGE)?;
            let tab: TabId = match id.parse() {
                Ok(tab) => tab,
                Err(d) => {
                    bridge.report(&d)?;
                    return Ok(Value::Null);
                }
            };
            Ok(bridge
                .attach(tab)?
                .map(|endpoint| Value::String(endpoint.to_string()))
                .unwrap_or(Value::Null))
        }
        "injectScript" => {
            let [id, engine, filename, script] = strings::<4>(args, INJECT_USAGE)?;
            match id.parse::<EndpointId>() {
                Ok(endpoint) => bridge.inject_script(endpoint, engine, filename, script)?,
                Err(d) => bridge.report(&d)?,
            }
            Ok(Value::Null)
        }
        "sendRaw" => {
            let [id, message] = strings::<2>(args, SEND_USAGE)?;
            match id.parse::<EndpointId>() {
                Ok(endpoint) => bridge.send_raw(endpoint, message)?,
                Err(d) => bridge.report(&d)?,
            }
            Ok(Value::Null)
        }
        other => Err(BridgeError::UnknownOperation { op: other.to_string() }),
    }
}

pub fn handle<P: Platform>(bridge: &Bridge<P>, request: &Request) -> Response {
    match dispatch(bridge, &request.op, &request.args) {
        Ok(result) => Response::Success { id: request.id.clone(), result },
        Err(e) => Response::Failure {
            id: request.id.clone(),
            error: e.to_string(),
            code: e.error_code(),
        },
    }
}

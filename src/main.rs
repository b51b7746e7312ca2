// tabbridge — Browser Tab Discovery and Diagnostics Proxy Bridge
// Copyright (C) 2026  Martin Gehrken (IamLumae)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// SPDX-License-Identifier: AGPL-3.0-or-later

#![cfg_attr(not(windows), allow(dead_code))]

use std::error::Error;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use clap::{Arg, ArgAction, ArgMatches, Command};
use tracing::{error, info};

use tabbridge::config::{load_config_file, load_for_root};
use tabbridge::host::{handle, Event, Request, Response};
use tabbridge::{init_logging, Bridge, BridgeConfig, Platform, TabId, TextCallback};

fn build_cli() -> Command {
    Command::new("tabbridge")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Discover browser tabs and attach a diagnostics proxy to them")
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging output")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .arg(
            Arg::new("root")
                .long("root")
                .help("Directory the companion module path is resolved against (default: executable folder)")
                .value_parser(clap::value_parser!(PathBuf))
                .global(true),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .help("Configuration file (default: <root>/tabbridge.toml when present)")
                .value_parser(clap::value_parser!(PathBuf))
                .global(true),
        )
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("list").about("List attachable browser tabs").arg(
                Arg::new("json")
                    .long("json")
                    .help("Output in JSON format")
                    .action(ArgAction::SetTrue),
            ),
        )
        .subcommand(
            Command::new("attach")
                .about("Attach to a tab, then relay stdin lines to the proxy and print its replies")
                .arg(Arg::new("id").required(true).help("Tab id as printed by `list`")),
        )
        .subcommand(
            Command::new("harden")
                .about("Grant sandboxed tab processes read/execute on a module")
                .arg(
                    Arg::new("path")
                        .required(true)
                        .value_parser(clap::value_parser!(PathBuf)),
                ),
        )
        .subcommand(
            Command::new("serve")
                .about("Speak JSON lines on stdin/stdout (one request per line, events interleaved)"),
        )
}

fn default_root() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn load_config(matches: &ArgMatches, root: &Path) -> Result<BridgeConfig, Box<dyn Error>> {
    let config = match matches.get_one::<PathBuf>("config") {
        Some(path) => load_config_file(path),
        None => load_for_root(root),
    };
    config.map_err(|e| {
        error!(event = "cli.config_failed", code = e.error_code(), error = %e);
        e.into()
    })
}

fn print_line(line: &str) {
    let mut out = io::stdout().lock();
    let _ = writeln!(out, "{}", line);
    let _ = out.flush();
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => print_line(&line),
        Err(e) => error!(event = "cli.serialize_failed", error = %e),
    }
}

fn stderr_log() -> TextCallback {
    Arc::new(|line: &str| eprintln!("{}", line))
}

// ── Commands ────────────────────────────────────────

fn cmd_list<P: Platform>(bridge: &Bridge<P>, json: bool) -> Result<(), Box<dyn Error>> {
    let instances = bridge.list_instances()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&instances)?);
        return Ok(());
    }
    if instances.is_empty() {
        println!("No browser tabs found.");
        return Ok(());
    }
    for i in &instances {
        println!("{}  {}  {}  {}", i.id, i.process_name, i.url, i.title);
    }
    Ok(())
}

fn cmd_attach<P: Platform>(bridge: &Bridge<P>, id: &str) -> Result<(), Box<dyn Error>> {
    let tab: TabId = match id.parse() {
        Ok(tab) => tab,
        Err(d) => {
            bridge.report(&d)?;
            std::process::exit(1);
        }
    };
    let Some(endpoint) = bridge.attach(tab)? else {
        std::process::exit(1);
    };
    info!(event = "cli.attached", tab = %tab, endpoint = %endpoint);
    eprintln!("attached: {}", endpoint);

    if let Some(dispatcher) = bridge.take_dispatcher()? {
        thread::spawn(move || dispatcher.run());
    }
    for line in io::stdin().lock().lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        bridge.send_raw(endpoint, &line)?;
    }
    Ok(())
}

fn cmd_harden<P: Platform>(bridge: &Bridge<P>, path: &Path) -> Result<(), Box<dyn Error>> {
    if bridge.harden_module_acl(path)? {
        println!("ACL updated: {}", path.display());
        Ok(())
    } else {
        std::process::exit(1);
    }
}

fn cmd_serve<P: Platform>(bridge: &Bridge<P>) -> Result<(), Box<dyn Error>> {
    if let Some(dispatcher) = bridge.take_dispatcher()? {
        thread::spawn(move || dispatcher.run());
    }
    info!(event = "cli.serve_started");

    // Requests are handled on this thread; it owns the COM apartment.
    for line in io::stdin().lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => handle(bridge, &request),
            Err(e) => Response::Failure {
                id: serde_json::Value::Null,
                error: format!("Malformed request: {}", e),
                code: "MALFORMED_REQUEST",
            },
        };
        print_json(&response);
    }
    info!(event = "cli.serve_finished");
    Ok(())
}

fn run<P: Platform>(platform: P, matches: &ArgMatches) -> Result<(), Box<dyn Error>> {
    let root = matches
        .get_one::<PathBuf>("root")
        .cloned()
        .unwrap_or_else(default_root);
    let config = load_config(matches, &root)?;
    let bridge = Bridge::new(platform, config);

    let serving = matches.subcommand_name() == Some("serve");
    let on_message: TextCallback = if serving {
        Arc::new(|text: &str| print_json(&Event::Message(text)))
    } else {
        Arc::new(|text: &str| print_line(text))
    };
    let on_log: TextCallback = if serving {
        Arc::new(|text: &str| print_json(&Event::Log(text)))
    } else {
        stderr_log()
    };
    bridge.initialize(root, on_message, on_log)?;

    match matches.subcommand() {
        Some(("list", sub)) => cmd_list(&bridge, sub.get_flag("json")),
        Some(("attach", sub)) => {
            let id = sub.get_one::<String>("id").map(String::as_str).unwrap_or_default();
            cmd_attach(&bridge, id)
        }
        Some(("harden", sub)) => match sub.get_one::<PathBuf>("path") {
            Some(path) => cmd_harden(&bridge, path),
            None => Err("missing path".into()),
        },
        Some(("serve", _)) => cmd_serve(&bridge),
        _ => Err("unknown command".into()),
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let matches = build_cli().get_matches();
    init_logging(!matches.get_flag("verbose"));

    #[cfg(windows)]
    {
        run(tabbridge::NativePlatform::default(), &matches)
    }

    #[cfg(not(windows))]
    {
        error!(event = "cli.unsupported_platform", os = std::env::consts::OS);
        Err("tabbridge talks to Windows browser tabs and only runs on Windows".into())
    }
}

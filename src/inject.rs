// tabbridge — Browser Tab Discovery and Diagnostics Proxy Bridge
// Copyright (C) 2026  Martin Gehrken (IamLumae)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// SPDX-License-Identifier: AGPL-3.0-or-later

/// `inject:<engine>:<filename>:<script>`. Colons inside fields are not
/// escaped; the proxy splits on the first three.
pub fn inject_command(engine: &str, filename: &str, script: &str) -> String {
    format!("inject:{}:{}:{}", engine, filename, script)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_layout() {
        assert_eq!(inject_command("js", "f.js", "1+1"), "inject:js:f.js:1+1");
    }

    #[test]
    fn colons_pass_through_unescaped() {
        assert_eq!(
            inject_command("js", "c:\\x.js", "a ? b : c"),
            "inject:js:c:\\x.js:a ? b : c"
        );
        assert_eq!(inject_command("", "", ""), "inject:::");
    }
}

//! Loader script generation
//!
//! The remote host is assumed to have nothing installed for tether, only a
//! POSIX shell and base utilities. The loader is a small `sh` program that
//! travels as the transport's command argument. Once running it:
//!
//! 1. checks the tools it needs and creates a private staging directory
//! 2. prints the handshake signature, before reading any input
//! 3. for each manifest entry, reads exactly the declared number of bytes
//!    from stdin (`dd bs=1` never reads past the count), inflates them with
//!    `gzip -dc` into the staging directory and marks the result executable
//! 4. runs the last module with the session key and peer label in its
//!    environment and its stdin/stdout still attached to the transport
//!
//! Module lengths live in the script text, so the data stream carries no
//! length headers at all.

use std::fmt;

use crate::package::Manifest;
use crate::secret::{HandshakeSignature, SessionKey};

/// Environment variable carrying the session key to the entry point
pub const KEY_ENV: &str = "TETHER_SESSION_KEY";

/// Environment variable carrying the peer label to the entry point
pub const PEER_ENV: &str = "TETHER_PEER";

/// Environment variable naming the remote staging directory
pub const STAGE_ENV: &str = "TETHER_STAGE";

/// Tools the loader needs on the remote host
pub const REQUIRED_TOOLS: &[&str] = &["dd", "gzip", "mktemp", "chmod", "rm"];

/// Exit status of the loader when a required tool is missing
pub const MISSING_TOOL_STATUS: i32 = 127;

/// Exit status of the loader when it is interrupted by a signal
pub const SIGNALLED_STATUS: i32 = 129;

/// Inputs for one loader script
#[derive(Debug, Clone, Copy)]
pub struct LoaderSpec<'a> {
    /// Signature the loader prints first
    pub signature: &'a HandshakeSignature,
    /// Key handed to the entry point
    pub key: &'a SessionKey,
    /// Modules to receive, in order; the last one is the entry point
    pub manifest: &'a Manifest,
    /// Arguments for the entry point
    pub entry_args: &'a [String],
}

/// A generated loader program
#[derive(Clone)]
pub struct LoaderScript {
    text: String,
    signature: HandshakeSignature,
    manifest: Manifest,
}

impl LoaderScript {
    /// Generate the loader for one bootstrap attempt
    pub fn generate(spec: LoaderSpec<'_>) -> Self {
        let mut lines: Vec<String> = Vec::new();

        lines.push("set -u".to_string());
        lines.push(format!(
            "for t in {}; do command -v \"$t\" >/dev/null 2>&1 || {{ echo \"tether: missing $t\" >&2; exit {}; }}; done",
            REQUIRED_TOOLS.join(" "),
            MISSING_TOOL_STATUS
        ));
        lines.push(
            "d=$(mktemp -d \"${TMPDIR:-/tmp}/tether.XXXXXX\") || { echo \"tether: cannot create staging directory\" >&2; exit 1; }"
                .to_string(),
        );
        lines.push("trap 'rm -rf \"$d\"' EXIT".to_string());
        lines.push(format!("trap 'exit {}' HUP INT TERM", SIGNALLED_STATUS));
        lines.push(format!("printf '%s' {}", shell_quote(spec.signature.as_str())));
        lines.push(
            "r() { dd bs=1 count=\"$2\" 2>/dev/null | gzip -dc > \"$d/$1\" && chmod 700 \"$d/$1\"; }"
                .to_string(),
        );
        for entry in spec.manifest.entries() {
            lines.push(format!(
                "r {} {} || {{ echo \"tether: failed to load {}\" >&2; exit 1; }}",
                entry.name, entry.length, entry.name
            ));
        }
        lines.push("PATH=\"$d:$PATH\"; export PATH".to_string());
        lines.push(
            "p=local; if [ -n \"${SSH_CONNECTION:-}\" ]; then set -- $SSH_CONNECTION; p=\"$1:$2\"; fi"
                .to_string(),
        );

        let mut entry = format!(
            "{}={} {}=\"$p\" {}=\"$d\" \"$d/{}\"",
            KEY_ENV,
            shell_quote(spec.key.expose()),
            PEER_ENV,
            STAGE_ENV,
            spec.manifest.entry_point().name
        );
        for arg in spec.entry_args {
            entry.push(' ');
            entry.push_str(&shell_quote(arg));
        }
        lines.push(entry);
        lines.push("s=$?; rm -rf \"$d\"; trap - EXIT; exit $s".to_string());

        let mut text = lines.join("\n");
        text.push('\n');

        Self {
            text,
            signature: spec.signature.clone(),
            manifest: spec.manifest.clone(),
        }
    }

    /// The script text, for `sh -c`
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The signature this script prints first
    pub fn signature(&self) -> &HandshakeSignature {
        &self.signature
    }

    /// The manifest this script reads
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Command string for a remote login shell: `sh -c '<script>'`
    pub fn remote_command(&self) -> String {
        format!("sh -c {}", shell_quote(&self.text))
    }
}

impl fmt::Debug for LoaderScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The text embeds the session key
        f.debug_struct("LoaderScript")
            .field("signature", &self.signature)
            .field("manifest", &self.manifest)
            .field("text_len", &self.text.len())
            .finish()
    }
}

/// Quote a string as a single POSIX shell word
pub fn shell_quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}

//! Artifact key utilities.

use sha2::{Digest, Sha256};
use shipyard_core::artifact::ArtifactKey;
use shipyard_core::run::MatrixBinding;
use std::fmt::Write;
use std::path::PathBuf;

/// Hex-encoded SHA-256 of the content.
pub fn content_digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Escape one path component so distinct inputs never share a filename.
///
/// ASCII alphanumerics, `-`, `_` and `.` pass through; every other byte
/// becomes `%XX`. `.`, `..` and the empty string are fully escaped so the
/// result is always a plain file name.
pub fn escape_component(raw: &str) -> String {
    if raw.is_empty() {
        return "%".to_string();
    }
    let keep_dots = raw != "." && raw != "..";
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' => out.push(byte as char),
            b'.' if keep_dots => out.push('.'),
            _ => {
                let _ = write!(out, "%{:02X}", byte);
            }
        }
    }
    out
}

/// Directory name for a binding: `os=linux,toolchain=stable`, or `default`
/// when empty. Axis names and values are escaped, so `=` and `,` only ever
/// appear as separators.
pub fn binding_component(binding: &MatrixBinding) -> String {
    if binding.is_empty() {
        return "default".to_string();
    }
    binding
        .iter()
        .map(|(axis, value)| format!("{}={}", escape_component(axis), escape_component(value)))
        .collect::<Vec<_>>()
        .join(",")
}

/// Relative on-disk location: `<group>/<binding>/<name>`.
pub fn storage_path(key: &ArtifactKey) -> PathBuf {
    PathBuf::from(escape_component(&key.group))
        .join(binding_component(&key.binding))
        .join(escape_component(&key.name))
}

use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::Utc;
use regex::Regex;

/// Marker carried by every file the relay writes before it is final.
pub const TEMP_MARKER: &str = ".__vidrelay_tmp__";

pub fn is_internal_temp(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().contains(TEMP_MARKER))
        .unwrap_or(false)
}

pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2}{}", UNITS[unit])
}

fn unsafe_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\w\-.]+").expect("static regex"))
}

fn non_tag_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^A-Za-z0-9_]").expect("static regex"))
}

/// File-system safe label, at most 180 characters.
pub fn safe_name(raw: &str) -> String {
    let cleaned = unsafe_chars().replace_all(raw.trim(), "_");
    cleaned.chars().take(180).collect()
}

pub fn sanitize_hashtag(raw: &str) -> String {
    let base = raw.replace(' ', "_");
    let base = non_tag_chars().replace_all(&base, "");
    if base.is_empty() {
        "#NoFolder".to_string()
    } else {
        format!("#{base}")
    }
}

/// Returns `candidate` when it is free, otherwise a timestamp-suffixed sibling.
pub fn unique_path(candidate: &Path) -> PathBuf {
    if !candidate.exists() {
        return candidate.to_path_buf();
    }
    let stem = candidate
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let ext = candidate
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let stamp = Utc::now().timestamp();
    let mut attempt = 0u32;
    loop {
        let name = if attempt == 0 {
            format!("{stem}__fixed_{stamp}{ext}")
        } else {
            format!("{stem}__fixed_{stamp}_{attempt}{ext}")
        };
        let next = candidate.with_file_name(name);
        if !next.exists() {
            return next;
        }
        attempt += 1;
    }
}

/// Renames, falling back to copy and remove across file systems.
pub fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent)?;
    }
    match std::fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            std::fs::copy(from, to)?;
            std::fs::remove_file(from)
        }
    }
}

/// Canonical form when the path exists, otherwise the path unchanged.
pub fn canonical_or_self(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

pub fn non_empty_file(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.len() > 0)
        .unwrap_or(false)
}

pub fn remove_if_exists(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

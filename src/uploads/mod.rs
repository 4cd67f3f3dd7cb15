//! Upload storage for client documents.
//!
//! Stored names are flat (no subdirectories): every row in
//! `client_documents` points at a single file directly under the uploads
//! root. The guard here owns filesystem hygiene — name shape,
//! normalization, traversal prevention, byte-length limits — while the
//! database enforces uniqueness and nullability.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;
use walkdir::WalkDir;

use crate::{AppError, AppResult};

pub mod reconcile;

pub const ERR_FILENAME_INVALID: &str = "FILENAME/INVALID";
pub const ERR_FILENAME_TOO_LONG: &str = "FILENAME/TOO_LONG";
pub const ERR_FILENAME_SYMLINK: &str = "FILENAME/SYMLINK";

pub const MAX_NAME_BYTES: usize = 255;

static STAMP_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{8}_\d{6}").expect("stamp regex"));

/// One file in the uploads inventory.
#[derive(Debug, Clone, serde::Serialize)]
pub struct UploadEntry {
    pub name: String,
    pub size_bytes: i64,
    pub modified_at: i64,
}

#[derive(Debug, Clone)]
pub struct UploadStore {
    root: Arc<PathBuf>,
}

impl UploadStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Arc::new(root.into()),
        }
    }

    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    pub fn ensure_root(&self) -> AppResult<()> {
        fs::create_dir_all(self.root.as_path())
            .map_err(|err| AppError::from(err).with_context("operation", "uploads_ensure_root"))
    }

    /// Validate a stored name and return its NFC-normalized form.
    ///
    /// Rejects anything that could leave the uploads root or misbehave on
    /// another platform: separators, traversal, absolute paths, control and
    /// path-hostile characters, reserved Windows names, trailing dot or
    /// space, and components over [`MAX_NAME_BYTES`].
    pub fn check_name(&self, name: &str) -> AppResult<String> {
        if name.is_empty() {
            return Err(self.deny(name, ERR_FILENAME_INVALID, "empty name"));
        }
        if is_windows_drive(name) || name.starts_with('/') || name.starts_with('\\') {
            return Err(self.deny(name, ERR_FILENAME_INVALID, "absolute path"));
        }
        if name.contains('/') || name.contains('\\') {
            return Err(self.deny(name, ERR_FILENAME_INVALID, "path separator"));
        }
        if name == "." || name == ".." {
            return Err(self.deny(name, ERR_FILENAME_INVALID, "traversal segment"));
        }

        let segment: String = name.nfc().collect();
        if segment.as_bytes().len() > MAX_NAME_BYTES {
            return Err(self.deny(name, ERR_FILENAME_TOO_LONG, "component too long"));
        }
        if segment.trim_end_matches([' ', '.']).len() != segment.len() {
            return Err(self.deny(name, ERR_FILENAME_INVALID, "trailing dot or space"));
        }
        if segment
            .chars()
            .any(|c| c.is_control() || matches!(c, '<' | '>' | ':' | '"' | '|' | '?' | '*'))
        {
            return Err(self.deny(name, ERR_FILENAME_INVALID, "unsupported character"));
        }
        if is_reserved_windows_name(&segment) {
            return Err(self.deny(name, ERR_FILENAME_INVALID, "reserved name"));
        }

        Ok(segment)
    }

    /// Resolve a stored name to its absolute path inside the root.
    ///
    /// The file does not have to exist yet; existing symlinks are refused.
    pub fn resolve(&self, name: &str) -> AppResult<PathBuf> {
        let normalized = self.check_name(name)?;
        let full = self.root.join(&normalized);
        if !full.starts_with(self.root.as_path()) {
            return Err(self.deny(name, ERR_FILENAME_INVALID, "joined path escaped root"));
        }
        match fs::symlink_metadata(&full) {
            Ok(meta) if meta.file_type().is_symlink() => {
                Err(self.deny(name, ERR_FILENAME_SYMLINK, "symlink encountered"))
            }
            _ => Ok(full),
        }
    }

    /// Single-level inventory of the uploads root, sorted by name.
    ///
    /// Subdirectories, dotfiles, and symlinks are skipped.
    pub fn list(&self) -> AppResult<Vec<UploadEntry>> {
        let mut entries = Vec::new();
        if !self.root.exists() {
            return Ok(entries);
        }
        for entry in WalkDir::new(self.root.as_path())
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|err| {
                AppError::from(std::io::Error::from(err))
                    .with_context("operation", "uploads_list")
            })?;
            if entry.file_type().is_dir() || entry.path_is_symlink() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let meta = entry.metadata().map_err(|err| {
                AppError::from(std::io::Error::from(err))
                    .with_context("operation", "uploads_list")
                    .with_context("name", name.clone())
            })?;
            let modified_at = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as i64)
                .unwrap_or_default();
            entries.push(UploadEntry {
                name,
                size_bytes: meta.len() as i64,
                modified_at,
            });
        }
        Ok(entries)
    }

    fn deny(&self, attempted: &str, code: &'static str, reason: &'static str) -> AppError {
        tracing::warn!(
            target: "lawdesk",
            event = "upload_guard_deny",
            code,
            reason,
            name = attempted,
        );
        let message = match code {
            ERR_FILENAME_TOO_LONG => "File name is too long.",
            ERR_FILENAME_SYMLINK => "File paths cannot traverse through symlinks.",
            _ => "File name is not allowed.",
        };
        AppError::new(code, message)
            .with_context("name", attempted.to_string())
            .with_context("reason", reason.to_string())
    }
}

/// Reduce an original filename to a safe stored form.
///
/// NFC-normalizes, collapses whitespace runs to `_`, and strips control and
/// path-hostile characters while keeping non-ASCII letters intact (client
/// paperwork is frequently named in Arabic).
pub fn sanitize_name(original: &str) -> String {
    let normalized: String = original.nfc().collect();
    let mut out = String::with_capacity(normalized.len());
    let mut last_was_sep = false;
    for ch in normalized.chars() {
        if ch.is_whitespace() {
            if !last_was_sep && !out.is_empty() {
                out.push('_');
                last_was_sep = true;
            }
            continue;
        }
        if ch.is_control()
            || matches!(ch, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*')
        {
            continue;
        }
        out.push(ch);
        last_was_sep = false;
    }
    let trimmed = out
        .trim_start_matches('.')
        .trim_end_matches([' ', '.', '_'])
        .to_string();
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed
    }
}

/// Build the canonical stored name for a fresh upload:
/// `YYYYMMDD_HHMMSS_<sanitized original>`.
pub fn stamped_name(original: &str, now_ms: i64) -> String {
    format!("{}_{}", crate::time::stamp(now_ms), sanitize_name(original))
}

/// Extract the leading `YYYYMMDD_HHMMSS` stamp from a stored name, if any.
pub fn stamp_of(name: &str) -> Option<&str> {
    STAMP_RE.find(name).map(|m| m.as_str())
}

/// Guess a MIME type from a stored name's extension.
pub fn mime_for(name: &str) -> String {
    mime_guess::from_path(name)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

fn is_windows_drive(candidate: &str) -> bool {
    let bytes = candidate.as_bytes();
    if bytes.len() < 2 {
        return false;
    }
    let drive = bytes[0] as char;
    bytes[1] == b':' && drive.is_ascii_alphabetic()
}

fn is_reserved_windows_name(segment: &str) -> bool {
    const RESERVED: [&str; 22] = [
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
        "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];
    RESERVED
        .iter()
        .any(|name| segment.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn resolves_inside_root() {
        let dir = tempdir().expect("tempdir");
        let store = UploadStore::new(dir.path());
        let path = store
            .resolve("20240101_120000_contract.pdf")
            .expect("resolve stored name");
        assert!(path.starts_with(dir.path()));
        assert!(path.ends_with("20240101_120000_contract.pdf"));
    }

    #[test]
    fn rejects_separators_and_traversal() {
        let dir = tempdir().expect("tempdir");
        let store = UploadStore::new(dir.path());
        for name in ["../escape.pdf", "a/b.pdf", "a\\b.pdf", "..", "."] {
            let err = store.resolve(name).expect_err("name rejected");
            assert_eq!(err.code(), ERR_FILENAME_INVALID, "name: {name}");
        }
    }

    #[test]
    fn rejects_absolute_path() {
        let dir = tempdir().expect("tempdir");
        let store = UploadStore::new(dir.path());
        let err = store.resolve("/etc/passwd").expect_err("absolute rejected");
        assert_eq!(err.code(), ERR_FILENAME_INVALID);
        let err = store.resolve("C:file.pdf").expect_err("drive rejected");
        assert_eq!(err.code(), ERR_FILENAME_INVALID);
    }

    #[test]
    fn rejects_reserved_name() {
        let dir = tempdir().expect("tempdir");
        let store = UploadStore::new(dir.path());
        let err = store.resolve("CON").expect_err("reserved rejected");
        assert_eq!(err.code(), ERR_FILENAME_INVALID);
    }

    #[test]
    fn rejects_long_component() {
        let dir = tempdir().expect("tempdir");
        let store = UploadStore::new(dir.path());
        let long = "a".repeat(MAX_NAME_BYTES + 1);
        let err = store.resolve(&long).expect_err("long name rejected");
        assert_eq!(err.code(), ERR_FILENAME_TOO_LONG);
    }

    #[test]
    fn rejects_trailing_dot_or_space() {
        let dir = tempdir().expect("tempdir");
        let store = UploadStore::new(dir.path());
        for name in ["report.pdf.", "report.pdf "] {
            let err = store.resolve(name).expect_err("trailing rejected");
            assert_eq!(err.code(), ERR_FILENAME_INVALID, "name: {name}");
        }
    }

    #[cfg(unix)]
    #[test]
    fn rejects_symlink_entry() {
        use std::os::unix::fs::symlink;

        let dir = tempdir().expect("tempdir");
        let target = dir.path().join("target.pdf");
        std::fs::write(&target, b"data").expect("write target");
        let link = dir.path().join("alias.pdf");
        symlink(&target, &link).expect("create symlink");

        let store = UploadStore::new(dir.path());
        let err = store.resolve("alias.pdf").expect_err("symlink rejected");
        assert_eq!(err.code(), ERR_FILENAME_SYMLINK);
    }

    #[test]
    fn sanitize_flattens_whitespace_and_hostile_chars() {
        assert_eq!(sanitize_name("my  contract draft.pdf"), "my_contract_draft.pdf");
        assert_eq!(sanitize_name("a<b>c:d.txt"), "abcd.txt");
        assert_eq!(sanitize_name("عقد إيجار 2024.pdf"), "عقد_إيجار_2024.pdf");
        assert_eq!(sanitize_name(".hidden"), "hidden");
        assert_eq!(sanitize_name("<>:*"), "file");
    }

    #[test]
    fn stamped_name_carries_a_parsable_stamp() {
        // 2024-01-15 10:30:45 UTC
        let ms = 1_705_314_645_000;
        let name = stamped_name("contract.pdf", ms);
        assert_eq!(name, "20240115_103045_contract.pdf");
        assert_eq!(stamp_of(&name), Some("20240115_103045"));
        assert_eq!(stamp_of("contract.pdf"), None);
    }

    #[test]
    fn list_skips_hidden_files_and_directories() {
        let dir = tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.pdf"), b"12345").expect("write file");
        std::fs::write(dir.path().join(".hidden"), b"x").expect("write hidden");
        std::fs::create_dir(dir.path().join("nested")).expect("create dir");

        let store = UploadStore::new(dir.path());
        let entries = store.list().expect("list uploads");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "a.pdf");
        assert_eq!(entries[0].size_bytes, 5);
        assert!(entries[0].modified_at > 0);
    }

    #[test]
    fn mime_guess_falls_back_to_octet_stream() {
        assert_eq!(mime_for("a.pdf"), "application/pdf");
        assert_eq!(mime_for("blob"), "application/octet-stream");
    }
}

//! Input validation: make sure a job's input is a readable PDF before any
//! external tool is spawned.
//!
//! Ghostscript happily "converts" a JPEG or an HTML error page into an empty
//! PDF with exit code 0, so the magic bytes are checked here rather than
//! trusting the tools to complain.

use crate::error::RotoError;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Validate that `path` exists, is readable and starts with `%PDF`.
///
/// Returns the canonical path: tools run inside the attempt directory, so
/// relative paths would resolve against the wrong place.
pub fn resolve_input(path: &Path) -> Result<PathBuf, RotoError> {
    let path = path.to_path_buf();

    if !path.exists() {
        return Err(RotoError::InputNotFound { path });
    }
    if path.is_dir() {
        return Err(RotoError::NotAPdf {
            path,
            magic: [0; 4],
        });
    }

    match std::fs::File::open(&path) {
        Ok(mut f) => {
            let mut magic = [0u8; 4];
            let mut read = 0;
            while read < magic.len() {
                match f.read(&mut magic[read..]) {
                    Ok(0) => break,
                    Ok(n) => read += n,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                        return Err(RotoError::PermissionDenied { path });
                    }
                    Err(_) => break,
                }
            }
            if !is_pdf_magic(&magic[..read]) {
                return Err(RotoError::NotAPdf { path, magic });
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(RotoError::PermissionDenied { path });
        }
        Err(_) => {
            return Err(RotoError::InputNotFound { path });
        }
    }

    let path = path.canonicalize().unwrap_or(path);
    debug!("Resolved local PDF: {}", path.display());
    Ok(path)
}

/// `true` when `bytes` begins with the `%PDF` signature.
pub fn is_pdf_magic(bytes: &[u8]) -> bool {
    bytes.len() >= 4 && &bytes[..4] == b"%PDF"
}

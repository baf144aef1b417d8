//! libopus discovery

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

/// Known libopus locations, checked in order
pub const OPUS_LIBRARY_PATHS: [&str; 6] = [
    "libopus.so",
    "/usr/lib/x86_64-linux-gnu/libopus.so",
    "/usr/lib/libopus.so.0",
    "/run/current-system/sw/lib/libopus.so",
    "/opt/homebrew/lib/libopus.dylib",
    "/usr/local/lib/libopus.dylib",
];

/// Directories searched for bare library names
const LIBRARY_DIRS: [&str; 5] = [
    "/usr/lib",
    "/usr/lib/x86_64-linux-gnu",
    "/usr/lib/aarch64-linux-gnu",
    "/usr/local/lib",
    "/lib",
];

/// First libopus found on this machine
pub fn find_library() -> Option<PathBuf> {
    find_in(&OPUS_LIBRARY_PATHS)
}

pub fn is_available() -> bool {
    find_library().is_some()
}

fn find_in(candidates: &[&str]) -> Option<PathBuf> {
    for candidate in candidates {
        if let Some(found) = resolve(candidate) {
            info!(path = %found.display(), "Found Opus library");
            return Some(found);
        }
        debug!(candidate, "Opus library not found");
    }
    warn!("Failed to find the Opus codec in any known location");
    None
}

/// Absolute candidates are checked as-is. Bare names are looked up in the
/// usual library directories, accepting versioned sonames.
fn resolve(candidate: &str) -> Option<PathBuf> {
    let path = Path::new(candidate);
    if path.is_absolute() {
        return path.exists().then(|| path.to_path_buf());
    }

    for dir in LIBRARY_DIRS {
        let exact = Path::new(dir).join(candidate);
        if exact.exists() {
            return Some(exact);
        }
        let Ok(entries) = std::fs::read_dir(dir) else {
            continue;
        };
        let versioned = entries
            .flatten()
            .map(|e| e.path())
            .find(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(&format!("{}.", candidate)))
            });
        if versioned.is_some() {
            return versioned;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_candidates() {
        assert!(find_in(&["/nonexistent/libopus.so", "libdefinitely-not-opus.so"]).is_none());
    }

    #[test]
    fn test_absolute_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let lib = dir.path().join("libopus.so.0");
        std::fs::write(&lib, b"").unwrap();

        let candidate = lib.to_str().unwrap();
        assert_eq!(find_in(&[candidate]), Some(lib.clone()));
    }
}

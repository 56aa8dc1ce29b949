use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// The Finder writes folder icons to a file literally named `"Icon\r"`;
/// archives built on macOS carry them around and no destination wants them.
const FINDER_ICON: &str = "Icon\r";

pub(crate) fn is_ignored(canonical_path: &str) -> bool {
    let basename = canonical_path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(canonical_path);
    basename == FINDER_ICON
}

/// Map a canonical (forward-slash, relative) entry path to a destination
/// path strictly beneath `base`.
///
/// Absolute paths, drive prefixes, and `..` traversal are refused rather
/// than clamped; an archive that needs them is asking to write outside the
/// destination.
pub fn resolve_entry_path(base: &Path, canonical_path: &str) -> Result<PathBuf> {
    let normalized = canonical_path.replace('\\', "/");

    if normalized.starts_with('/') || has_drive_prefix(&normalized) {
        return Err(Error::InvalidPath {
            path: canonical_path.to_string(),
        });
    }

    let mut resolved = base.to_path_buf();
    let mut depth = 0usize;
    for component in normalized.split('/') {
        match component {
            "" | "." => continue,
            ".." => {
                if depth == 0 {
                    return Err(Error::InvalidPath {
                        path: canonical_path.to_string(),
                    });
                }
                depth -= 1;
                resolved.pop();
            }
            normal => {
                depth += 1;
                resolved.push(normal);
            }
        }
    }

    if depth == 0 {
        return Err(Error::InvalidPath {
            path: canonical_path.to_string(),
        });
    }
    Ok(resolved)
}

fn has_drive_prefix(path: &str) -> bool {
    let mut chars = path.chars();
    matches!(
        (chars.next(), chars.next()),
        (Some(c), Some(':')) if c.is_ascii_alphabetic()
    )
}

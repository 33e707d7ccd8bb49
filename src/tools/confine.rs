//! Path confinement for tool arguments.

use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// Folds `.` and `..` without touching the filesystem.
///
/// `..` at the filesystem root stays at the root.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => normalized.push(prefix.as_os_str()),
            Component::RootDir => normalized.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            Component::Normal(part) => normalized.push(part),
        }
    }
    normalized
}

/// Resolves `requested` against `root` and rejects anything outside it.
///
/// `root` must be absolute; `canonical_root` is its symlink-free form. The
/// lexical result must sit under `root`, and the deepest existing ancestor
/// must canonicalize to somewhere under `canonical_root`. A symlink that
/// points nowhere is rejected as well, since writing through it could land
/// anywhere.
pub async fn resolve_confined(
    root: &Path,
    canonical_root: &Path,
    requested: &str,
) -> Result<PathBuf> {
    let requested_path = Path::new(requested);
    let joined = if requested_path.is_absolute() {
        requested_path.to_path_buf()
    } else {
        root.join(requested_path)
    };
    let resolved = normalize_lexically(&joined);

    if !resolved.starts_with(root) {
        return Err(Error::Security { path: resolved });
    }

    for ancestor in resolved.ancestors() {
        match tokio::fs::symlink_metadata(ancestor).await {
            Ok(_) => {
                let canonical = match tokio::fs::canonicalize(ancestor).await {
                    Ok(canonical) => canonical,
                    Err(_) => {
                        return Err(Error::Security {
                            path: ancestor.to_path_buf(),
                        })
                    }
                };
                if !canonical.starts_with(canonical_root) {
                    return Err(Error::Security { path: canonical });
                }
                break;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(Error::Io(e)),
        }
    }

    Ok(resolved)
}

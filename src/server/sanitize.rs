//! Path sanitizer / chroot confinement (`spec.md` §4.8).
//!
//! Filesystem back-ends that want to confine a session to a subtree call
//! [`to_local`] on every path a request names before touching the disk.
//! This crate only performs the lexical confinement check; it does not
//! guarantee a symlink inside the subtree cannot point outside it (a
//! documented non-guarantee, left to the back-end if it cares).

use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// Lexically clean `requested` and join it under `root`, rejecting any
/// result that would escape `root`.
///
/// `requested` is treated as an SFTP path: `.` and `..` components are
/// resolved against the virtual root, and a leading `/` is anchored at
/// `root` rather than the real filesystem root. `..` components that
/// would climb above `root` are rejected rather than clamped, so a
/// malicious `../../etc/passwd` never silently resolves to something
/// else under `root`.
///
/// # Errors
///
/// Returns [`Error::InvalidPath`] if the cleaned path is not lexically
/// contained in `root`, or if `requested` contains an invalid UTF-8
/// component.
pub fn to_local(root: &Path, requested: &str) -> Result<PathBuf> {
    let mut stack: Vec<String> = Vec::new();

    for component in Path::new(requested).components() {
        match component {
            Component::RootDir | Component::Prefix(_) | Component::CurDir => {}
            Component::ParentDir => {
                if stack.pop().is_none() {
                    return Err(Error::InvalidPath(format!(
                        "path escapes root: {requested}"
                    )));
                }
            }
            Component::Normal(part) => {
                let part = part
                    .to_str()
                    .ok_or_else(|| Error::InvalidPath(format!("invalid path: {requested}")))?;
                stack.push(part.to_string());
            }
        }
    }

    let mut local = root.to_path_buf();
    for part in stack {
        local.push(part);
    }
    Ok(local)
}

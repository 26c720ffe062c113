use crate::logw;
use std::path::Path;
use std::process::Command;

fn opener() -> &'static str {
    if cfg!(target_os = "windows") {
        "explorer"
    } else if cfg!(target_os = "macos") {
        "open"
    } else {
        "xdg-open"
    }
}

/// Shows `path` in the desktop file manager, creating it first so a fresh
/// install still opens something.
pub fn open_folder<P: AsRef<Path>>(path: P) {
    let path = path.as_ref();
    if path.as_os_str().is_empty() {
        return;
    }
    if let Err(err) = std::fs::create_dir_all(path) {
        logw(format!("Could not create {}: {}", path.display(), err));
        return;
    }
    if let Err(err) = Command::new(opener()).arg(path).spawn() {
        logw(format!("Could not open {} with {}: {}", path.display(), opener(), err));
    }
}

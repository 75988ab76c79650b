use std::path::Path;
use std::time::{Duration, SystemTime};

use anyhow::Result;
use tracing::{debug, warn};

/// Removes regular files in `dir` whose modification time is older than
/// `max_age`. Subdirectories are left alone. Per-file failures are logged
/// and skipped; returns how many files were removed.
pub fn sweep_stale_files(dir: &Path, max_age: Duration) -> Result<usize> {
    if !dir.is_dir() {
        return Ok(0);
    }

    let now = SystemTime::now();
    let mut removed = 0;

    for entry in std::fs::read_dir(dir)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Unreadable entry in {:?}: {}", dir, e);
                continue;
            }
        };
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let modified = match entry.metadata().and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) => {
                warn!("No mtime for {:?}: {}", path, e);
                continue;
            }
        };

        let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
        if age > max_age {
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    debug!("Removed stale file {:?}", path);
                    removed += 1;
                }
                Err(e) => warn!("Failed to remove stale file {:?}: {}", path, e),
            }
        }
    }

    Ok(removed)
}

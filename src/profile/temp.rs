use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

use log::{debug, warn};
use walkdir::WalkDir;

/// Outcome of a temp directory purge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub removed: usize,
    pub failed: usize,
    pub kept: usize,
}

/// Delete every file under `dir` last modified more than `max_age` ago.
///
/// A missing directory is not an error. Files that cannot be inspected or
/// deleted are logged and counted in [`PurgeReport::failed`].
pub fn purge_older_than(dir: &Path, max_age: Duration) -> PurgeReport {
    let mut report = PurgeReport::default();
    if !dir.is_dir() {
        debug!("Temp directory {} does not exist, nothing to purge", dir.display());
        return report;
    }

    let now = SystemTime::now();
    for entry in WalkDir::new(dir).min_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Cannot read temp entry: {}", e);
                report.failed += 1;
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let modified = entry.metadata().ok().and_then(|m| m.modified().ok());
        let Some(modified) = modified else {
            warn!("Cannot read modification time of {}", entry.path().display());
            report.failed += 1;
            continue;
        };

        // Files from the future count as fresh.
        let age = now.duration_since(modified).unwrap_or_default();
        if age <= max_age {
            report.kept += 1;
            continue;
        }

        match fs::remove_file(entry.path()) {
            Ok(()) => {
                debug!("Removed stale temp file {}", entry.path().display());
                report.removed += 1;
            }
            Err(e) => {
                warn!("Failed to remove {}: {}", entry.path().display(), e);
                report.failed += 1;
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::tempdir;

    fn age_file(path: &Path, age: Duration) {
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    #[test]
    fn test_purges_only_old_files() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("thumbs");
        fs::create_dir_all(&nested).unwrap();

        let old = dir.path().join("old.part");
        let old_nested = nested.join("old.png");
        let fresh = dir.path().join("fresh.part");
        for path in [&old, &old_nested, &fresh] {
            fs::write(path, b"x").unwrap();
        }
        age_file(&old, Duration::from_secs(7200));
        age_file(&old_nested, Duration::from_secs(7200));

        let report = purge_older_than(dir.path(), Duration::from_secs(3600));
        assert_eq!(report.removed, 2);
        assert_eq!(report.kept, 1);
        assert_eq!(report.failed, 0);
        assert!(!old.exists());
        assert!(!old_nested.exists());
        assert!(fresh.exists());
        assert!(nested.is_dir());
    }

    #[test]
    fn test_missing_directory() {
        let dir = tempdir().unwrap();
        let report = purge_older_than(&dir.path().join("nope"), Duration::ZERO);
        assert_eq!(report, PurgeReport::default());
    }
}

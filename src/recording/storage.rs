/**
 * ============================================================================
 * RECORDING STORAGE MODULE
 * ============================================================================
 * 
 * PURPOSE: Manage segment files in the records directory
 * 
 * FUNCTIONALITY:
 * - Generate segment file names from ring index + start time
 * - Ring-slot cleanup: delete older files sharing an index
 * - Calculate total storage and segment count
 * - Daily log files and their retention
 * 
 * FILE STRUCTURE:
 * records/
 * ├── cfg.json                        # ring-buffer state
 * ├── 2025-01-15.log                  # daemon log for that day
 * ├── live_snap.jpg                   # latest still frame
 * ├── 0_2025-01-15_08-00-00.mp4
 * ├── 1_2025-01-15_08-01-00.mp4
 * └── ...
 * 
 * ============================================================================
 */

use chrono::{DateTime, Local, NaiveDate};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const SEGMENT_EXTENSION: &str = "mp4";
const LOG_EXTENSION: &str = "log";
const LOG_DATE_FORMAT: &str = "%Y-%m-%d";

// File name for a segment: "{index}_{YYYY-MM-DD_HH-MM-SS}.mp4"
pub fn segment_filename(index: u64, start: &DateTime<Local>) -> String {
    format!(
        "{}_{}.{}",
        index,
        start.format("%Y-%m-%d_%H-%M-%S"),
        SEGMENT_EXTENSION
    )
}

pub fn segment_path(records_dir: &Path, index: u64, start: &DateTime<Local>) -> PathBuf {
    records_dir.join(segment_filename(index, start))
}

// Ensure the records directory exists
pub fn ensure_records_dir(records_dir: &Path) -> Result<(), String> {
    fs::create_dir_all(records_dir)
        .map_err(|e| format!("Failed to create records directory: {}", e))
}

// Segment files directly under the records directory
fn segment_entries(records_dir: &Path) -> impl Iterator<Item = walkdir::DirEntry> {
    WalkDir::new(records_dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .map(|ext| ext == SEGMENT_EXTENSION)
                .unwrap_or(false)
        })
}

/// Delete every segment occupying ring slot `index`.
///
/// Matching is on the exact "{index}_" prefix, so slot 1 never touches
/// slot 10. Returns the number of files removed.
pub fn remove_segments_with_index(records_dir: &Path, index: u64) -> Result<usize, String> {
    if !records_dir.exists() {
        return Ok(0);
    }

    let prefix = format!("{}_", index);
    let mut removed = 0;

    for entry in segment_entries(records_dir) {
        let matches = entry
            .file_name()
            .to_str()
            .map(|name| name.starts_with(&prefix))
            .unwrap_or(false);
        if !matches {
            continue;
        }

        fs::remove_file(entry.path())
            .map_err(|e| format!("Failed to remove old segment {:?}: {}", entry.path(), e))?;
        log::info!("Removed old segment: {:?}", entry.path());
        removed += 1;
    }

    Ok(removed)
}

// Calculate total bytes used by segment files
pub fn calculate_total_storage(records_dir: &Path) -> u64 {
    if !records_dir.exists() {
        return 0;
    }

    segment_entries(records_dir)
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

// Count segment files
pub fn count_segments(records_dir: &Path) -> u64 {
    if !records_dir.exists() {
        return 0;
    }

    segment_entries(records_dir).count() as u64
}

// Log file for a given day: "{YYYY-MM-DD}.log"
pub fn log_file_path(records_dir: &Path, day: NaiveDate) -> PathBuf {
    records_dir.join(format!("{}.{}", day.format(LOG_DATE_FORMAT), LOG_EXTENSION))
}

/// Delete daily log files dated more than `keep_days` days before `today`.
///
/// Only files named exactly "{YYYY-MM-DD}.log" are considered. Returns the
/// number of files removed.
pub fn delete_old_logs(records_dir: &Path, keep_days: u32, today: NaiveDate) -> Result<usize, String> {
    if !records_dir.exists() {
        return Ok(0);
    }

    let mut removed = 0;
    let entries = WalkDir::new(records_dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file());

    for entry in entries {
        let path = entry.path();
        if path.extension().map(|ext| ext != LOG_EXTENSION).unwrap_or(true) {
            continue;
        }
        let day = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|stem| NaiveDate::parse_from_str(stem, LOG_DATE_FORMAT).ok());
        let Some(day) = day else {
            continue;
        };

        if today.signed_duration_since(day).num_days() > i64::from(keep_days) {
            fs::remove_file(path)
                .map_err(|e| format!("Failed to remove old log {:?}: {}", path, e))?;
            log::info!("Removed old log: {:?}", path);
            removed += 1;
        }
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str, len: usize) {
        fs::write(dir.join(name), vec![0u8; len]).unwrap();
    }

    #[test]
    fn test_segment_filename_format() {
        let start = Local.with_ymd_and_hms(2025, 1, 15, 8, 5, 9).unwrap();
        assert_eq!(segment_filename(7, &start), "7_2025-01-15_08-05-09.mp4");
    }

    #[test]
    fn test_remove_segments_matches_exact_index() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "1_2025-01-15_08-00-00.mp4", 10);
        touch(dir.path(), "1_2025-01-16_09-00-00.mp4", 10);
        touch(dir.path(), "10_2025-01-15_08-09-00.mp4", 10);
        touch(dir.path(), "11_2025-01-15_08-10-00.mp4", 10);
        touch(dir.path(), "1_notes.txt", 10);

        assert_eq!(remove_segments_with_index(dir.path(), 1).unwrap(), 2);
        assert!(dir.path().join("10_2025-01-15_08-09-00.mp4").exists());
        assert!(dir.path().join("11_2025-01-15_08-10-00.mp4").exists());
        assert!(dir.path().join("1_notes.txt").exists());
        assert_eq!(count_segments(dir.path()), 2);
    }

    #[test]
    fn test_storage_totals() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "0_a.mp4", 100);
        touch(dir.path(), "1_b.mp4", 250);
        touch(dir.path(), "cfg.json", 999);

        assert_eq!(count_segments(dir.path()), 2);
        assert_eq!(calculate_total_storage(dir.path()), 350);
    }

    #[test]
    fn test_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        assert_eq!(count_segments(&missing), 0);
        assert_eq!(calculate_total_storage(&missing), 0);
        assert_eq!(remove_segments_with_index(&missing, 3).unwrap(), 0);

        ensure_records_dir(&missing).unwrap();
        assert!(missing.is_dir());
    }

    #[test]
    fn test_log_file_named_by_day() {
        let day = NaiveDate::from_ymd_opt(2025, 1, 5).unwrap();
        assert_eq!(
            log_file_path(Path::new("/records"), day),
            PathBuf::from("/records/2025-01-05.log")
        );
    }

    #[test]
    fn test_delete_old_logs_keeps_recent_days() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "2025-01-10.log", 5);
        touch(dir.path(), "2025-01-12.log", 5);
        touch(dir.path(), "2025-01-13.log", 5);
        touch(dir.path(), "2025-01-15.log", 5);
        touch(dir.path(), "notes.log", 5);
        touch(dir.path(), "0_2025-01-01_00-00-00.mp4", 5);

        let today = NaiveDate::from_ymd_opt(2025, 1, 15).unwrap();
        assert_eq!(delete_old_logs(dir.path(), 2, today).unwrap(), 2);

        assert!(!dir.path().join("2025-01-10.log").exists());
        assert!(!dir.path().join("2025-01-12.log").exists());
        assert!(dir.path().join("2025-01-13.log").exists());
        assert!(dir.path().join("2025-01-15.log").exists());
        assert!(dir.path().join("notes.log").exists());
        assert_eq!(count_segments(dir.path()), 1);

        let missing = dir.path().join("nope");
        assert_eq!(delete_old_logs(&missing, 2, today).unwrap(), 0);
    }
}

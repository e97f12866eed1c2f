use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::fsutil::TEMP_MARKER;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Segment {
    /// 1-based.
    pub index: usize,
    pub start: f64,
    pub duration: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentPlan {
    pub segment_seconds: f64,
    pub segments: Vec<Segment>,
}

impl SegmentPlan {
    /// Splits `duration` seconds so each part carries roughly `target_bytes`
    /// of the `total_bytes` payload. Parts are never shorter than
    /// `min_segment_seconds`, except the final remainder.
    pub fn compute(
        total_bytes: u64,
        duration: f64,
        target_bytes: u64,
        min_segment_seconds: f64,
    ) -> Option<SegmentPlan> {
        if !duration.is_finite() || duration <= 0.0 || total_bytes == 0 || target_bytes == 0 {
            return None;
        }
        let proportional = duration * target_bytes as f64 / total_bytes as f64;
        let segment_seconds = proportional.max(min_segment_seconds.max(1.0)).min(duration);
        let count = ((duration / segment_seconds) - 1e-9).ceil().max(1.0) as usize;

        let mut segments = Vec::with_capacity(count);
        for i in 0..count {
            let start = i as f64 * segment_seconds;
            let length = if i + 1 == count {
                duration - start
            } else {
                segment_seconds
            };
            segments.push(Segment {
                index: i + 1,
                start,
                duration: length,
            });
        }
        Some(SegmentPlan {
            segment_seconds,
            segments,
        })
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn total_duration(&self) -> f64 {
        self.segments.iter().map(|s| s.duration).sum()
    }
}

/// Working file for one part, next to the original.
pub fn segment_path(original: &Path, index: usize, total: usize) -> PathBuf {
    let stem = original
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let ext = original
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_else(|| "mp4".into());
    original.with_file_name(format!("{stem}{TEMP_MARKER}.seg{index:03}of{total:03}.{ext}"))
}

/// Every part file on disk that belongs to `original`, whatever plan cut it.
pub fn segment_siblings(original: &Path) -> Vec<PathBuf> {
    let (Some(parent), Some(stem)) = (original.parent(), original.file_stem()) else {
        return Vec::new();
    };
    let prefix = format!("{}{TEMP_MARKER}.seg", stem.to_string_lossy());
    let suffix = original
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_else(|| ".mp4".into());
    let Ok(entries) = std::fs::read_dir(parent) else {
        return Vec::new();
    };
    let mut parts: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            let name = entry.file_name().to_string_lossy().to_string();
            name.starts_with(&prefix) && name.ends_with(&suffix)
        })
        .map(|entry| entry.path())
        .collect();
    parts.sort();
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    const GIB: u64 = 1024 * 1024 * 1024;
    const MIB: u64 = 1024 * 1024;

    #[test]
    fn five_gib_at_1950_mib_target_is_three_parts() {
        let plan = SegmentPlan::compute(5 * GIB, 3600.0, 1950 * MIB, 30.0).unwrap();
        assert_eq!(plan.len(), 3);
        assert!((plan.total_duration() - 3600.0).abs() < 1e-6);
        assert_eq!(plan.segments[0].start, 0.0);
        assert_eq!(plan.segments[2].index, 3);
        let approx = plan.len() as f64 * 1950.0 * MIB as f64;
        assert!(approx >= (5 * GIB) as f64);
        assert!(approx - ((5 * GIB) as f64) < (1950 * MIB) as f64);
    }

    #[test]
    fn floor_prevents_tiny_parts() {
        let plan = SegmentPlan::compute(1000 * MIB, 100.0, MIB, 30.0).unwrap();
        assert_eq!(plan.segment_seconds, 30.0);
        assert_eq!(plan.len(), 4);
        assert!((plan.segments[3].duration - 10.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_duration_has_no_plan() {
        assert!(SegmentPlan::compute(GIB, 0.0, MIB, 30.0).is_none());
        assert!(SegmentPlan::compute(GIB, f64::NAN, MIB, 30.0).is_none());
    }

    #[test]
    fn exact_multiple_does_not_add_empty_part() {
        let plan = SegmentPlan::compute(300, 90.0, 100, 1.0).unwrap();
        assert_eq!(plan.len(), 3);
        assert!(plan.segments.iter().all(|s| s.duration > 0.0));
    }

    #[test]
    fn segment_names_are_internal_temps() {
        let path = segment_path(Path::new("/d/movie.mkv"), 2, 3);
        assert_eq!(path, PathBuf::from("/d/movie.__vidrelay_tmp__.seg002of003.mkv"));
        assert!(crate::fsutil::is_internal_temp(&path));
    }

    #[test]
    fn siblings_cover_every_plan_but_not_other_files() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("movie.mkv");
        for part in [
            segment_path(&original, 1, 3),
            segment_path(&original, 2, 4),
            segment_path(&dir.path().join("other.mkv"), 1, 3),
            segment_path(&dir.path().join("movie.mp4"), 1, 3),
        ] {
            std::fs::write(part, b"x").unwrap();
        }
        std::fs::write(&original, b"x").unwrap();

        assert_eq!(
            segment_siblings(&original),
            vec![segment_path(&original, 1, 3), segment_path(&original, 2, 4)]
        );
    }
}

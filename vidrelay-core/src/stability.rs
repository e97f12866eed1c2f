use std::path::Path;
use std::time::{Duration, SystemTime};

/// True when `path` exists and has not been modified for at least `min_age`.
///
/// A file that vanishes between the check and the stat is reported as not
/// stable; callers re-evaluate it on their next cycle.
pub fn is_stable(path: &Path, min_age: Duration) -> bool {
    is_stable_at(path, min_age, SystemTime::now())
}

pub fn is_stable_at(path: &Path, min_age: Duration, now: SystemTime) -> bool {
    let Ok(metadata) = std::fs::metadata(path) else {
        return false;
    };
    let Ok(modified) = metadata.modified() else {
        return false;
    };
    match now.duration_since(modified) {
        Ok(age) => age >= min_age,
        // mtime in the future: the writer's clock is ahead, treat as fresh.
        Err(_) => min_age.is_zero(),
    }
}

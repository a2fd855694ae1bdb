//! File-based event source: single JSON events, newline-delimited logs and
//! directory trees of either.

use std::{fs, path::Path};

use anyhow::{Context, Result};
use tracing::warn;

use crate::event::Event;

/// Read every event reachable from `paths`, in path order.
///
/// Directories are walked recursively and their files visited in sorted
/// order. Lines or files that do not parse as events are logged and skipped.
pub fn load_events<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<Event>> {
    let mut events = vec![];
    for path in paths {
        let path = path.as_ref();
        if path.is_dir() {
            let walker = walkdir::WalkDir::new(path).sort_by_file_name();
            for entry in walker {
                let entry = entry?;
                if entry.file_type().is_file() {
                    read_file(entry.path(), &mut events)?;
                }
            }
        } else {
            read_file(path, &mut events)?;
        }
    }
    Ok(events)
}

fn read_file(path: &Path, out: &mut Vec<Event>) -> Result<()> {
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let is_log = path.extension().is_some_and(|ext| ext == "ndjson" || ext == "jsonl");
    if !is_log {
        match serde_json::from_str::<Event>(&data) {
            Ok(ev) => out.push(ev),
            Err(e) => warn!("skipping {}: {e}", path.display()),
        }
        return Ok(());
    }
    for (n, line) in data.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Event>(line) {
            Ok(ev) => out.push(ev),
            Err(e) => warn!("skipping {}:{}: {e}", path.display(), n + 1),
        }
    }
    Ok(())
}

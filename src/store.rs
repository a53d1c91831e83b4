//! Read-modify-write access to JSON state files.
//!
//! There is no locking. Two processes that interleave `update` calls on the
//! same file can lose one of the writes; callers treat every record here as
//! advisory. Writes go through a temp file + rename so readers never see a
//! half-written document.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::Fault;

/// Load a JSON document, returning `Ok(None)` when the file does not exist.
pub fn load<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, Fault> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Fault::io(path, e)),
    };
    if contents.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|source| Fault::Corrupt {
            path: path.to_path_buf(),
            source,
        })
}

/// Load a JSON document, falling back to `T::default()` when it is missing
/// or corrupt. A corrupt file is logged and will be overwritten by the next
/// save.
pub fn load_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T, Fault> {
    match load(path) {
        Ok(value) => Ok(value.unwrap_or_default()),
        Err(Fault::Corrupt { path, source }) => {
            warn!(path = %path.display(), error = %source, "corrupt state file, starting from empty");
            Ok(T::default())
        }
        Err(fault) => Err(fault),
    }
}

/// Atomically write a JSON document (temp file + rename).
pub fn save<T: Serialize>(path: &Path, value: &T) -> Result<(), Fault> {
    let mut buf = serde_json::to_string_pretty(value).map_err(|source| Fault::Serialize {
        path: path.to_path_buf(),
        source,
    })?;
    buf.push('\n');
    write_atomic(path, buf.as_bytes())
}

/// Read the document, apply `mutate`, write it back, and return whatever
/// `mutate` returned.
pub fn update<T, R>(path: &Path, mutate: impl FnOnce(&mut T) -> R) -> Result<R, Fault>
where
    T: DeserializeOwned + Serialize + Default,
{
    let mut value: T = load_or_default(path)?;
    let result = mutate(&mut value);
    save(path, &value)?;
    Ok(result)
}

/// Remove a state file. Missing files are not an error.
pub fn remove(path: &Path) -> Result<(), Fault> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "removed state file");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Fault::io(path, e)),
    }
}

/// Append one JSON value as a line to a JSONL file.
pub fn append_jsonl<T: Serialize>(path: &Path, value: &T) -> Result<(), Fault> {
    let mut line = serde_json::to_string(value).map_err(|source| Fault::Serialize {
        path: path.to_path_buf(),
        source,
    })?;
    line.push('\n');
    append_text(path, &line)
}

/// Read every parseable line of a JSONL file. Unparseable lines are skipped.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, Fault> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Fault::io(path, e)),
    };
    Ok(contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect())
}

/// Drop every JSONL record `keep` rejects, rewriting the file atomically.
/// Returns how many lines were dropped; an untouched file is not rewritten.
pub fn compact_jsonl<T>(path: &Path, keep: impl Fn(&T) -> bool) -> Result<usize, Fault>
where
    T: DeserializeOwned + Serialize,
{
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(Fault::io(path, e)),
    };
    let lines: Vec<&str> = contents.lines().filter(|l| !l.trim().is_empty()).collect();
    let kept: Vec<&str> = lines
        .iter()
        .copied()
        .filter(|line| serde_json::from_str::<T>(line).is_ok_and(|record| keep(&record)))
        .collect();
    let dropped = lines.len() - kept.len();
    if dropped > 0 {
        let mut buf = kept.join("\n");
        if !buf.is_empty() {
            buf.push('\n');
        }
        write_atomic(path, buf.as_bytes())?;
        debug!(path = %path.display(), dropped, "compacted log");
    }
    Ok(dropped)
}

/// Append raw text to a file, creating it and its parent directory.
pub fn append_text(path: &Path, text: &str) -> Result<(), Fault> {
    ensure_parent(path)?;
    fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .and_then(|mut f| f.write_all(text.as_bytes()))
        .map_err(|e| Fault::io(path, e))
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), Fault> {
    ensure_parent(path)?;
    let tmp_path = path.with_extension(format!("tmp.{}", std::process::id()));
    fs::write(&tmp_path, contents).map_err(|e| Fault::io(&tmp_path, e))?;
    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        Fault::io(path, e)
    })
}

fn ensure_parent(path: &Path) -> Result<(), Fault> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Fault::io(parent, e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn missing_file_loads_as_none() {
        let temp = tempfile::tempdir().unwrap();
        let loaded: Option<BTreeMap<String, u32>> = load(&temp.path().join("nope.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn corrupt_file_is_a_fault_for_load_but_default_for_load_or_default() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("state.json");
        fs::write(&path, "{not json").unwrap();

        let strict: Result<Option<BTreeMap<String, u32>>, Fault> = load(&path);
        assert!(matches!(strict, Err(Fault::Corrupt { .. })));

        let lenient: BTreeMap<String, u32> = load_or_default(&path).unwrap();
        assert!(lenient.is_empty());
    }

    #[test]
    fn update_creates_parent_dirs_and_persists() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("nested/dir/state.json");

        let len = update(&path, |m: &mut BTreeMap<String, u32>| {
            m.insert("a".into(), 1);
            m.len()
        })
        .unwrap();
        assert_eq!(len, 1);

        let loaded: BTreeMap<String, u32> = load_or_default(&path).unwrap();
        assert_eq!(loaded.get("a"), Some(&1));
        // no temp file left behind
        let entries: Vec<_> = fs::read_dir(path.parent().unwrap()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn jsonl_skips_garbage_lines() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("log.jsonl");
        append_jsonl(&path, &serde_json::json!({"n": 1})).unwrap();
        append_text(&path, "garbage\n").unwrap();
        append_jsonl(&path, &serde_json::json!({"n": 2})).unwrap();

        let rows: Vec<serde_json::Value> = read_jsonl(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["n"], 2);
    }

    #[test]
    fn remove_missing_is_ok() {
        let temp = tempfile::tempdir().unwrap();
        assert!(remove(&temp.path().join("gone.json")).is_ok());
    }

    #[test]
    fn compact_jsonl_drops_rejected_and_garbage_lines() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("log.jsonl");
        for n in [1u32, 5, 2, 8] {
            append_jsonl(&path, &n).unwrap();
        }
        append_text(&path, "not json\n").unwrap();

        assert_eq!(compact_jsonl(&path, |n: &u32| *n > 2).unwrap(), 3);
        let left: Vec<u32> = read_jsonl(&path).unwrap();
        assert_eq!(left, vec![5, 8]);

        // nothing left to drop
        assert_eq!(compact_jsonl(&path, |n: &u32| *n > 2).unwrap(), 0);
        assert_eq!(compact_jsonl(&temp.path().join("missing.jsonl"), |_: &u32| true).unwrap(), 0);
    }
}

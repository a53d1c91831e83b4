use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use serde_json::Value;

use crate::error::Fault;

/// Read at most the last `max_bytes` of a transcript file.
pub fn read_tail(path: &Path, max_bytes: u64) -> Result<String, Fault> {
    let mut file = File::open(path).map_err(|e| Fault::io(path, e))?;
    let len = file.metadata().map_err(|e| Fault::io(path, e))?.len();
    if len > max_bytes {
        file.seek(SeekFrom::Start(len - max_bytes))
            .map_err(|e| Fault::io(path, e))?;
    }
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).map_err(|e| Fault::io(path, e))?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Text of the final assistant message in a JSONL session transcript.
///
/// Returns `None` when `raw` is not JSONL or holds no assistant turn, in
/// which case callers use the raw text.
pub fn last_assistant_text(raw: &str) -> Option<String> {
    raw.lines().rev().find_map(|line| {
        let entry: Value = serde_json::from_str(line.trim()).ok()?;
        if entry.get("type").and_then(Value::as_str) != Some("assistant") {
            return None;
        }
        let content = entry.get("message")?.get("content")?;
        let text = match content {
            Value::String(s) => s.clone(),
            Value::Array(blocks) => blocks
                .iter()
                .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n"),
            _ => return None,
        };
        (!text.trim().is_empty()).then_some(text)
    })
}

/// Latest agent output: assistant text when the transcript is structured,
/// otherwise the raw tail.
pub fn latest_output(raw: &str) -> String {
    last_assistant_text(raw).unwrap_or_else(|| raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_last_assistant_message() {
        let raw = [
            r#"{"type":"user","message":{"content":"fix it"}}"#,
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"error: first try"}]}}"#,
            r#"{"type":"assistant","message":{"content":[{"type":"tool_use","name":"Bash"},{"type":"text","text":"All tests pass"}]}}"#,
            r#"{"type":"user","message":{"content":[{"type":"tool_result","content":"ok"}]}}"#,
        ]
        .join("\n");
        assert_eq!(last_assistant_text(&raw).as_deref(), Some("All tests pass"));
    }

    #[test]
    fn plain_text_falls_back_to_raw() {
        assert_eq!(latest_output("just words"), "just words");
    }

    #[test]
    fn tail_reads_only_the_end() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("t.jsonl");
        std::fs::write(&path, "0123456789").unwrap();
        assert_eq!(read_tail(&path, 4).unwrap(), "6789");
        assert_eq!(read_tail(&path, 100).unwrap(), "0123456789");
    }

    #[test]
    fn tail_cut_mid_line_still_parses_later_lines() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("t.jsonl");
        let content = format!(
            "{}\n{}\n",
            r#"{"type":"assistant","message":{"content":"early output that gets cut"}}"#,
            r#"{"type":"assistant","message":{"content":"late"}}"#
        );
        std::fs::write(&path, &content).unwrap();
        let tail = read_tail(&path, 60).unwrap();
        assert_eq!(last_assistant_text(&tail).as_deref(), Some("late"));
    }

    #[test]
    fn missing_file_is_a_fault() {
        let err = read_tail(Path::new("/nonexistent/t.jsonl"), 10).unwrap_err();
        assert!(matches!(err, Fault::Io { .. }));
    }
}

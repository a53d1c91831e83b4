use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// JSON payload the host writes to a hook's stdin.
///
/// Every field is optional; hooks read what they need and ignore the rest.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HookInput {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub hook_event_name: Option<String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_input: Value,
    #[serde(default)]
    pub tool_output: Option<Value>,
    #[serde(default)]
    pub tool_response: Option<Value>,
    #[serde(default, rename = "stopReason", alias = "stop_reason")]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub transcript: Option<String>,
    #[serde(default)]
    pub transcript_path: Option<PathBuf>,
}

impl HookInput {
    /// Parse stdin. Empty or malformed input yields an empty payload.
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
            return Self::default();
        };
        serde_json::from_str(raw).unwrap_or_else(|e| {
            warn!(error = %e, "unparseable hook input, treating as empty");
            Self::default()
        })
    }

    pub fn tool_is(&self, name: &str) -> bool {
        self.tool_name.as_deref() == Some(name)
    }

    /// String field of `tool_input`.
    pub fn input_str(&self, key: &str) -> Option<&str> {
        self.tool_input
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Target path of a write-class tool call.
    pub fn target_file(&self) -> Option<&str> {
        ["file_path", "notebook_path", "path"]
            .into_iter()
            .find_map(|key| self.input_str(key))
    }

    /// Tool result, whichever field the host used.
    fn result(&self) -> Option<&Value> {
        self.tool_response.as_ref().or(self.tool_output.as_ref())
    }

    /// Structured exit status of the tool call, when reported.
    pub fn exit_status(&self) -> Option<i32> {
        let result = self.result()?;
        for key in ["exit_code", "exitCode"] {
            if let Some(code) = result.get(key).and_then(Value::as_i64) {
                return Some(i32::try_from(code).unwrap_or(1));
            }
        }
        if result.get("interrupted").and_then(Value::as_bool) == Some(true) {
            return Some(130);
        }
        if result.get("is_error").and_then(Value::as_bool) == Some(true) {
            return Some(1);
        }
        None
    }

    /// Tool result flattened to text.
    pub fn result_text(&self) -> String {
        match self.result() {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(Value::Object(map)) => {
                let mut parts = Vec::new();
                for key in ["stdout", "stderr", "output", "result"] {
                    if let Some(s) = map.get(key).and_then(Value::as_str) {
                        parts.push(s.to_string());
                    }
                }
                if let Some(blocks) = map.get("content").and_then(Value::as_array) {
                    parts.extend(
                        blocks
                            .iter()
                            .filter_map(|b| b.get("text").and_then(Value::as_str))
                            .map(String::from),
                    );
                }
                if parts.is_empty() {
                    Value::Object(map.clone()).to_string()
                } else {
                    parts.join("\n")
                }
            }
            Some(other) => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Allow,
    Block,
}

/// JSON object a hook writes to stdout. `{}` means "no opinion".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HookOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(rename = "systemMessage", skip_serializing_if = "Option::is_none")]
    pub system_message: Option<String>,
    #[serde(rename = "stopReason", skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}

impl HookOutput {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn block(reason: impl Into<String>) -> Self {
        Self {
            decision: Some(Decision::Block),
            reason: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            system_message: Some(message.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.system_message = Some(message.into());
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

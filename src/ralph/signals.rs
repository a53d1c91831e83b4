use std::sync::OnceLock;

use regex::Regex;

/// What the controller knows about the turn that just ended.
#[derive(Debug, Clone, Copy, Default)]
pub struct Evidence<'a> {
    /// Latest agent output (transcript tail or last assistant message).
    pub text: &'a str,
    /// Structured exit status from the hook payload, when present.
    pub exit_status: Option<i32>,
    /// Loop-specific phrase that also counts as a success claim.
    pub completion_promise: Option<&'a str>,
}

/// Decides whether a turn failed and whether the agent claims to be done.
pub trait SignalDetector {
    /// `Some(matched)` when the turn looks like a failure.
    fn failure(&self, evidence: &Evidence<'_>) -> Option<String>;

    /// `Some(matched)` when the agent claims the work is finished.
    fn success(&self, evidence: &Evidence<'_>) -> Option<String>;
}

#[allow(clippy::unwrap_used)]
fn failure_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(error:|failed|exception|traceback|panic:)").unwrap())
}

#[allow(clippy::unwrap_used)]
fn success_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)(all tests pass(?:ed|ing)?|task (?:is )?complete(?:d)?|implementation (?:is )?complete|all done|work is complete|<promise>[^<]*</promise>)",
        )
        .unwrap()
    })
}

/// Case-insensitive keyword scan over the transcript text.
///
/// A structured exit status, when the payload carries one, overrides the
/// failure scan: zero is a clean turn regardless of what the text says.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordDetector;

impl SignalDetector for KeywordDetector {
    fn failure(&self, evidence: &Evidence<'_>) -> Option<String> {
        if let Some(code) = evidence.exit_status {
            return (code != 0).then(|| format!("exit status {code}"));
        }
        failure_re()
            .find(evidence.text)
            .map(|m| m.as_str().to_lowercase())
    }

    fn success(&self, evidence: &Evidence<'_>) -> Option<String> {
        let promised = evidence
            .completion_promise
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .filter(|p| evidence.text.to_lowercase().contains(&p.to_lowercase()));
        if let Some(promise) = promised {
            return Some(promise.to_string());
        }
        success_re()
            .find(evidence.text)
            .map(|m| m.as_str().to_lowercase())
    }
}

/// Claude Code hook event type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    PreToolUse,
    PostToolUse,
    Stop,
    SessionEnd,
}

impl HookEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            HookEvent::PreToolUse => "PreToolUse",
            HookEvent::PostToolUse => "PostToolUse",
            HookEvent::Stop => "Stop",
            HookEvent::SessionEnd => "SessionEnd",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "PreToolUse" => Some(HookEvent::PreToolUse),
            "PostToolUse" => Some(HookEvent::PostToolUse),
            "Stop" => Some(HookEvent::Stop),
            "SessionEnd" => Some(HookEvent::SessionEnd),
            _ => None,
        }
    }

    /// Tool events are filtered by a matcher in settings.json.
    pub fn takes_matcher(self) -> bool {
        matches!(self, HookEvent::PreToolUse | HookEvent::PostToolUse)
    }
}

/// Hook registry entry
#[derive(Debug, Clone)]
pub struct HookEntry {
    pub name: &'static str,
    pub events: &'static [HookEvent],
    /// Tool-name regex for tool events.
    pub matcher: Option<&'static str>,
    pub description: &'static str,
}

impl HookEntry {
    pub fn handles(&self, event: HookEvent) -> bool {
        self.events.contains(&event)
    }
}

pub const WRITE_TOOLS_MATCHER: &str = "Write|Edit|MultiEdit|NotebookEdit";

pub struct HookRegistry;

impl HookRegistry {
    /// Get all registered hooks
    pub fn all() -> Vec<HookEntry> {
        vec![
            HookEntry {
                name: "claim-file",
                events: &[HookEvent::PreToolUse],
                matcher: Some(WRITE_TOOLS_MATCHER),
                description: "Claim a file before editing; block if another agent holds it",
            },
            HookEntry {
                name: "release-claims",
                events: &[HookEvent::SessionEnd],
                matcher: None,
                description: "Release every file claim held by the ending session",
            },
            HookEntry {
                name: "track-task",
                events: &[HookEvent::PreToolUse, HookEvent::PostToolUse],
                matcher: Some("Task"),
                description: "Record subagent tasks in the hive",
            },
            HookEntry {
                name: "ralph-stop",
                events: &[HookEvent::Stop],
                matcher: None,
                description: "Drive the Ralph loop: continue or allow the stop",
            },
        ]
    }

    pub fn find(name: &str) -> Option<HookEntry> {
        Self::all().into_iter().find(|entry| entry.name == name)
    }

    pub fn names() -> Vec<&'static str> {
        Self::all().iter().map(|entry| entry.name).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_hooks_registered() {
        let hooks = HookRegistry::all();
        assert_eq!(hooks.len(), 4);
        assert_eq!(
            HookRegistry::names(),
            ["claim-file", "release-claims", "track-task", "ralph-stop"]
        );
    }

    #[test]
    fn tool_hooks_carry_matchers() {
        for hook in HookRegistry::all() {
            let tool_event = hook.events.iter().any(|e| e.takes_matcher());
            assert_eq!(tool_event, hook.matcher.is_some(), "{}", hook.name);
        }
    }

    #[test]
    fn track_task_handles_both_tool_events() {
        let hook = HookRegistry::find("track-task").unwrap();
        assert!(hook.handles(HookEvent::PreToolUse));
        assert!(hook.handles(HookEvent::PostToolUse));
        assert!(!hook.handles(HookEvent::Stop));
        assert!(HookRegistry::find("nope").is_none());
    }

    #[test]
    fn event_names_round_trip() {
        for event in [
            HookEvent::PreToolUse,
            HookEvent::PostToolUse,
            HookEvent::Stop,
            HookEvent::SessionEnd,
        ] {
            assert_eq!(HookEvent::from_name(event.as_str()), Some(event));
        }
    }
}

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{Value, json};
use tempfile::TempDir;

struct Env {
    home: TempDir,
    project: TempDir,
}

impl Env {
    fn new() -> Self {
        Self {
            home: tempfile::tempdir().unwrap(),
            project: tempfile::tempdir().unwrap(),
        }
    }

    fn project(&self) -> &Path {
        self.project.path()
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("hive-hooks").unwrap();
        cmd.env("HIVE_HOOKS_HOME", self.home.path())
            .env_remove("HIVE_HOOKS_AGENT_ID")
            .env_remove("CLAUDE_SESSION_ID")
            .env_remove("OTEL_EXPORTER_OTLP_ENDPOINT")
            .current_dir(self.project());
        cmd
    }

    fn hook(&self, name: &str, payload: &Value) -> Value {
        let output = self
            .cmd()
            .args(["hooks", "run", name])
            .write_stdin(payload.to_string())
            .output()
            .unwrap();
        assert!(output.status.success(), "hook {name} exited non-zero");
        serde_json::from_slice(&output.stdout).unwrap()
    }
}

fn edit(env: &Env, session: &str, file: &str) -> Value {
    json!({
        "session_id": session,
        "hook_event_name": "PreToolUse",
        "cwd": env.project(),
        "tool_name": "Edit",
        "tool_input": {"file_path": file},
    })
}

#[test]
fn claim_hook_blocks_second_session() {
    let env = Env::new();
    assert_eq!(env.hook("claim-file", &edit(&env, "alpha", "src/lib.rs")), json!({}));

    let denied = env.hook("claim-file", &edit(&env, "beta", "src/lib.rs"));
    assert_eq!(denied["decision"], "block");
    assert!(denied["reason"].as_str().unwrap().contains("alpha"));

    let end = json!({"session_id": "alpha", "hook_event_name": "SessionEnd", "cwd": env.project()});
    assert_eq!(env.hook("release-claims", &end), json!({}));
    assert_eq!(env.hook("claim-file", &edit(&env, "beta", "src/lib.rs")), json!({}));
}

#[test]
fn garbage_payload_is_a_no_op() {
    let env = Env::new();
    env.cmd()
        .args(["hooks", "run", "claim-file"])
        .write_stdin("this is not json")
        .assert()
        .success()
        .stdout("{}\n");
}

#[test]
fn unknown_hook_is_a_no_op() {
    let env = Env::new();
    env.cmd()
        .args(["hooks", "run", "no-such-hook"])
        .write_stdin("{}")
        .assert()
        .success()
        .stdout("{}\n");
}

#[test]
fn ralph_loop_runs_until_checks_pass() {
    let env = Env::new();
    fs::write(
        env.project().join(".hive-hooks.toml"),
        r#"
[ralph]
min_interval_secs = 0

[ralph.validation]
test_command = "true"
lint_command = "true"
auto_detect = false
"#,
    )
    .unwrap();

    env.cmd()
        .args(["ralph", "start", "Make the parser handle comments"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Ralph loop started"));

    let stop = |text: &str| {
        json!({
            "session_id": "s1",
            "hook_event_name": "Stop",
            "cwd": env.project(),
            "stop_reason": text,
        })
    };

    let next = env.hook("ralph-stop", &stop("Added the comment token, still wiring the lexer"));
    assert_eq!(next["decision"], "block");
    let reason = next["reason"].as_str().unwrap();
    assert!(reason.contains("Make the parser handle comments"));
    assert!(reason.contains("iteration 1/15"));

    let done = env.hook("ralph-stop", &stop("All tests pass."));
    assert_eq!(done["decision"], "allow");
    assert!(done["stopReason"].as_str().unwrap().contains("Loop complete"));

    // the loop is gone, so the next stop is ignored
    assert_eq!(env.hook("ralph-stop", &stop("anything")), json!({}));
    env.cmd()
        .args(["ralph", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No active loop"));
}

#[test]
fn ralph_start_refuses_a_second_loop() {
    let env = Env::new();
    env.cmd().args(["ralph", "start", "first"]).assert().success();
    env.cmd()
        .args(["ralph", "start", "second"])
        .assert()
        .code(6)
        .stderr(predicate::str::contains("--force"));
    env.cmd()
        .args(["ralph", "start", "second", "--force"])
        .assert()
        .success();
    env.cmd()
        .args(["ralph", "cancel"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Loop cancelled"));
}

#[test]
fn installed_hooks_pass_audit() {
    let env = Env::new();
    env.cmd()
        .args(["hooks", "audit"])
        .assert()
        .code(7)
        .stderr(predicate::str::contains("Missing .claude/settings.json"));

    env.cmd()
        .args(["hooks", "install"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Hooks installed successfully"));

    let settings: Value = serde_json::from_str(
        &fs::read_to_string(env.project().join(".claude/settings.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(
        settings["hooks"]["Stop"][0]["hooks"][0]["command"],
        "hive-hooks hooks run ralph-stop"
    );

    env.cmd()
        .args(["hooks", "audit", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"ok\""));
}

#[test]
fn cli_claims_use_denied_exit_code() {
    let env = Env::new();
    env.cmd()
        .args(["claims", "--agent", "alpha", "claim", "src/main.rs"])
        .assert()
        .success();
    env.cmd()
        .args(["claims", "--agent", "beta", "claim", "src/main.rs"])
        .assert()
        .code(6)
        .stderr(predicate::str::contains("alpha"));
    env.cmd()
        .args(["claims", "--format", "json", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("alpha"));
}

#[test]
fn hive_refusals_use_denied_exit_code() {
    let env = Env::new();
    env.cmd()
        .args(["hive", "start-task", "task-missing", "agent-missing"])
        .assert()
        .code(6);

    env.cmd().args(["hive", "init"]).assert().success();
    env.cmd()
        .args(["hive", "--format", "json", "register-agent", "coder", "--id", "coder-1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("coder-1"));
    env.cmd()
        .args(["hive", "--format", "json", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"agent_count\": 1"));
}

#[test]
fn schema_describes_config() {
    let env = Env::new();
    env.cmd()
        .args(["config", "schema"])
        .assert()
        .success()
        .stdout(predicate::str::contains("max_budget_usd"));
}

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::Context;

use crate::error::ExitError;

/// Result of running a subprocess.
#[derive(Debug)]
pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl RunOutput {
    /// Returns true if the process exited successfully.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout followed by stderr.
    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr.trim_end()),
            (false, true) => self.stdout.trim_end().to_string(),
            (true, _) => self.stderr.trim_end().to_string(),
        }
    }
}

/// Builder for running external commands.
pub struct Tool {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
    cwd: Option<PathBuf>,
}

impl Tool {
    /// Create a new tool invocation.
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            timeout: None,
            cwd: None,
        }
    }

    /// Run a command line through `sh -c`.
    pub fn shell(command_line: &str) -> Self {
        Self::new("sh").args(&["-c", command_line])
    }

    /// Add multiple arguments.
    pub fn args(mut self, args: &[&str]) -> Self {
        self.args.extend(args.iter().map(|s| s.to_string()));
        self
    }

    /// Set a timeout for the subprocess.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Run in `dir` instead of the current directory.
    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    /// Run the tool, capturing stdout and stderr.
    ///
    /// On timeout the child is killed and `ExitError::Timeout` is returned.
    pub fn run(&self) -> anyhow::Result<RunOutput> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        // own process group, so a timeout can take down everything the
        // command spawned, not just the shell
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let child = cmd.spawn().map_err(|e| self.not_found_or_other(e))?;
        let (stdout, stderr, exit_code) = match self.timeout {
            Some(timeout) => wait_with_timeout(child, timeout, &self.program)?,
            None => {
                let output = child
                    .wait_with_output()
                    .with_context(|| format!("waiting for {}", self.program))?;
                (output.stdout, output.stderr, output.status.code().unwrap_or(-1))
            }
        };

        Ok(RunOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code,
        })
    }

    fn not_found_or_other(&self, e: std::io::Error) -> anyhow::Error {
        if e.kind() == std::io::ErrorKind::NotFound {
            ExitError::ToolNotFound {
                tool: self.program.clone(),
            }
            .into()
        } else {
            anyhow::Error::new(e).context(format!("running {}", self.program))
        }
    }
}

/// Wait for `child`, killing it once `timeout` elapses.
///
/// Pipes are drained on background threads so a chatty child cannot block
/// on a full pipe while we poll.
fn wait_with_timeout(
    mut child: Child,
    timeout: Duration,
    tool_name: &str,
) -> anyhow::Result<(Vec<u8>, Vec<u8>, i32)> {
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let start = Instant::now();
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if start.elapsed() >= timeout {
                    kill_process_group(&child);
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(ExitError::Timeout {
                        tool: tool_name.to_string(),
                        timeout_secs: timeout.as_secs(),
                    }
                    .into());
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(e) => return Err(anyhow::Error::new(e).context(format!("waiting for {tool_name}"))),
        }
    };

    // background leftovers would otherwise hold the pipes open
    kill_process_group(&child);
    let stdout = stdout.join().unwrap_or_default();
    let stderr = stderr.join().unwrap_or_default();
    Ok((stdout, stderr, status.code().unwrap_or(-1)))
}

/// SIGKILL every process in the group led by `child`.
#[cfg(unix)]
fn kill_process_group(child: &Child) {
    let Ok(pgid) = i32::try_from(child.id()) else {
        return;
    };
    // SAFETY: kill(2) only signals; a negative pid targets the group that
    // `process_group(0)` created for this child.
    unsafe {
        libc::kill(-pgid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) {}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut r) = pipe {
            let _ = r.read_to_end(&mut buf);
        }
        buf
    })
}

/// Keep the last `limit` characters of `text`, marking the cut.
pub fn truncate_tail(text: &str, limit: usize) -> String {
    let count = text.chars().count();
    if count <= limit {
        return text.to_string();
    }
    let tail: String = text.chars().skip(count - limit).collect();
    format!("...[truncated]\n{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_echo() {
        let output = Tool::new("echo").args(&["hello"]).run().unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[test]
    fn run_false_fails() {
        let output = Tool::new("false").run().unwrap();
        assert!(!output.success());
    }

    #[test]
    fn run_not_found() {
        let result = Tool::new("nonexistent-tool-xyz").run();
        assert!(result.is_err());
        let err = result.unwrap_err();
        let exit_err = err.downcast_ref::<ExitError>().unwrap();
        assert!(matches!(exit_err, ExitError::ToolNotFound { .. }));
    }

    #[test]
    fn run_with_timeout_succeeds() {
        let output = Tool::new("echo")
            .args(&["fast"])
            .timeout(Duration::from_secs(5))
            .run()
            .unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "fast");
    }

    #[test]
    fn run_with_timeout_kills_slow_process() {
        let started = Instant::now();
        let err = Tool::new("sleep")
            .args(&["5"])
            .timeout(Duration::from_millis(200))
            .run()
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ExitError>(),
            Some(ExitError::Timeout { .. })
        ));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn timeout_kills_background_children_too() {
        let temp = tempfile::tempdir().unwrap();
        let marker = temp.path().join("survivor");
        let script = format!("(sleep 1; touch {}) & sleep 30", marker.display());
        let err = Tool::shell(&script)
            .timeout(Duration::from_millis(200))
            .run()
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ExitError>(),
            Some(ExitError::Timeout { .. })
        ));
        std::thread::sleep(Duration::from_millis(1500));
        assert!(!marker.exists(), "background child outlived the timeout");
    }

    #[test]
    fn exited_command_does_not_wait_on_background_children() {
        let started = Instant::now();
        let output = Tool::shell("sleep 30 & echo done")
            .timeout(Duration::from_secs(10))
            .run()
            .unwrap();
        assert_eq!(output.stdout.trim(), "done");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn shell_runs_in_current_dir() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("marker.txt"), "x").unwrap();
        let output = Tool::shell("ls && echo oops >&2 && exit 3")
            .current_dir(temp.path())
            .timeout(Duration::from_secs(5))
            .run()
            .unwrap();
        assert_eq!(output.exit_code, 3);
        assert!(output.stdout.contains("marker.txt"));
        assert!(output.combined().contains("oops"));
    }

    #[test]
    fn large_output_does_not_deadlock() {
        let output = Tool::shell("head -c 200000 /dev/zero | tr '\\0' a")
            .timeout(Duration::from_secs(10))
            .run()
            .unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.len(), 200_000);
    }

    #[test]
    fn truncate_tail_keeps_end() {
        assert_eq!(truncate_tail("short", 10), "short");
        let cut = truncate_tail("abcdefghij", 3);
        assert!(cut.ends_with("hij"));
        assert!(cut.starts_with("...[truncated]"));
    }
}

use std::path::PathBuf;
use std::process::ExitCode;

/// Errors that cause hive-hooks to exit with a specific code.
#[derive(Debug, thiserror::Error)]
pub enum ExitError {
    #[error("config error: {0}")]
    Config(String),

    #[error("tool not found: {tool}")]
    ToolNotFound { tool: String },

    #[error("{tool} timed out after {timeout_secs}s")]
    Timeout { tool: String, timeout_secs: u64 },

    #[error("denied: {0}")]
    Denied(String),

    #[error("audit failed")]
    AuditFailed,
}

impl ExitError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            ExitError::Config(_) => ExitCode::from(2),
            ExitError::ToolNotFound { .. } => ExitCode::from(3),
            ExitError::Timeout { .. } => ExitCode::from(5),
            ExitError::Denied(_) => ExitCode::from(6),
            ExitError::AuditFailed => ExitCode::from(7),
        }
    }
}

/// Infrastructure fault while touching shared state on disk.
///
/// Faults never reach the host: each public operation maps them to an
/// explicit default at its call site (see [`FailOpen`]).
#[derive(Debug, thiserror::Error)]
pub enum Fault {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt state in {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize state for {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl Fault {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Fault::Io {
            path: path.into(),
            source,
        }
    }

    pub fn path(&self) -> &std::path::Path {
        match self {
            Fault::Io { path, .. } | Fault::Corrupt { path, .. } | Fault::Serialize { path, .. } => {
                path
            }
        }
    }
}

/// Map an infrastructure fault to the caller's chosen default.
pub trait FailOpen<T> {
    /// Return the value, or log the fault and return `default`.
    fn fail_open(self, operation: &str, default: T) -> T;

    /// Like [`FailOpen::fail_open`] with a lazily built default.
    fn fail_open_with(self, operation: &str, default: impl FnOnce() -> T) -> T;
}

impl<T> FailOpen<T> for Result<T, Fault> {
    fn fail_open(self, operation: &str, default: T) -> T {
        self.fail_open_with(operation, || default)
    }

    fn fail_open_with(self, operation: &str, default: impl FnOnce() -> T) -> T {
        match self {
            Ok(value) => value,
            Err(fault) => {
                tracing::warn!(
                    operation,
                    path = %fault.path().display(),
                    error = %fault,
                    "state fault, failing open"
                );
                default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fail_open_passes_through_ok() {
        let result: Result<u32, Fault> = Ok(7);
        assert_eq!(result.fail_open("test", 0), 7);
    }

    #[test]
    fn fail_open_returns_default_on_fault() {
        let result: Result<u32, Fault> = Err(Fault::io(
            "/nonexistent/claims.json",
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        ));
        assert_eq!(result.fail_open("test", 42), 42);
    }

    #[test]
    fn fault_reports_path() {
        let fault = Fault::io("/tmp/x.json", std::io::Error::other("boom"));
        assert_eq!(fault.path(), std::path::Path::new("/tmp/x.json"));
        assert!(fault.to_string().contains("/tmp/x.json"));
    }

    #[test]
    fn exit_codes_are_distinct() {
        assert_eq!(ExitError::Config("x".into()).exit_code(), ExitCode::from(2));
        assert_eq!(ExitError::Denied("x".into()).exit_code(), ExitCode::from(6));
        assert_eq!(ExitError::AuditFailed.exit_code(), ExitCode::from(7));
    }
}

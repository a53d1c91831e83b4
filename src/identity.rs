//! Agent identity resolution.
//!
//! Every hook invocation is a fresh process, so the "same agent" has to be
//! recognised from something that survives restarts: an environment
//! variable, the host's session id, or a persisted session-id file.

use std::fs;
use std::path::Path;

use rand::Rng;
use tracing::debug;

use crate::error::Fault;

/// Explicit identity override.
pub const AGENT_ID_ENV: &str = "HIVE_HOOKS_AGENT_ID";
/// Session id exported by the host.
pub const SESSION_ID_ENV: &str = "CLAUDE_SESSION_ID";

/// Resolve the identity for this invocation.
///
/// Order: `HIVE_HOOKS_AGENT_ID`, the payload's `session_id`,
/// `CLAUDE_SESSION_ID`, then the persisted session-id file (created when
/// absent).
pub fn resolve(payload_session: Option<&str>, session_file: &Path) -> Result<String, Fault> {
    let from_env = |key: &str| {
        std::env::var(key)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| validate_identity(v))
    };

    if let Some(id) = from_env(AGENT_ID_ENV) {
        return Ok(id);
    }
    if let Some(id) = payload_session.map(str::trim).filter(|v| validate_identity(v)) {
        return Ok(id.to_string());
    }
    if let Some(id) = from_env(SESSION_ID_ENV) {
        return Ok(id);
    }
    persisted_session_id(session_file)
}

/// Read the persisted session id, creating one if the file is missing or
/// holds garbage.
pub fn persisted_session_id(path: &Path) -> Result<String, Fault> {
    match fs::read_to_string(path) {
        Ok(contents) => {
            let id = contents.trim();
            if validate_identity(id) {
                return Ok(id.to_string());
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(Fault::io(path, e)),
    }

    let id = generate_id("session");
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Fault::io(parent, e))?;
    }
    fs::write(path, format!("{id}\n")).map_err(|e| Fault::io(path, e))?;
    debug!(session_id = %id, path = %path.display(), "created session id");
    Ok(id)
}

/// Generate `<prefix>-<unix millis>-<6 hex chars>`.
pub fn generate_id(prefix: &str) -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let suffix: u32 = rand::rng().random_range(0..0x0100_0000);
    format!("{prefix}-{millis}-{suffix:06x}")
}

/// Identities are opaque but must be printable and reasonably short.
fn validate_identity(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b':' | b'/'))
}

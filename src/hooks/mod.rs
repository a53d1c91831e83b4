mod input;
mod registry;
mod run;

pub use input::{Decision, HookInput, HookOutput};
pub use registry::{HookEntry, HookEvent, HookRegistry, WRITE_TOOLS_MATCHER};
pub use run::{HookContext, claim_file, dispatch, ralph_stop, release_claims, track_task};

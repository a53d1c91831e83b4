//! Template rendering for the loop continuation prompt and progress notes.

use minijinja::Environment;
use serde::Serialize;

const CONTINUATION_TEMPLATE: &str = include_str!("templates/continuation.md.jinja");
const PROGRESS_ENTRY_TEMPLATE: &str = include_str!("templates/progress-entry.md.jinja");

/// One validation phase as shown to the agent.
#[derive(Debug, Serialize, Clone)]
pub struct PhaseLine {
    pub name: String,
    pub detail: String,
}

/// Context for the prompt re-injected when a stop is blocked.
#[derive(Debug, Serialize)]
pub struct ContinuationContext {
    pub prompt: String,
    pub iteration: u32,
    pub max_iterations: u32,
    /// `pass` or `fail`
    pub ci: String,
    /// Dollar amounts, already formatted.
    pub spent: String,
    pub budget: String,
    pub failing: Vec<PhaseLine>,
    pub progress_file: Option<String>,
}

/// Context for one section of the per-project progress file.
#[derive(Debug, Serialize)]
pub struct ProgressContext {
    pub iteration: u32,
    pub timestamp: String,
    pub outcome: String,
    pub ci: String,
    pub phases: Vec<PhaseLine>,
    pub reason: Option<String>,
}

fn environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    env
}

fn render<S: Serialize>(name: &'static str, source: &'static str, ctx: &S) -> anyhow::Result<String> {
    let mut env = environment();
    env.add_template(name, source)?;
    let template = env.get_template(name)?;
    Ok(template.render(ctx)?)
}

/// Render the continuation prompt: the original task plus a status block.
pub fn render_continuation(ctx: &ContinuationContext) -> anyhow::Result<String> {
    render("continuation", CONTINUATION_TEMPLATE, ctx).map(|s| s.trim_end().to_string())
}

/// Render a progress-file entry (leading blank line included).
pub fn render_progress_entry(ctx: &ProgressContext) -> anyhow::Result<String> {
    render("progress-entry", PROGRESS_ENTRY_TEMPLATE, ctx)
}

/// Status line used in `systemMessage` and as a render fallback.
pub fn status_line(ctx: &ContinuationContext) -> String {
    format!(
        "[ralph loop] iteration {}/{} | CI: {} | budget ${}/${}",
        ctx.iteration, ctx.max_iterations, ctx.ci, ctx.spent, ctx.budget
    )
}

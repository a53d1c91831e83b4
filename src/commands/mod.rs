pub mod claims;
pub mod config;
pub mod hive;
pub mod hooks;
pub mod ralph;

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Serialize;

use crate::config::Config;
use crate::error::ExitError;
use crate::identity;
use crate::layout::StateLayout;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Pretty,
    Json,
}

/// Resolved project, config, and state root for an administrative command.
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub project_dir: PathBuf,
    pub config: Config,
    pub config_path: Option<PathBuf>,
    pub layout: StateLayout,
}

impl CommandContext {
    pub fn load(project_root: Option<&Path>) -> anyhow::Result<Self> {
        let project_dir = resolve_project_dir(project_root)?;
        let (config, config_path) =
            Config::resolve(&project_dir).map_err(|e| ExitError::Config(format!("{e:#}")))?;
        let layout = StateLayout::new(config.state_root());
        Ok(Self {
            project_dir,
            config,
            config_path,
            layout,
        })
    }

    /// `--agent` if given, otherwise the same identity a hook would use.
    pub fn agent_id(&self, explicit: Option<&str>) -> anyhow::Result<String> {
        if let Some(agent) = explicit {
            return Ok(agent.to_string());
        }
        Ok(identity::resolve(None, &self.layout.session_id())?)
    }
}

pub fn resolve_project_dir(project_root: Option<&Path>) -> anyhow::Result<PathBuf> {
    let path = match project_root {
        Some(p) => p.to_path_buf(),
        None => std::env::current_dir().context("reading current directory")?,
    };
    path.canonicalize()
        .with_context(|| format!("resolving project root: {}", path.display()))
}

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

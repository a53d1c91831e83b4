use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;
use schemars::schema_for;
use serde_json::json;

use super::{CommandContext, OutputFormat, print_json, resolve_project_dir};
use crate::config::{CONFIG_TOML, Config, USER_CONFIG_TOML, default_state_root};
use crate::error::ExitError;

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Write a commented config file with every default spelled out
    Init {
        /// Project root directory
        #[arg(long)]
        project_root: Option<PathBuf>,
        /// Write the user-wide config under the state root instead
        #[arg(long)]
        user: bool,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Show the effective config and where it came from
    Show {
        /// Project root directory
        #[arg(long)]
        project_root: Option<PathBuf>,
        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Pretty)]
        format: OutputFormat,
    },
    /// Print the JSON Schema for .hive-hooks.toml
    Schema,
}

impl ConfigCommand {
    pub fn execute(&self) -> Result<()> {
        match self {
            ConfigCommand::Init {
                project_root,
                user,
                force,
            } => {
                let path = if *user {
                    default_state_root().join(USER_CONFIG_TOML)
                } else {
                    resolve_project_dir(project_root.as_deref())?.join(CONFIG_TOML)
                };
                if path.exists() && !force {
                    return Err(ExitError::Config(format!(
                        "{} already exists (use --force to overwrite)",
                        path.display()
                    ))
                    .into());
                }
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("creating {}", parent.display()))?;
                }
                std::fs::write(&path, Config::default().to_toml()?)
                    .with_context(|| format!("writing {}", path.display()))?;
                println!("Wrote {}", path.display());
                Ok(())
            }
            ConfigCommand::Show {
                project_root,
                format,
            } => {
                let ctx = CommandContext::load(project_root.as_deref())?;
                match format {
                    OutputFormat::Json => print_json(&json!({
                        "source": ctx.config_path,
                        "state_root": ctx.layout.root(),
                        "config": ctx.config,
                    })),
                    OutputFormat::Pretty => {
                        match &ctx.config_path {
                            Some(path) => println!("# source: {}", path.display()),
                            None => println!("# source: built-in defaults"),
                        }
                        println!("# state root: {}", ctx.layout.root().display());
                        print!("{}", ctx.config.to_toml()?);
                        Ok(())
                    }
                }
            }
            ConfigCommand::Schema => print_json(&schema_for!(Config)),
        }
    }
}

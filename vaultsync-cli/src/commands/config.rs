//! `vaultsync config --validate | --create | --show`

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Args};
use colored::Colorize;

use vaultsync_core::{AppConfig, ConfigError};

use crate::{logging, GlobalArgs};

/// Arguments for `vaultsync config`.
#[derive(Args, Debug)]
#[command(group(ArgGroup::new("action").required(true).args(["validate", "create", "show"])))]
pub struct ConfigArgs {
    /// Load the config, apply environment overrides and report every problem.
    #[arg(long)]
    pub validate: bool,

    /// Write a default config file to fill in.
    #[arg(long)]
    pub create: bool,

    /// Print the effective config with the API token masked.
    #[arg(long)]
    pub show: bool,

    /// Target for `--create` (default: the resolved config path).
    #[arg(long, value_name = "PATH", requires = "create")]
    pub output: Option<PathBuf>,

    /// Overwrite an existing file with `--create`.
    #[arg(long, requires = "create")]
    pub force: bool,
}

impl ConfigArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<ExitCode> {
        logging::init_tracing("warn", global.verbose, global.log_file.as_deref())?;
        let path = AppConfig::resolve_path(global.config.as_deref())
            .context("could not determine the config path")?;

        if self.create {
            let target = self.output.unwrap_or(path);
            if target.exists() && !self.force {
                bail!(
                    "{} already exists; pass --force to overwrite",
                    target.display()
                );
            }
            AppConfig::default()
                .save_to(&target)
                .with_context(|| format!("failed to write {}", target.display()))?;
            println!("✓ wrote {}", target.display());
            println!("  Set source.api_token, source.database_id and destination.vault_path,");
            println!("  or export VAULTSYNC_API_TOKEN / VAULTSYNC_DATABASE_ID / VAULTSYNC_VAULT_PATH.");
            return Ok(ExitCode::SUCCESS);
        }

        if self.show {
            let mut config = AppConfig::load_from(&path)
                .with_context(|| format!("failed to load {}", path.display()))?;
            config.apply_env_overrides(|key| std::env::var(key).ok());
            config.source.api_token = mask_token(&config.source.api_token);
            println!("# {}", path.display());
            print!("{}", config.to_yaml().context("failed to serialize config")?);
            return Ok(ExitCode::SUCCESS);
        }

        match AppConfig::resolve(Some(&path)) {
            Ok(_) => {
                println!("{} {} is valid", "✓".green(), path.display());
                Ok(ExitCode::SUCCESS)
            }
            Err(ConfigError::Invalid { errors }) => {
                println!("{} {} has {} problem(s):", "✗".red(), path.display(), errors.len());
                for e in errors {
                    println!("  - {e}");
                }
                Ok(ExitCode::FAILURE)
            }
            Err(e) => Err(e).with_context(|| format!("failed to load {}", path.display())),
        }
    }
}

/// Keep a short prefix so users can tell tokens apart.
fn mask_token(token: &str) -> String {
    if token.is_empty() {
        return String::new();
    }
    let prefix: String = token.chars().take(6).collect();
    format!("{prefix}…")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_masked() {
        assert_eq!(mask_token("secret_abcdef123456"), "secret…");
        assert_eq!(mask_token(""), "");
    }
}

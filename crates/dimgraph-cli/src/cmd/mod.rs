//! Subcommand handlers.
//!
//! Each handler takes its parsed arguments and a [`Context`] describing where
//! the repository lives and how to print.

pub mod check;
pub mod dimensions;
pub mod subscriptions;
pub mod workspace;

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use dimgraph_core::error::ErrorCode;
use dimgraph_core::repository::PROJECTION_DB_FILE;
use dimgraph_core::{ContentRepository, RepositoryConfig};
use tracing::debug;

use crate::output::{Coded, OutputMode};

/// Resolved global options shared by every subcommand.
#[derive(Debug, Clone)]
pub struct Context {
    /// Directory holding the event log and projection databases.
    pub dir: PathBuf,
    /// Repository configuration file.
    pub config_path: PathBuf,
    pub output: OutputMode,
}

impl Context {
    /// Load the configuration; a missing file yields the defaults.
    pub fn config(&self) -> anyhow::Result<RepositoryConfig> {
        RepositoryConfig::load_or_default(&self.config_path)
            .with_context(|| format!("load {}", self.config_path.display()))
    }

    /// Open a repository that `dg setup` has already created.
    pub fn open(&self) -> anyhow::Result<ContentRepository> {
        if !is_set_up(&self.dir) {
            return Err(Coded(
                ErrorCode::NotSetUp,
                format!("no repository in {}", self.dir.display()),
            )
            .into());
        }
        self.open_or_create()
    }

    /// Open the repository, creating its databases when missing.
    pub fn open_or_create(&self) -> anyhow::Result<ContentRepository> {
        let config = self.config()?;
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("create {}", self.dir.display()))?;
        debug!(dir = %self.dir.display(), "opening repository");
        ContentRepository::open(config, &self.dir)
    }
}

fn is_set_up(dir: &Path) -> bool {
    dir.join(PROJECTION_DB_FILE).is_file()
}

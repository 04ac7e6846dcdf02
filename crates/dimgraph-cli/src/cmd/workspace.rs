//! `dg workspaces`, `dg workspace ...` and `dg prune`.

use std::io::Write;

use clap::{Args, Subcommand};
use dimgraph_core::RebaseStrategy;
use dimgraph_core::model::{ContentStreamId, WorkspaceName};
use dimgraph_core::projection::WorkspaceRecord;
use serde::Serialize;

use super::Context;
use crate::output::{kv, render};

#[derive(Subcommand, Debug)]
pub enum WorkspaceCommand {
    /// Create a root workspace on a new, empty content stream.
    CreateRoot(NameArgs),
    /// Create a workspace forked from its base.
    Create(CreateArgs),
    /// Publish all changes of a workspace to its base.
    Publish(NameArgs),
    /// Drop all changes of a workspace.
    Discard(NameArgs),
    /// Replay the changes of a workspace on top of its base.
    Rebase(RebaseArgs),
    /// Remove a workspace without dependents.
    Delete(NameArgs),
}

#[derive(Args, Debug)]
pub struct NameArgs {
    pub name: WorkspaceName,
}

#[derive(Args, Debug)]
pub struct CreateArgs {
    pub name: WorkspaceName,

    /// Workspace to fork from.
    #[arg(long, default_value = "live")]
    pub base: WorkspaceName,
}

#[derive(Args, Debug)]
pub struct RebaseArgs {
    pub name: WorkspaceName,

    /// Drop commands that fail on the new base instead of aborting.
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WorkspaceView {
    name: String,
    base: Option<String>,
    content_stream_id: String,
    status: &'static str,
}

impl From<&WorkspaceRecord> for WorkspaceView {
    fn from(record: &WorkspaceRecord) -> Self {
        Self {
            name: record.name.to_string(),
            base: record.base.as_ref().map(ToString::to_string),
            content_stream_id: record.content_stream_id.to_string(),
            status: record.status.as_str(),
        }
    }
}

/// # Errors
///
/// Returns an error if the repository is not set up.
pub fn run_list(ctx: &Context) -> anyhow::Result<()> {
    let repo = ctx.open()?;
    let views: Vec<WorkspaceView> = repo.workspaces()?.iter().map(WorkspaceView::from).collect();
    render(ctx.output, &views, |views, w| {
        for v in views {
            writeln!(
                w,
                "{:<20} base={:<12} {:<10} {}",
                v.name,
                v.base.as_deref().unwrap_or("-"),
                v.status,
                v.content_stream_id
            )?;
        }
        Ok(())
    })
}

/// # Errors
///
/// Returns an error if the repository is not set up or the operation is
/// rejected.
pub fn run_workspace(command: &WorkspaceCommand, ctx: &Context) -> anyhow::Result<()> {
    let mut repo = ctx.open()?;
    let mut manager = repo.workspace_manager();
    let (name, action) = match command {
        WorkspaceCommand::CreateRoot(args) => {
            manager.create_root_workspace(&args.name, &ContentStreamId::generate())?;
            (&args.name, "created")
        }
        WorkspaceCommand::Create(args) => {
            manager.create_workspace(&args.name, &args.base, &ContentStreamId::generate())?;
            (&args.name, "created")
        }
        WorkspaceCommand::Publish(args) => {
            manager.publish_workspace(&args.name, &ContentStreamId::generate())?;
            (&args.name, "published")
        }
        WorkspaceCommand::Discard(args) => {
            manager.discard_workspace(&args.name, &ContentStreamId::generate())?;
            (&args.name, "discarded")
        }
        WorkspaceCommand::Rebase(args) => {
            let strategy = if args.force {
                RebaseStrategy::Force
            } else {
                RebaseStrategy::FailOnConflict
            };
            let rebased =
                manager.rebase_workspace(&args.name, &ContentStreamId::generate(), strategy)?;
            (&args.name, if rebased { "rebased" } else { "up to date" })
        }
        WorkspaceCommand::Delete(args) => {
            manager.delete_workspace(&args.name)?;
            (&args.name, "deleted")
        }
    };

    let record = repo.workspace(name)?;
    let value = serde_json::json!({
        "workspace": name.as_str(),
        "action": action,
        "current": record.as_ref().map(WorkspaceView::from),
    });
    render(ctx.output, &value, |_, w| {
        kv(w, "workspace", name.as_str())?;
        kv(w, "action", action)?;
        if let Some(record) = &record {
            kv(w, "stream", record.content_stream_id.as_str())?;
            kv(w, "status", record.status.as_str())?;
        }
        Ok(())
    })
}

/// Remove content streams no workspace uses anymore.
///
/// # Errors
///
/// Returns an error if the repository is not set up or removal fails.
pub fn run_prune(ctx: &Context) -> anyhow::Result<()> {
    let mut repo = ctx.open()?;
    let removed = repo.workspace_manager().prune_content_streams()?;
    let ids: Vec<String> = removed.iter().map(ToString::to_string).collect();
    render(ctx.output, &ids, |ids, w| {
        writeln!(w, "pruned {} content stream(s)", ids.len())?;
        for id in ids {
            writeln!(w, "  {id}")?;
        }
        Ok(())
    })
}

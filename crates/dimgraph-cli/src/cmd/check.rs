//! `dg check`: report, and optionally repair, structural problems in the
//! content graph of a workspace.

use std::io::Write;

use clap::Args;
use dimgraph_core::CommandError;
use dimgraph_core::graph::Adjustment;
use dimgraph_core::model::WorkspaceName;
use serde::Serialize;
use tracing::info;

use super::Context;
use crate::output::render;

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Workspace whose content stream is checked.
    #[arg(long, short, default_value = "live")]
    pub workspace: WorkspaceName,

    /// Append the remediation of every fixable problem.
    #[arg(long)]
    pub apply: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckView {
    workspace: String,
    content_stream_id: String,
    applied: usize,
    adjustments: Vec<serde_json::Value>,
}

/// # Errors
///
/// Returns an error if the repository is not set up, the workspace does not
/// exist, or a remediation cannot be appended.
pub fn run_check(args: &CheckArgs, ctx: &Context) -> anyhow::Result<()> {
    let mut repo = ctx.open()?;
    let workspace = repo
        .workspace(&args.workspace)?
        .ok_or_else(|| CommandError::WorkspaceDoesNotExist(args.workspace.clone()))?;
    let content_stream_id = workspace.content_stream_id;

    let mut adjustments = repo.check_integrity(&content_stream_id)?;
    let mut applied = 0;
    if args.apply {
        for adjustment in adjustments.iter().filter(|a| a.is_remediable()) {
            if repo.apply_adjustment(&content_stream_id, adjustment)?.is_some() {
                applied += 1;
            }
        }
        if applied > 0 {
            info!(applied, workspace = %args.workspace, "applied structure adjustments");
            adjustments = repo.check_integrity(&content_stream_id)?;
        }
    }

    let view = CheckView {
        workspace: args.workspace.to_string(),
        content_stream_id: content_stream_id.to_string(),
        applied,
        adjustments: adjustments.iter().map(Adjustment::to_json).collect(),
    };
    render(ctx.output, &view, |v, w| {
        if v.applied > 0 {
            writeln!(w, "applied {} adjustment(s)", v.applied)?;
        }
        if adjustments.is_empty() {
            return writeln!(w, "{}: no structural problems", v.workspace);
        }
        for adjustment in &adjustments {
            let fix = if adjustment.is_remediable() { " (fixable)" } else { "" };
            writeln!(w, "{}: {}{fix}", adjustment.kind.as_str(), adjustment.message)?;
        }
        Ok(())
    })
}

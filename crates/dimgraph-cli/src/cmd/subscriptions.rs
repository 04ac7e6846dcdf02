//! `dg setup`, `dg catch-up`, `dg status` and `dg reset`.

use std::io::Write;

use clap::Args;
use dimgraph_core::subscription::{CatchUpReport, Subscription};
use serde::Serialize;

use super::Context;
use crate::output::{kv, render};

#[derive(Args, Debug)]
pub struct ResetArgs {
    /// Subscription to rebuild, e.g. `content_graph`.
    pub subscription: String,
}

/// Catch-up summary as printed by the CLI.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReportView {
    head: u64,
    batches: usize,
    events_applied: usize,
    failed: Vec<String>,
    detached: Vec<String>,
}

impl From<&CatchUpReport> for ReportView {
    fn from(report: &CatchUpReport) -> Self {
        Self {
            head: report.head.value(),
            batches: report.batches,
            events_applied: report.events_applied,
            failed: report.failed.clone(),
            detached: report.detached.clone(),
        }
    }
}

fn render_report(ctx: &Context, report: &CatchUpReport) -> anyhow::Result<()> {
    render(ctx.output, &ReportView::from(report), |r, w| {
        kv(w, "head", r.head.to_string())?;
        kv(w, "batches", r.batches.to_string())?;
        kv(w, "applied", r.events_applied.to_string())?;
        if !r.failed.is_empty() {
            kv(w, "failed", r.failed.join(", "))?;
        }
        if !r.detached.is_empty() {
            kv(w, "detached", r.detached.join(", "))?;
        }
        Ok(())
    })
}

/// Create the databases, register the projections and catch them up.
///
/// # Errors
///
/// Returns an error if the repository cannot be opened or catch-up fails.
pub fn run_setup(ctx: &Context) -> anyhow::Result<()> {
    let mut repo = ctx.open_or_create()?;
    let report = repo.catch_up()?;
    render_report(ctx, &report)
}

/// # Errors
///
/// Returns an error if the repository is not set up or catch-up fails.
pub fn run_catch_up(ctx: &Context) -> anyhow::Result<()> {
    let mut repo = ctx.open()?;
    let report = repo.catch_up()?;
    render_report(ctx, &report)
}

/// # Errors
///
/// Returns an error if the repository is not set up or the subscription is
/// unknown.
pub fn run_reset(args: &ResetArgs, ctx: &Context) -> anyhow::Result<()> {
    let mut repo = ctx.open()?;
    let report = repo.reset(&args.subscription)?;
    render_report(ctx, &report)
}

/// # Errors
///
/// Returns an error if the repository is not set up.
pub fn run_status(ctx: &Context) -> anyhow::Result<()> {
    let repo = ctx.open()?;
    let subscriptions = repo.subscriptions()?;
    let json: Vec<serde_json::Value> = subscriptions.iter().map(Subscription::to_json).collect();
    render(ctx.output, &json, |_, w| {
        for s in &subscriptions {
            write!(
                w,
                "{:<16} {:<9} {:<14} position={}",
                s.id,
                s.status.as_str(),
                s.run_mode.as_str(),
                s.position.value()
            )?;
            if let Some(err) = &s.error {
                write!(w, " retry={} error={}", s.retry_attempt, err.message)?;
            }
            writeln!(w)?;
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_view_uses_camel_case() {
        let report = CatchUpReport {
            events_applied: 3,
            failed: vec!["content_graph".to_string()],
            ..CatchUpReport::default()
        };
        let json = serde_json::to_value(ReportView::from(&report)).expect("serialize");
        assert_eq!(json["eventsApplied"], 3);
        assert_eq!(json["failed"][0], "content_graph");
    }
}

//! `dg dimensions`: inspect the configured dimension space.
//!
//! Without `--point`, lists the dimensions and every allowed point with its
//! weight. With `--point`, shows how that point falls back and what falls
//! back to it.

use std::collections::BTreeMap;
use std::io::Write;

use anyhow::Context as _;
use clap::Args;
use dimgraph_core::dimension::{DimensionSpacePoint, InterDimensionalVariationGraph};
use dimgraph_core::error::ErrorCode;
use serde::Serialize;

use super::Context;
use crate::output::{Coded, render};

#[derive(Args, Debug)]
pub struct DimensionsArgs {
    /// Point to inspect, as `dimension=value[,dimension=value...]`.
    #[arg(long)]
    pub point: Option<String>,
}

#[derive(Debug, Serialize)]
struct DimensionView {
    id: String,
    /// Value to its generalization, `None` for root values.
    values: BTreeMap<String, Option<String>>,
}

#[derive(Debug, Serialize)]
struct PointView {
    point: DimensionSpacePoint,
    weight: u64,
}

#[derive(Debug, Serialize)]
struct SpaceView {
    dimensions: Vec<DimensionView>,
    points: Vec<PointView>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FallbackView {
    point: DimensionSpacePoint,
    primary_generalization: Option<DimensionSpacePoint>,
    /// `(fallback depth, point)`, nearest first.
    generalizations: Vec<(u64, DimensionSpacePoint)>,
    specializations: Vec<DimensionSpacePoint>,
}

/// Parse `language=de,market=ch` into a point.
fn parse_point(raw: &str) -> anyhow::Result<DimensionSpacePoint> {
    let pairs = raw
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .ok_or_else(|| {
                    Coded(
                        ErrorCode::InvalidCommand,
                        format!("expected dimension=value, got '{part}'"),
                    )
                })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(DimensionSpacePoint::from_pairs(pairs))
}

fn space_view(graph: &InterDimensionalVariationGraph) -> SpaceView {
    let dimensions = graph
        .source()
        .dimensions()
        .iter()
        .map(|d| DimensionView {
            id: d.id.clone(),
            values: d
                .values()
                .map(|v| (v.value.clone(), v.generalization.clone()))
                .collect(),
        })
        .collect();
    let points = graph
        .allowed_dimension_subspace()
        .iter()
        .map(|p| PointView {
            point: p.clone(),
            weight: graph.weight(p).unwrap_or_default(),
        })
        .collect();
    SpaceView { dimensions, points }
}

fn fallback_view(
    graph: &InterDimensionalVariationGraph,
    point: DimensionSpacePoint,
) -> anyhow::Result<FallbackView> {
    graph
        .require_allowed(&point)
        .map_err(|err| Coded(ErrorCode::DimensionSpaceViolation, err.to_string()))?;
    Ok(FallbackView {
        primary_generalization: graph.primary_generalization(&point).cloned(),
        generalizations: graph.weighted_generalizations(&point),
        specializations: graph.specializations(&point).into_iter().collect(),
        point,
    })
}

/// # Errors
///
/// Returns an error if the configuration is invalid or `--point` is not an
/// allowed point.
pub fn run_dimensions(args: &DimensionsArgs, ctx: &Context) -> anyhow::Result<()> {
    let model = ctx
        .config()?
        .content_model()
        .context("build dimension space")?;
    let graph = &model.variation_graph;

    if let Some(raw) = &args.point {
        let view = fallback_view(graph, parse_point(raw)?)?;
        return render(ctx.output, &view, |v, w| {
            writeln!(w, "point: {}", v.point)?;
            if let Some(primary) = &v.primary_generalization {
                writeln!(w, "primary: {primary}")?;
            }
            for (depth, general) in &v.generalizations {
                writeln!(w, "  falls back to {general} (depth {depth})")?;
            }
            for special in &v.specializations {
                writeln!(w, "  specialized by {special}")?;
            }
            Ok(())
        });
    }

    render(ctx.output, &space_view(graph), |v, w| {
        for dimension in &v.dimensions {
            writeln!(w, "{}", dimension.id)?;
            for (value, general) in &dimension.values {
                match general {
                    Some(general) => writeln!(w, "  {value} -> {general}")?,
                    None => writeln!(w, "  {value}")?,
                }
            }
        }
        writeln!(w, "{} allowed points", v.points.len())?;
        for p in &v.points {
            writeln!(w, "  {} weight={}", p.point, p.weight)?;
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_points() {
        let point = parse_point("language=de, market=ch").expect("parse");
        assert_eq!(point.coordinate("language"), Some("de"));
        assert_eq!(point.coordinate("market"), Some("ch"));
        assert!(parse_point("").expect("empty").is_empty());
    }

    #[test]
    fn rejects_malformed_points() {
        assert!(parse_point("language").is_err());
    }
}

//! Dimension space: points, dimensions and the variation graph.

pub mod point;
pub mod source;
pub mod variation;

pub use point::{
    DimensionSpacePoint, DimensionSpacePointSet, OriginDimensionSpacePoint,
    OriginDimensionSpacePointSet,
};
pub use source::{
    ContentDimension, ContentDimensionSource, ContentDimensionValue, DimensionConfig,
    DimensionConfigError, DimensionValueConfig,
};
pub use variation::{DimensionSpaceError, InterDimensionalVariationGraph, VariantType};

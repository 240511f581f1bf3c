//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::{Box3d, Idx3d};

pub use crate::data::{
    downscale_mean, open_source, ArraySource, CoarseMask, MaskParams, NiftiSource, NpySource,
    SliceStackSource, SourceError, SourceResult, VolumeSource,
};

pub use crate::consts::defaults;
pub use crate::consts::gray::{ALVEOLUS, BACKGROUND};

pub use crate::skeleton::{Branch, BranchType, SkeletonGraph};

pub use crate::pipeline::{
    AggregatedResult, CancelHandle, OutputFormat, Pipeline, PipelineConfig, PipelineError,
    PipelineResult, Report, RunStats, SegmentOutcome, SegmentParams, Segmenter,
    SurfaceEstimator, Tile, VoxelSize,
};

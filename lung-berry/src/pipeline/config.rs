//! 流水线配置.

use super::error::{PipelineError, PipelineResult};
use super::morphometry::SurfaceEstimator;
use super::report::VoxelSize;
use super::segment::SegmentParams;
use crate::consts::defaults;
use crate::data::scale::scaled_len;
use crate::Idx3d;

/// 流水线配置.
///
/// 亮度阈值与肺泡体积上下限必须由使用者给出, 其余参数均有默认值,
/// 可通过 `with_*` 系列方法修改.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PipelineConfig {
    /// 工作分辨率下的分块边长.
    pub tile_size: usize,

    /// 全分辨率到工作分辨率的缩小倍数 `[z, y, x]`.
    pub factors: [f64; 3],

    /// 重采样时每次读取的工作分辨率 z 行数.
    pub slab_rows: usize,

    /// 并行处理分块的线程数. 未打开 `rayon` feature 时被忽略.
    pub workers: usize,

    /// 单个分块的分割参数.
    pub segment: SegmentParams,

    /// 表面积估计方法.
    pub surface: SurfaceEstimator,

    /// 工作分辨率下的体素尺寸, 仅用于报告.
    pub voxel_size: VoxelSize,
}

impl PipelineConfig {
    /// 指定必需参数, 其余参数取默认值.
    pub fn new(threshold: f32, min_size: usize, max_size: usize) -> Self {
        Self {
            tile_size: defaults::TILE_SIZE,
            factors: [defaults::Z_FACTOR, defaults::XY_FACTOR, defaults::XY_FACTOR],
            slab_rows: defaults::SLAB_ROWS,
            workers: 1,
            segment: SegmentParams::new(threshold, min_size, max_size),
            surface: SurfaceEstimator::default(),
            voxel_size: VoxelSize::default(),
        }
    }

    /// 修改分块边长.
    pub fn with_tile_size(mut self, tile_size: usize) -> Self {
        self.tile_size = tile_size;
        self
    }

    /// 修改缩小倍数. 参数顺序为 z, y, x.
    pub fn with_factors(mut self, factors: [f64; 3]) -> Self {
        self.factors = factors;
        self
    }

    /// 修改重采样分片行数.
    pub fn with_slab_rows(mut self, slab_rows: usize) -> Self {
        self.slab_rows = slab_rows;
        self
    }

    /// 修改线程数.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// 修改分割参数.
    pub fn with_segment(mut self, segment: SegmentParams) -> Self {
        self.segment = segment;
        self
    }

    /// 修改表面积估计方法.
    pub fn with_surface(mut self, surface: SurfaceEstimator) -> Self {
        self.surface = surface;
        self
    }

    /// 修改体素尺寸.
    pub fn with_voxel_size(mut self, voxel_size: VoxelSize) -> Self {
        self.voxel_size = voxel_size;
        self
    }

    /// 全分辨率形状为 `source` 时, 工作分辨率下的输出形状.
    pub fn output_shape(&self, source: Idx3d) -> Idx3d {
        (
            scaled_len(source.0, self.factors[0]),
            scaled_len(source.1, self.factors[1]),
            scaled_len(source.2, self.factors[2]),
        )
    }

    /// 检查配置是否合法.
    pub fn validate(&self) -> PipelineResult<()> {
        let fail = |msg: String| Err(PipelineError::Config(msg));
        let seg = &self.segment;

        if self.tile_size == 0 {
            return fail("tile size must be positive".into());
        }
        if let Some(f) = self.factors.iter().find(|f| !f.is_finite() || **f <= 0.0) {
            return fail(format!("resolution factor {f} must be finite and positive"));
        }
        if self.slab_rows == 0 {
            return fail("slab rows must be positive".into());
        }
        if self.workers == 0 {
            return fail("worker count must be positive".into());
        }
        if !seg.threshold.is_finite() {
            return fail(format!("threshold {} is not finite", seg.threshold));
        }
        if seg.min_size > seg.max_size {
            return fail(format!(
                "size band [{}, {}] is empty",
                seg.min_size, seg.max_size
            ));
        }
        if !seg.prune_length.is_finite() || seg.prune_length < 0.0 {
            return fail(format!("prune length {} is invalid", seg.prune_length));
        }
        if !seg.compactness.is_finite() || seg.compactness < 0.0 {
            return fail(format!("compactness {} is invalid", seg.compactness));
        }
        let v = &self.voxel_size;
        if [v.z, v.y, v.x].iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return fail(format!("voxel size {v:?} is invalid"));
        }
        Ok(())
    }
}

//! 分块肺泡分割流水线.
//!
//! 调度器按光栅顺序枚举工作分辨率网格上的分块, 借助粗粒度掩膜跳过背景分块;
//! 每个剩余分块依次经过分片重采样, 分割, 形态学定量, 最后交给汇总器.
//!
//! 分块之间没有任何数据依赖. 打开 `rayon` feature 时, 分块由一个线程数有界的
//! 线程池并行处理, 结果与串行处理完全一致.
//!
//! 单个分块的任何失败 (读取错误, 非有限数值, 算法内部 panic) 只影响该分块:
//! 该区域在输出中保持为零, 也不产生任何记录.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

mod aggregate;
mod config;
mod context;
mod error;
mod morphometry;
mod report;
mod resample;
mod schedule;
mod segment;

pub use aggregate::{AggregatedResult, OutputFormat, ResultAggregator, TileResult};
pub use config::PipelineConfig;
pub use context::{CancelHandle, PipelineContext, Progress, RunStats};
pub use error::{PipelineError, PipelineResult, SegmentError};
pub use morphometry::{measure, Morphometry, SurfaceEstimator};
pub use report::{MeanStd, Report, VoxelSize};
pub use resample::Resampler;
pub use schedule::{Tile, TileGrid, TileScheduler};
pub use segment::{
    fold_basins, AlveoliLabels, Markers, SegmentOutcome, SegmentParams, Segmenter,
};

use crate::data::{CoarseMask, VolumeSource};

/// 流水线.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
    segmenter: Segmenter,
    resampler: Resampler,
    cancel: CancelHandle,
}

/// 取出 panic 信息.
fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_owned();
    }
    match payload.downcast::<String>() {
        Ok(s) => *s,
        Err(_) => "unknown panic".to_owned(),
    }
}

impl Pipeline {
    /// 检查配置并创建流水线.
    pub fn new(config: PipelineConfig) -> PipelineResult<Self> {
        config.validate()?;
        Ok(Self {
            segmenter: Segmenter::new(config.segment.clone()),
            resampler: Resampler::new(config.factors, config.slab_rows),
            cancel: CancelHandle::new(),
            config,
        })
    }

    /// 配置.
    #[inline]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// 取消标志. 取消后, 本次及之后的运行都不再开始新的分块.
    #[inline]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// 处理一个分块: 重采样, 分割, 定量.
    ///
    /// 任何 panic 都在这里被捕获, 转换为失败结果.
    pub fn process_tile(&self, source: &dyn VolumeSource, tile: &Tile) -> TileResult {
        let run = || {
            let data = match self.resampler.resample(source, tile) {
                Ok(d) => d,
                Err(e) => return TileResult::Failed(e.into()),
            };
            match self.segmenter.segment(data.view()) {
                SegmentOutcome::Segmented(l) => {
                    let morphometry = measure(&l.labels, self.config.surface);
                    TileResult::Segmented {
                        labels: l.labels,
                        morphometry,
                    }
                }
                SegmentOutcome::Empty => TileResult::Empty,
                SegmentOutcome::Failed(e) => TileResult::Failed(e),
            }
        };
        panic::catch_unwind(AssertUnwindSafe(run))
            .unwrap_or_else(|p| TileResult::Failed(SegmentError::Panicked(panic_message(p))))
    }

    fn handle(&self, ctx: &PipelineContext, source: &dyn VolumeSource, tile: Tile) {
        let result = self.process_tile(source, &tile);
        match &result {
            TileResult::Segmented { morphometry, .. } => {
                ctx.progress.segmented();
                log::debug!(
                    "tile #{} at {:?}: {} alveoli",
                    tile.index,
                    tile.origin,
                    morphometry.len()
                );
            }
            TileResult::Empty => {
                ctx.progress.empty();
                log::debug!("tile #{} at {:?}: empty", tile.index, tile.origin);
            }
            TileResult::Failed(_) => ctx.progress.failed(),
        }
        ctx.aggregator.submit(&tile, result);

        let stats = ctx.progress.snapshot();
        if stats.processed() % 100 == 0 {
            log::info!(
                "processed {} tiles, {} of {} visited tiles skipped",
                stats.processed(),
                stats.skipped,
                stats.visited
            );
        }
    }

    /// 对 `source` 运行整个流水线.
    ///
    /// `coarse` 决定哪些分块需要处理; 传入 [`CoarseMask::everywhere`] 则处理全部分块.
    /// 只有线程池创建失败会返回错误, 分块的失败不会.
    pub fn run(
        &self,
        source: &dyn VolumeSource,
        coarse: &CoarseMask,
    ) -> PipelineResult<AggregatedResult> {
        let output_shape = self.config.output_shape(source.shape());
        let grid = TileGrid::new(output_shape, self.config.tile_size);
        log::info!(
            "source {:?} -> output {:?}, {} tiles of size {}",
            source.shape(),
            output_shape,
            grid.len(),
            self.config.tile_size
        );

        let ctx = PipelineContext::new(&self.config, output_shape, self.cancel.clone());
        let scheduler = TileScheduler::new(grid, coarse, &ctx.progress, &ctx.cancel);

        cfg_if::cfg_if! {
            if #[cfg(feature = "rayon")] {
                use rayon::iter::{ParallelBridge, ParallelIterator};
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(self.config.workers)
                    .build()?;
                pool.install(|| {
                    scheduler
                        .par_bridge()
                        .for_each(|tile| self.handle(&ctx, source, tile))
                });
            } else {
                scheduler.for_each(|tile| self.handle(&ctx, source, tile));
            }
        }

        let result = ctx.finish(coarse.tissue_voxels());
        let s = result.stats;
        if s.cancelled {
            log::warn!("run cancelled after {} tiles", s.processed());
        }
        log::info!(
            "done: {} visited, {} skipped, {} segmented, {} empty, {} failed, {} alveoli",
            s.visited,
            s.skipped,
            s.segmented,
            s.empty,
            s.failed,
            result.count()
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::segment::tests::{cavities, AIR};
    use super::*;
    use crate::consts::gray;
    use crate::data::{ArraySource, SourceResult};
    use crate::{Box3d, Idx3d};
    use ndarray::{s, Array3};

    fn config() -> PipelineConfig {
        let mut seg = SegmentParams::new(100.0, 100, 100_000);
        seg.opening_radius = 1;
        PipelineConfig::new(100.0, 100, 100_000)
            .with_segment(seg)
            .with_factors([1.0; 3])
            .with_workers(2)
    }

    /// 两个分块, 各含一个半径为 8 的气腔.
    fn two_tiles() -> Array3<f32> {
        cavities((32, 32, 64), &[((16, 16, 16), 8), ((16, 16, 48), 8)])
    }

    /// 对 x 超过 `limit` 的读取 panic 的数据源.
    struct Fragile {
        inner: ArraySource,
        limit: usize,
    }

    impl VolumeSource for Fragile {
        fn shape(&self) -> Idx3d {
            self.inner.shape()
        }

        fn read(&self, region: &Box3d) -> SourceResult<Array3<f32>> {
            assert!(region.end.2 <= self.limit, "read beyond x = {}", self.limit);
            self.inner.read(region)
        }
    }

    #[test]
    fn test_run_single_tile() {
        let data = cavities((64, 64, 64), &[((16, 16, 16), 8), ((40, 40, 40), 20)]);
        let pipeline = Pipeline::new(config().with_tile_size(64)).unwrap();
        let r = pipeline
            .run(&ArraySource::new(data), &CoarseMask::everywhere())
            .unwrap();

        assert_eq!(r.count(), 2);
        assert_eq!(r.volumes, vec![2109, 33401]);
        assert_eq!(r.surfaces.len(), 2);
        assert_eq!(r.volume.dim(), (64, 64, 64));
        let nonzero = r.volume.iter().filter(|&&p| gray::is_alveolus(p)).count();
        assert_eq!(nonzero, 2109 + 33401);
        assert_eq!(r.stats.segmented, 1);
        assert!(!r.stats.cancelled);
        assert_eq!(r.tissue_voxels, None);
    }

    #[test]
    fn test_run_pure_tissue() {
        let data = Array3::from_elem((16, 16, 16), 200.0f32);
        let pipeline = Pipeline::new(config().with_tile_size(16)).unwrap();
        let r = pipeline
            .run(&ArraySource::new(data), &CoarseMask::everywhere())
            .unwrap();
        assert_eq!(r.count(), 0);
        assert!(r.surfaces.is_empty());
        assert!(r.volume.iter().all(|&p| p == 0));
        assert_eq!(r.stats.empty, 1);
    }

    /// 背景分块从不被读取.
    #[test]
    fn test_run_skips_background_tiles() {
        let source = Fragile {
            inner: ArraySource::new(two_tiles()),
            limit: 32,
        };
        let coarse = CoarseMask::from_mask(
            Array3::from_shape_vec((1, 1, 2), vec![true, false]).unwrap(),
            [1.0 / 32.0; 3],
        );
        let pipeline = Pipeline::new(config().with_tile_size(32)).unwrap();
        let r = pipeline.run(&source, &coarse).unwrap();

        assert_eq!(r.stats.visited, 2);
        assert_eq!(r.stats.skipped, 1);
        assert_eq!(r.stats.failed, 0);
        assert_eq!(r.volumes, vec![2109]);
        assert!(r.volume.slice(s![.., .., 32..]).iter().all(|&p| p == 0));
        assert_eq!(r.tissue_voxels, Some(32.0 * 32.0 * 32.0));
    }

    /// 一个分块 panic 不影响其它分块.
    #[test]
    fn test_run_isolates_panics() {
        let source = Fragile {
            inner: ArraySource::new(two_tiles()),
            limit: 32,
        };
        let pipeline = Pipeline::new(config().with_tile_size(32)).unwrap();
        let r = pipeline.run(&source, &CoarseMask::everywhere()).unwrap();

        assert_eq!(r.stats.segmented, 1);
        assert_eq!(r.stats.failed, 1);
        assert_eq!(r.volumes, vec![2109]);
        assert!(r.volume.slice(s![.., .., 32..]).iter().all(|&p| p == 0));
        assert_eq!(
            r.volume.slice(s![.., .., ..32]).iter().filter(|&&p| p != 0).count(),
            2109
        );
    }

    #[test]
    fn test_process_tile_failures() {
        let mut data = two_tiles();
        data[(3, 3, 40)] = f32::NAN;
        let source = ArraySource::new(data);
        let pipeline = Pipeline::new(config().with_tile_size(32)).unwrap();

        let good = Tile {
            index: 0,
            origin: (0, 0, 0),
            shape: (32, 32, 32),
        };
        let bad = Tile {
            index: 1,
            origin: (0, 0, 32),
            shape: (32, 32, 32),
        };
        let TileResult::Segmented { labels, morphometry } = pipeline.process_tile(&source, &good)
        else {
            panic!("tile 0 should be segmented");
        };
        assert_eq!(labels.dim(), good.shape);
        assert_eq!(morphometry.volumes, vec![2109]);
        assert!(matches!(
            pipeline.process_tile(&source, &bad),
            TileResult::Failed(SegmentError::NonFiniteIntensity((3, 3, 8)))
        ));
    }

    #[test]
    fn test_run_cancelled() {
        let data = Array3::from_elem((8, 8, 8), AIR);
        let pipeline = Pipeline::new(config().with_tile_size(4)).unwrap();
        pipeline.cancel_handle().cancel();
        let r = pipeline
            .run(&ArraySource::new(data), &CoarseMask::everywhere())
            .unwrap();
        assert!(r.stats.cancelled);
        assert_eq!(r.stats.visited, 0);
        assert_eq!(r.volume.dim(), (8, 8, 8));
        assert!(r.volume.iter().all(|&p| p == 0));
    }

    #[test]
    fn test_pipeline_rejects_bad_config() {
        let bad = config().with_tile_size(0);
        assert!(matches!(Pipeline::new(bad), Err(PipelineError::Config(_))));
    }

    /// 分块的结果与并行度无关.
    #[test]
    fn test_run_deterministic() {
        let data = two_tiles();
        let source = ArraySource::new(data);
        let one = Pipeline::new(config().with_tile_size(16).with_workers(1))
            .unwrap()
            .run(&source, &CoarseMask::everywhere())
            .unwrap();
        let four = Pipeline::new(config().with_tile_size(16).with_workers(4))
            .unwrap()
            .run(&source, &CoarseMask::everywhere())
            .unwrap();
        assert_eq!(one.volume, four.volume);
        assert_eq!(one.volumes, four.volumes);
        assert_eq!(one.surfaces, four.surfaces);
        assert_eq!(one.stats, four.stats);
    }
}

//! 一次运行的共享状态: 进度计数, 取消标志与结果汇总.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use super::aggregate::{AggregatedResult, ResultAggregator};
use super::config::PipelineConfig;

/// 进度计数器. 所有计数只增不减.
#[derive(Debug, Default)]
pub struct Progress {
    visited: AtomicUsize,
    skipped: AtomicUsize,
    segmented: AtomicUsize,
    empty: AtomicUsize,
    failed: AtomicUsize,
}

/// 某一时刻的进度快照.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RunStats {
    /// 调度器枚举过的分块数.
    pub visited: usize,

    /// 因粗粒度掩膜为背景而跳过的分块数.
    pub skipped: usize,

    /// 至少保留了一个肺泡的分块数.
    pub segmented: usize,

    /// 没有肺泡的分块数.
    pub empty: usize,

    /// 处理失败的分块数.
    pub failed: usize,

    /// 运行是否被取消.
    pub cancelled: bool,
}

impl RunStats {
    /// 已处理 (未被跳过) 的分块数.
    #[inline]
    pub fn processed(&self) -> usize {
        self.segmented + self.empty + self.failed
    }
}

impl Progress {
    #[inline]
    pub(crate) fn visit(&self) {
        self.visited.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn skip(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn segmented(&self) {
        self.segmented.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn empty(&self) {
        self.empty.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// 当前进度.
    pub fn snapshot(&self) -> RunStats {
        RunStats {
            visited: self.visited.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            segmented: self.segmented.load(Ordering::Relaxed),
            empty: self.empty.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: false,
        }
    }
}

/// 取消标志. 可以克隆后交给其它线程, 流水线在分块之间检查它.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    /// 新的未取消标志.
    pub fn new() -> Self {
        Self::default()
    }

    /// 请求取消. 正在处理的分块会正常完成, 之后不再开始新的分块.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// 是否已请求取消?
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// 单次运行的上下文, 在运行开始时创建, 传给每个分块的处理过程, 运行结束时销毁.
#[derive(Debug)]
pub struct PipelineContext<'a> {
    /// 配置.
    pub config: &'a PipelineConfig,

    /// 进度.
    pub progress: Progress,

    /// 取消标志.
    pub cancel: CancelHandle,

    /// 结果汇总器.
    pub aggregator: ResultAggregator,
}

impl<'a> PipelineContext<'a> {
    /// 为输出形状 `output_shape` 创建上下文.
    pub fn new(
        config: &'a PipelineConfig,
        output_shape: crate::Idx3d,
        cancel: CancelHandle,
    ) -> Self {
        Self {
            config,
            progress: Progress::default(),
            cancel,
            aggregator: ResultAggregator::new(output_shape),
        }
    }

    /// 结束运行, 汇总结果.
    pub fn finish(self, tissue_voxels: Option<f64>) -> AggregatedResult {
        let mut stats = self.progress.snapshot();
        stats.cancelled = self.cancel.is_cancelled();
        let mut result = self.aggregator.finish(stats);
        result.voxel_size = self.config.voxel_size;
        result.tissue_voxels = tissue_voxels;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_snapshot() {
        let p = Progress::default();
        p.visit();
        p.visit();
        p.visit();
        p.skip();
        p.segmented();
        p.failed();
        let s = p.snapshot();
        assert_eq!(s.visited, 3);
        assert_eq!(s.skipped, 1);
        assert_eq!(s.processed(), 2);
        assert!(!s.cancelled);
    }

    #[test]
    fn test_cancel_handle_shared() {
        let a = CancelHandle::new();
        let b = a.clone();
        assert!(!b.is_cancelled());
        std::thread::spawn(move || a.cancel()).join().unwrap();
        assert!(b.is_cancelled());
    }
}

#![warn(missing_docs)] // <= 合适时移除它.
// #![warn(clippy::missing_docs_in_private_items)]  // <= too strict.

//! 核心库. 对无法整体载入内存的超大三维肺组织显微体数据进行分块肺泡分割,
//! 并给出每个肺泡的体积、表面积估计.
//!
//! 该 crate 目前仅提供 `safe` 接口.
//!
//! # 注意
//!
//! 1. 所有三维索引均按照 `(z, y, x)` 组织, 区间均为左闭右开.
//! 2. 分块之间完全独立. 跨越块边界的肺泡会被视为多个互不相关的对象,
//!   这是已知限制, 本 crate 不做跨块合并.
//! 3. 单个分块的算法失败不会中止整体流程: 该区域在输出中保持为背景,
//!   且不产生任何形态学记录.
//!
//! # 开发计划
//!
//! ### 体数据源与粗粒度掩膜 ✅
//!
//! 按区间懒加载的体数据源 (内存数组, 二维切片序列目录, nifti, npy),
//! 以及用于跳过空块的低分辨率二值掩膜.
//!
//! 实现位于 `lung-berry/src/data`.
//!
//! ### 三维形态学操作 ✅
//!
//! 基于精确欧氏距离变换的球形腐蚀/膨胀, 小空洞填充, 连通域标记,
//! 拓扑保持的三维细化, 以及带紧致项的种子分水岭.
//!
//! 实现位于 `lung-berry/src/morph_3d`.
//!
//! ### 骨架矢量化 ✅
//!
//! 将单体素宽的骨架转换为分支图, 并按分支类型与路径长度分类.
//!
//! 实现位于 `lung-berry/src/skeleton`.
//!
//! ### 分块肺泡分割流水线 ✅
//!
//! 分块调度 -> 分片重采样 -> 骨架引导分水岭分割 -> 形态学定量 -> 结果汇总.
//! 打开 `rayon` feature 时以有界线程池并行处理各分块.
//!
//! 实现位于 `lung-berry/src/pipeline`.
//!
//! ### 跨块肺泡合并 ❌
//!
//! 不在计划之内.

/// 三维索引 `(z, y, x)`, 同时也用作三维形状.
pub type Idx3d = (usize, usize, usize);

mod geometry;

pub use geometry::Box3d;

pub mod consts;

/// 体数据源、粗粒度掩膜与重采样.
pub mod data;

pub use data::{
    open_source, ArraySource, CoarseMask, MaskParams, NiftiSource, NpySource, SliceStackSource,
    SourceError, SourceResult, VolumeSource,
};

pub mod morph_3d;

pub mod skeleton;

pub mod pipeline;

pub mod prelude;

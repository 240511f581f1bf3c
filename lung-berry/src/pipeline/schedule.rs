//! 分块调度.

use super::context::{CancelHandle, Progress};
use crate::data::CoarseMask;
use crate::{Box3d, Idx3d};

/// 工作分辨率网格上的一个分块.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Tile {
    /// 在网格中的光栅序号, 从 0 开始.
    pub index: usize,

    /// 起点 (工作分辨率).
    pub origin: Idx3d,

    /// 形状. 末尾的分块可能小于标称边长.
    pub shape: Idx3d,
}

impl Tile {
    /// 分块覆盖的区间.
    #[inline]
    pub fn bbox(&self) -> Box3d {
        Box3d::from_origin(self.origin, self.shape)
    }
}

/// 覆盖整个输出形状的规则分块网格.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
    shape: Idx3d,
    tile_size: usize,
    counts: Idx3d,
}

impl TileGrid {
    /// 以 `tile_size` 为步长切分 `output_shape`.
    ///
    /// # 注意
    ///
    /// `tile_size` 不能为 0, 否则 panic.
    pub fn new(output_shape: Idx3d, tile_size: usize) -> Self {
        assert!(tile_size > 0);
        let n = |len: usize| len.div_ceil(tile_size);
        Self {
            shape: output_shape,
            tile_size,
            counts: (n(output_shape.0), n(output_shape.1), n(output_shape.2)),
        }
    }

    /// 输出形状.
    #[inline]
    pub fn shape(&self) -> Idx3d {
        self.shape
    }

    /// 标称分块边长.
    #[inline]
    pub fn tile_size(&self) -> usize {
        self.tile_size
    }

    /// 各轴分块个数.
    #[inline]
    pub fn counts(&self) -> Idx3d {
        self.counts
    }

    /// 分块总数.
    #[inline]
    pub fn len(&self) -> usize {
        self.counts.0 * self.counts.1 * self.counts.2
    }

    /// 网格是否为空?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 光栅序号为 `index` 的分块.
    pub fn tile(&self, index: usize) -> Option<Tile> {
        if index >= self.len() {
            return None;
        }
        let (_, cy, cx) = self.counts;
        let (iz, iy, ix) = (index / (cy * cx), index / cx % cy, index % cx);
        let t = self.tile_size;
        let origin = (iz * t, iy * t, ix * t);
        let clip = |o: usize, n: usize| t.min(n - o);
        let shape = (
            clip(origin.0, self.shape.0),
            clip(origin.1, self.shape.1),
            clip(origin.2, self.shape.2),
        );
        Some(Tile {
            index,
            origin,
            shape,
        })
    }

    /// 按 `(z, y, x)` 光栅顺序遍历所有分块.
    pub fn iter(&self) -> impl Iterator<Item = Tile> + '_ {
        (0..self.len()).filter_map(move |i| self.tile(i))
    }
}

/// 跳过背景分块的调度器.
///
/// 每枚举一个分块就更新一次进度; 取消标志被设置后不再产出新的分块.
pub struct TileScheduler<'a> {
    grid: TileGrid,
    coarse: &'a CoarseMask,
    progress: &'a Progress,
    cancel: &'a CancelHandle,
    next: usize,
}

impl<'a> TileScheduler<'a> {
    /// 创建调度器.
    pub fn new(
        grid: TileGrid,
        coarse: &'a CoarseMask,
        progress: &'a Progress,
        cancel: &'a CancelHandle,
    ) -> Self {
        Self {
            grid,
            coarse,
            progress,
            cancel,
            next: 0,
        }
    }
}

impl Iterator for TileScheduler<'_> {
    type Item = Tile;

    fn next(&mut self) -> Option<Tile> {
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }
            let tile = self.grid.tile(self.next)?;
            self.next += 1;
            self.progress.visit();
            if self.coarse.is_foreground(&tile.bbox()) {
                return Some(tile);
            }
            self.progress.skip();
            log::trace!("tile #{} at {:?} skipped", tile.index, tile.origin);
        }
    }
}

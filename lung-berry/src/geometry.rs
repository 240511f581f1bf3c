//! 三维轴对齐区间.

use std::ops::Range;

use crate::Idx3d;

/// 三维轴对齐的左闭右开区间 `[start, end)`, 按 `(z, y, x)` 组织.
///
/// 任意一维 `start >= end` 时区间为空.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Box3d {
    /// 起点 (包含).
    pub start: Idx3d,

    /// 终点 (不含).
    pub end: Idx3d,
}

/// 将 `f` 作用在三元组的每个分量上.
#[inline]
fn map3<F: Fn(usize, usize) -> usize>(a: Idx3d, b: Idx3d, f: F) -> Idx3d {
    (f(a.0, b.0), f(a.1, b.1), f(a.2, b.2))
}

impl Box3d {
    /// 由起点与终点创建.
    #[inline]
    pub const fn new(start: Idx3d, end: Idx3d) -> Self {
        Self { start, end }
    }

    /// 由起点与形状创建. 终点会饱和, 不会溢出.
    #[inline]
    pub fn from_origin(origin: Idx3d, shape: Idx3d) -> Self {
        Self::new(origin, map3(origin, shape, usize::saturating_add))
    }

    /// 覆盖整个形状为 `shape` 的体数据的区间.
    #[inline]
    pub const fn full(shape: Idx3d) -> Self {
        Self::new((0, 0, 0), shape)
    }

    /// 区间形状. 空的维度长度为 0.
    #[inline]
    pub fn shape(&self) -> Idx3d {
        map3(self.end, self.start, usize::saturating_sub)
    }

    /// 体素个数.
    #[inline]
    pub fn len(&self) -> usize {
        let (z, y, x) = self.shape();
        z * y * x
    }

    /// 区间是否为空?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 裁剪到 `[0, shape)` 之内. 完全不相交时返回空区间.
    #[inline]
    pub fn clip(&self, shape: Idx3d) -> Self {
        let end = map3(self.end, shape, usize::min);
        let start = map3(self.start, end, usize::min);
        Self::new(start, end)
    }

    /// 按各轴比例缩放, 起点向下取整, 终点向上取整.
    ///
    /// 用于工作分辨率到粗粒度掩膜的映射: 结果覆盖原区间对应的全部粗体素.
    /// 非空区间缩放后每一维至少保留一个体素.
    pub fn scaled_outward(&self, ratios: [f64; 3]) -> Self {
        let lo = |v: usize, k: usize| (v as f64 * ratios[k]).floor() as usize;
        let hi = |v: usize, k: usize| (v as f64 * ratios[k]).ceil() as usize;
        let start = (
            lo(self.start.0, 0),
            lo(self.start.1, 1),
            lo(self.start.2, 2),
        );
        let end = (hi(self.end.0, 0), hi(self.end.1, 1), hi(self.end.2, 2));
        if self.is_empty() {
            return Self::new(start, start);
        }
        Self::new(start, map3(end, start, |e, s| e.max(s + 1)))
    }

    /// 三个轴上的区间, 可以直接交给 `ndarray::s!`.
    #[inline]
    pub fn ranges(&self) -> [Range<usize>; 3] {
        [
            self.start.0..self.end.0,
            self.start.1..self.end.1,
            self.start.2..self.end.2,
        ]
    }
}

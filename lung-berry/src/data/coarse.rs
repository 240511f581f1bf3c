//! 粗粒度二值掩膜.

use ndarray::{s, Array3, ArrayView3};

use crate::consts::defaults;
use crate::data::scale::downscale_mean;
use crate::morph_3d::{binary_closing_ball, binary_opening_ball};
use crate::{Box3d, Idx3d};

/// 由预览图构建粗粒度掩膜所需的参数.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MaskParams {
    /// 亮度阈值, 严格大于该值的体素视为组织.
    pub threshold: f32,

    /// 预览图到掩膜的整数缩小倍数.
    pub mask_scale: usize,

    /// 闭运算球半径.
    pub closing_radius: usize,

    /// 开运算球半径.
    pub opening_radius: usize,

    /// 全分辨率到预览图的缩小倍数 `[z, y, x]`.
    pub preview_factors: [f64; 3],

    /// 全分辨率到工作分辨率的缩小倍数 `[z, y, x]`.
    pub working_factors: [f64; 3],
}

impl Default for MaskParams {
    fn default() -> Self {
        Self {
            threshold: defaults::MASK_THRESHOLD,
            mask_scale: defaults::MASK_SCALE,
            closing_radius: defaults::MASK_CLOSING_RADIUS,
            opening_radius: defaults::MASK_OPENING_RADIUS,
            preview_factors: [
                defaults::PREVIEW_Z_FACTOR,
                defaults::PREVIEW_XY_FACTOR,
                defaults::PREVIEW_XY_FACTOR,
            ],
            working_factors: [
                defaults::Z_FACTOR,
                defaults::XY_FACTOR,
                defaults::XY_FACTOR,
            ],
        }
    }
}

impl MaskParams {
    /// 工作分辨率坐标到掩膜坐标的比例.
    pub fn ratios(&self) -> [f64; 3] {
        let scale = self.mask_scale.max(1) as f64;
        [0, 1, 2].map(|k| self.working_factors[k] / (self.preview_factors[k] * scale))
    }
}

/// 低分辨率二值掩膜, 只用来判断某个分块是否值得读取.
///
/// `ratios` 把工作分辨率坐标映射到掩膜坐标.
#[derive(Debug, Clone)]
pub struct CoarseMask {
    mask: Array3<bool>,
    ratios: [f64; 3],
}

impl CoarseMask {
    /// 由预览图构建掩膜.
    ///
    /// 先按 `mask_scale` 均值降采样, 以 `threshold` 严格大于为前景二值化,
    /// 再依次做球形闭运算与开运算.
    pub fn from_preview(preview: ArrayView3<f32>, params: &MaskParams) -> Self {
        let k = params.mask_scale.max(1) as f64;
        let small = downscale_mean(preview, [k, k, k]);
        let binary = small.mapv(|v| v > params.threshold);
        let closed = binary_closing_ball(&binary, params.closing_radius);
        let mask = binary_opening_ball(&closed, params.opening_radius);
        let out = Self::from_mask(mask, params.ratios());
        log::debug!(
            "coarse mask {:?} built from preview {:?}, {:.2}% foreground",
            out.shape(),
            preview.dim(),
            out.foreground_fraction() * 100.0
        );
        out
    }

    /// 使用预先计算好的掩膜.
    #[inline]
    pub fn from_mask(mask: Array3<bool>, ratios: [f64; 3]) -> Self {
        Self { mask, ratios }
    }

    /// 没有稀疏信息时使用: 任何分块都被判定为前景.
    pub fn everywhere() -> Self {
        Self::from_mask(Array3::from_elem((1, 1, 1), true), [0.0; 3])
    }

    /// 掩膜形状.
    #[inline]
    pub fn shape(&self) -> Idx3d {
        self.mask.dim()
    }

    /// 工作分辨率到掩膜的比例.
    #[inline]
    pub fn ratios(&self) -> [f64; 3] {
        self.ratios
    }

    /// 内部掩膜.
    #[inline]
    pub fn mask(&self) -> &Array3<bool> {
        &self.mask
    }

    /// 工作分辨率区间 `tile` 对应的掩膜区域中是否存在前景体素?
    ///
    /// `tile` 向外取整映射到掩膜坐标. 由于各级分辨率都向下取整,
    /// 末尾分块的映射起点可能恰好落在掩膜边界上, 这时回退到最后一层;
    /// 更远的区域一律视为背景.
    pub fn is_foreground(&self, tile: &Box3d) -> bool {
        if tile.is_empty() || self.mask.is_empty() {
            return false;
        }
        let mut b = tile.scaled_outward(self.ratios);
        let (mz, my, mx) = self.shape();
        let clamp = |s: &mut usize, e: &mut usize, n: usize| {
            if *s == n {
                *s = n - 1;
                *e = (*e).max(n);
            }
        };
        clamp(&mut b.start.0, &mut b.end.0, mz);
        clamp(&mut b.start.1, &mut b.end.1, my);
        clamp(&mut b.start.2, &mut b.end.2, mx);

        let b = b.clip(self.shape());
        if b.is_empty() {
            return false;
        }
        let [z, y, x] = b.ranges();
        self.mask.slice(s![z, y, x]).iter().any(|&p| p)
    }

    /// 前景在工作分辨率下对应的体素数, 即组织体积的估计.
    ///
    /// 比例未知 (例如 [`CoarseMask::everywhere`]) 时返回 `None`.
    pub fn tissue_voxels(&self) -> Option<f64> {
        let scale: f64 = self.ratios.iter().product();
        if scale <= 0.0 || !scale.is_finite() {
            return None;
        }
        let n = self.mask.iter().filter(|&&p| p).count() as f64;
        Some(n / scale)
    }

    /// 前景体素占比.
    pub fn foreground_fraction(&self) -> f64 {
        if self.mask.is_empty() {
            return 0.0;
        }
        self.mask.iter().filter(|&&p| p).count() as f64 / self.mask.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 4x4x4 掩膜, 只有 (3, 3, 3) 处为前景. 比例 0.5.
    fn corner_mask() -> CoarseMask {
        let mut m = Array3::from_elem((4, 4, 4), false);
        m[(3, 3, 3)] = true;
        CoarseMask::from_mask(m, [0.5; 3])
    }

    #[test]
    fn test_coarse_is_foreground() {
        let c = corner_mask();
        assert!(!c.is_foreground(&Box3d::from_origin((0, 0, 0), (4, 4, 4))));
        assert!(c.is_foreground(&Box3d::from_origin((4, 4, 4), (4, 4, 4))));
        // 只沾到一点边也算.
        assert!(c.is_foreground(&Box3d::new((5, 5, 5), (7, 7, 7))));
        assert!(!c.is_foreground(&Box3d::new((4, 4, 0), (8, 8, 4))));
    }

    #[test]
    fn test_coarse_far_edge() {
        let c = corner_mask();
        // 起点恰好落在边界上, 回退到最后一层.
        assert!(c.is_foreground(&Box3d::from_origin((8, 8, 8), (2, 2, 2))));
        // 完全在外面.
        assert!(!c.is_foreground(&Box3d::from_origin((20, 20, 20), (2, 2, 2))));
        assert!(!c.is_foreground(&Box3d::new((6, 6, 6), (6, 6, 6))));
    }

    #[test]
    fn test_coarse_everywhere() {
        let c = CoarseMask::everywhere();
        assert!(c.is_foreground(&Box3d::from_origin((1000, 0, 77), (320, 320, 320))));
        assert_eq!(c.foreground_fraction(), 1.0);
        assert_eq!(c.tissue_voxels(), None);
    }

    #[test]
    fn test_coarse_tissue_voxels() {
        // 每个掩膜体素对应 2x2x2 个工作体素.
        assert_eq!(corner_mask().tissue_voxels(), Some(8.0));
    }

    #[test]
    fn test_coarse_from_preview() {
        // 一个亮立方体, 其余为暗背景.
        let mut preview = Array3::<f32>::zeros((32, 32, 32));
        preview.slice_mut(s![8..24, 8..24, 8..24]).fill(200.0);
        let params = MaskParams {
            threshold: 150.0,
            mask_scale: 2,
            closing_radius: 1,
            opening_radius: 1,
            preview_factors: [1.0; 3],
            working_factors: [1.0; 3],
        };
        let c = CoarseMask::from_preview(preview.view(), &params);
        assert_eq!(c.shape(), (16, 16, 16));
        assert_eq!(c.ratios(), [0.5; 3]);
        assert!(c.mask()[(8, 8, 8)]);
        assert!(!c.mask()[(0, 0, 0)]);

        assert!(c.is_foreground(&Box3d::from_origin((12, 12, 12), (8, 8, 8))));
        assert!(!c.is_foreground(&Box3d::from_origin((0, 0, 0), (8, 8, 8))));
        assert!(c.foreground_fraction() > 0.0 && c.foreground_fraction() < 1.0);
    }
}

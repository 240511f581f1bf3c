//! 肺泡体积与表面积估计.

use std::collections::BTreeMap;

use ndarray::Array3;

use crate::morph_3d::{neighbours, Connectivity};
use crate::{Box3d, Idx3d};

/// 表面积估计方法.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SurfaceEstimator {
    /// 膨胀一步后新增的体素数 (3x3x3 结构元). 对球体总是高估.
    #[default]
    DilationShell,

    /// 等值面三角网格的总面积.
    #[cfg(feature = "mesh")]
    Mesh,
}

/// 一个分块内所有肺泡的体积与表面积, 按标签升序排列, 两者下标一一对应.
///
/// 单位均为工作分辨率体素.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Morphometry {
    /// 体素个数.
    pub volumes: Vec<u64>,

    /// 表面积估计.
    pub surfaces: Vec<f64>,
}

impl Morphometry {
    /// 记录条数.
    #[inline]
    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    /// 是否没有任何记录?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }

    /// 依次遍历 `(体积, 表面积)`.
    pub fn iter(&self) -> impl Iterator<Item = (u64, f64)> + '_ {
        self.volumes
            .iter()
            .copied()
            .zip(self.surfaces.iter().copied())
    }

    /// 在末尾追加另一组记录.
    pub fn extend(&mut self, other: &Morphometry) {
        self.volumes.extend_from_slice(&other.volumes);
        self.surfaces.extend_from_slice(&other.surfaces);
    }
}

/// 各标签的包围盒与体素数.
fn bounding_boxes(labels: &Array3<u32>) -> BTreeMap<u32, (Box3d, u64)> {
    let mut out: BTreeMap<u32, (Box3d, u64)> = BTreeMap::new();
    for ((z, y, x), &l) in labels.indexed_iter() {
        if l == 0 {
            continue;
        }
        let (b, n) = out
            .entry(l)
            .or_insert_with(|| (Box3d::new((z, y, x), (z + 1, y + 1, x + 1)), 0));
        b.start = (b.start.0.min(z), b.start.1.min(y), b.start.2.min(x));
        b.end = (b.end.0.max(z + 1), b.end.1.max(y + 1), b.end.2.max(x + 1));
        *n += 1;
    }
    out
}

/// 包围盒向外扩一圈, 并裁剪到 `shape` 之内.
fn grow(b: &Box3d, shape: Idx3d) -> Box3d {
    let start = (
        b.start.0.saturating_sub(1),
        b.start.1.saturating_sub(1),
        b.start.2.saturating_sub(1),
    );
    Box3d::new(start, (b.end.0 + 1, b.end.1 + 1, b.end.2 + 1)).clip(shape)
}

/// 膨胀壳层: 不属于 `label` 但与其 26 相邻的体素个数.
fn dilation_shell(labels: &Array3<u32>, label: u32, bbox: &Box3d) -> f64 {
    let shape = labels.dim();
    let region = grow(bbox, shape);
    let [zr, yr, xr] = region.ranges();
    itertools::iproduct!(zr, yr, xr)
        .filter(|&p| labels[p] != label)
        .filter(|&p| neighbours(p, shape, Connectivity::TwentySix).any(|q| labels[q] == label))
        .count() as f64
}

/// 在包围盒外扩一圈的子体上提取等值面, 返回三角网格面积.
#[cfg(feature = "mesh")]
fn mesh_area(labels: &Array3<u32>, label: u32, bbox: &Box3d) -> f64 {
    use fast_surface_nets::ndshape::RuntimeShape;
    use fast_surface_nets::{surface_nets, SurfaceNetsBuffer};
    use ndarray::s;

    // 子体外围补一圈 "外部", 使网格闭合.
    let (nz, ny, nx) = bbox.shape();
    let (pz, py, px) = (nz + 2, ny + 2, nx + 2);
    let mut sdf = Array3::<f32>::from_elem((pz, py, px), 1.0);
    let [zr, yr, xr] = bbox.ranges();
    let inner = labels.slice(s![zr, yr, xr]);
    sdf.slice_mut(s![1..pz - 1, 1..py - 1, 1..px - 1])
        .zip_mut_with(&inner, |d, &l| {
            if l == label {
                *d = -1.0;
            }
        });

    // ndarray 的 (z, y, x) 标准布局中 x 变化最快, 与 ndshape 的 [x, y, z] 线性化一致.
    let Some(data) = sdf.as_slice() else {
        return 0.0;
    };
    let shape = RuntimeShape::<u32, 3>::new([px as u32, py as u32, pz as u32]);
    let mut buffer = SurfaceNetsBuffer::default();
    surface_nets(
        data,
        &shape,
        [0; 3],
        [px as u32 - 1, py as u32 - 1, pz as u32 - 1],
        &mut buffer,
    );

    buffer
        .indices
        .chunks_exact(3)
        .map(|t| {
            let [a, b, c] = [t[0], t[1], t[2]].map(|i| buffer.positions[i as usize]);
            let u = [b[0] - a[0], b[1] - a[1], b[2] - a[2]];
            let v = [c[0] - a[0], c[1] - a[1], c[2] - a[2]];
            let n = [
                u[1] * v[2] - u[2] * v[1],
                u[2] * v[0] - u[0] * v[2],
                u[0] * v[1] - u[1] * v[0],
            ];
            0.5 * ((n[0] * n[0] + n[1] * n[1] + n[2] * n[2]) as f64).sqrt()
        })
        .sum()
}

/// 按标签升序测量每个肺泡的体积 (体素数) 与表面积.
pub fn measure(labels: &Array3<u32>, estimator: SurfaceEstimator) -> Morphometry {
    let mut out = Morphometry::default();
    for (label, (bbox, count)) in bounding_boxes(labels) {
        let surface = match estimator {
            SurfaceEstimator::DilationShell => dilation_shell(labels, label, &bbox),
            #[cfg(feature = "mesh")]
            SurfaceEstimator::Mesh => mesh_area(labels, label, &bbox),
        };
        out.volumes.push(count);
        out.surfaces.push(surface);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::morph_3d::tests::ball;
    use std::f64::consts::PI;

    fn labelled_ball(shape: Idx3d, c: Idx3d, r: usize, label: u32) -> Array3<u32> {
        ball(shape, c, r).mapv(|p| if p { label } else { 0 })
    }

    /// 球体的体积接近 4/3 π r³, 表面积估计高于 4 π r² 但同一量级.
    #[test]
    fn test_measure_ball() {
        let r = 10usize;
        let labels = labelled_ball((25, 25, 25), (12, 12, 12), r, 1);
        let m = measure(&labels, SurfaceEstimator::DilationShell);
        assert_eq!(m.len(), 1);

        let rf = r as f64;
        let volume = 4.0 / 3.0 * PI * rf.powi(3);
        assert_eq!(m.volumes[0], 4169);
        assert!((m.volumes[0] as f64 - volume).abs() / volume < 0.01);

        let area = 4.0 * PI * rf * rf;
        assert!(m.surfaces[0] > area);
        assert!(m.surfaces[0] < 3.0 * area);
    }

    #[test]
    fn test_measure_order_and_clip() {
        // 标签 2 在前, 标签 1 在后, 且标签 1 贴着边界.
        let mut labels = Array3::<u32>::zeros((4, 4, 8));
        labels[(1, 1, 1)] = 2;
        labels[(0, 0, 7)] = 1;
        let m = measure(&labels, SurfaceEstimator::DilationShell);
        assert_eq!(m.volumes, vec![1, 1]);
        // 角落体素只有 7 个邻居, 内部体素有 26 个.
        assert_eq!(m.surfaces, vec![7.0, 26.0]);
        let pairs: Vec<_> = m.iter().collect();
        assert_eq!(pairs, vec![(1, 7.0), (1, 26.0)]);
    }

    #[test]
    fn test_measure_empty_and_extend() {
        let labels = Array3::<u32>::zeros((3, 3, 3));
        let m = measure(&labels, SurfaceEstimator::default());
        assert!(m.is_empty());

        let mut acc = Morphometry::default();
        let one = Morphometry {
            volumes: vec![3],
            surfaces: vec![9.0],
        };
        acc.extend(&one);
        acc.extend(&one);
        assert_eq!(acc.len(), 2);
        assert_eq!(acc.surfaces, vec![9.0, 9.0]);
    }

    #[cfg(feature = "mesh")]
    #[test]
    fn test_measure_mesh_ball() {
        let r = 10usize;
        let labels = labelled_ball((25, 25, 25), (12, 12, 12), r, 1);
        let m = measure(&labels, SurfaceEstimator::Mesh);
        let area = 4.0 * PI * (r * r) as f64;
        // 网格面积比膨胀壳层更接近真实值.
        assert!((m.surfaces[0] - area).abs() / area < 0.25);
        let shell = measure(&labels, SurfaceEstimator::DilationShell);
        assert!(m.surfaces[0] < shell.surfaces[0]);
    }
}

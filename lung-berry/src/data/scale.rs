//! 均值池化降采样.

use std::ops::Range;

use ndarray::{Array3, ArrayView3, Axis, Zip};

use crate::Idx3d;

/// 以缩小倍数 `f` 降采样后, 长度为 `n` 的轴的新长度.
///
/// 非空轴至少保留一个体素.
#[inline]
pub(crate) fn scaled_len(n: usize, f: f64) -> usize {
    if n == 0 {
        return 0;
    }
    ((n as f64 / f).floor() as usize).max(1)
}

/// 降采样后第 `i` 个体素所对应的原始索引区间 (全局坐标), 裁剪到 `[0, n)`.
///
/// 区间为 `[floor(i * f), max(floor((i + 1) * f), floor(i * f) + 1))`,
/// 因此总是至少包含一个原始体素. 起点越界时退化为最后一个体素.
#[inline]
pub(crate) fn source_span(i: usize, f: f64, n: usize) -> Range<usize> {
    debug_assert!(n > 0);
    let lo = (i as f64 * f).floor() as usize;
    let hi = ((i + 1) as f64 * f).floor() as usize;
    let hi = hi.max(lo + 1).min(n);
    let lo = lo.min(n - 1);
    lo..hi.max(lo + 1)
}

/// 沿 `axis` 做一维均值池化.
///
/// `src` 的该轴对应全局原始索引 `[src_start, src_start + len)`,
/// 输出的该轴对应全局降采样索引 `[dst_start, dst_start + dst_len)`.
fn pool_axis(
    src: ArrayView3<f32>,
    axis: usize,
    src_start: usize,
    src_total: usize,
    dst_start: usize,
    dst_len: usize,
    f: f64,
) -> Array3<f32> {
    let mut shape = [src.dim().0, src.dim().1, src.dim().2];
    let src_len = shape[axis];
    shape[axis] = dst_len;
    let mut out = Array3::<f32>::zeros(shape);

    // 预先计算局部区间.
    let spans: Vec<Range<usize>> = (0..dst_len)
        .map(|k| {
            let g = source_span(dst_start + k, f, src_total);
            let lo = g.start.saturating_sub(src_start).min(src_len - 1);
            let hi = g.end.saturating_sub(src_start).min(src_len);
            lo..hi.max(lo + 1)
        })
        .collect();

    Zip::from(out.lanes_mut(Axis(axis)))
        .and(src.lanes(Axis(axis)))
        .for_each(|mut o, i| {
            for (dst, span) in o.iter_mut().zip(spans.iter()) {
                let n = span.len() as f32;
                *dst = span.clone().map(|k| i[k]).sum::<f32>() / n;
            }
        });
    out
}

/// 将一块全分辨率数据池化到工作分辨率.
///
/// `src` 是全分辨率数据中以 `src_origin` 为起点的一块, 全分辨率数据总形状为 `src_total`;
/// 输出覆盖工作分辨率下以 `dst_origin` 为起点, 形状为 `dst_shape` 的区域.
/// 工作分辨率下的每个体素取其对应原始区间的算术平均, 区间超出 `src` 的部分被裁剪.
pub(crate) fn pool_block(
    src: ArrayView3<f32>,
    src_origin: Idx3d,
    src_total: Idx3d,
    dst_origin: Idx3d,
    dst_shape: Idx3d,
    factors: [f64; 3],
) -> Array3<f32> {
    // 先处理最长 (通常缩小倍数最大) 的 x 轴, 使中间结果最小.
    let a = pool_axis(
        src,
        2,
        src_origin.2,
        src_total.2,
        dst_origin.2,
        dst_shape.2,
        factors[2],
    );
    let b = pool_axis(
        a.view(),
        1,
        src_origin.1,
        src_total.1,
        dst_origin.1,
        dst_shape.1,
        factors[1],
    );
    pool_axis(
        b.view(),
        0,
        src_origin.0,
        src_total.0,
        dst_origin.0,
        dst_shape.0,
        factors[0],
    )
}

/// 将整个体数据按各轴缩小倍数 `factors` 均值降采样.
///
/// 输出每一维长度为 `max(floor(n / f), 1)` (空轴保持为 0).
/// 用于由预览图构建粗粒度掩膜, 也是分块重采样所采用的同一套池化规则.
pub fn downscale_mean(volume: ArrayView3<f32>, factors: [f64; 3]) -> Array3<f32> {
    let (z, y, x) = volume.dim();
    if z * y * x == 0 {
        return Array3::zeros((0, 0, 0));
    }
    let shape = (
        scaled_len(z, factors[0]),
        scaled_len(y, factors[1]),
        scaled_len(x, factors[2]),
    );
    pool_block(volume, (0, 0, 0), (z, y, x), (0, 0, 0), shape, factors)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn float_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn test_source_span() {
        assert_eq!(source_span(0, 2.5, 100), 0..2);
        assert_eq!(source_span(1, 2.5, 100), 2..5);
        assert_eq!(source_span(2, 2.5, 100), 5..7);
        // 放大 (f < 1) 时每个体素至少对应一个原始体素.
        assert_eq!(source_span(3, 0.5, 100), 1..2);
        // 越界裁剪.
        assert_eq!(source_span(9, 2.0, 19), 18..19);
        assert_eq!(source_span(20, 2.0, 19), 18..19);
    }

    #[test]
    fn test_downscale_mean_integer() {
        let v = Array3::from_shape_fn((4, 4, 4), |(z, _, _)| z as f32);
        let d = downscale_mean(v.view(), [2.0, 2.0, 2.0]);
        assert_eq!(d.dim(), (2, 2, 2));
        assert!(float_eq(d[(0, 1, 1)], 0.5));
        assert!(float_eq(d[(1, 0, 0)], 2.5));
    }

    #[test]
    fn test_downscale_mean_fractional() {
        // x 方向 0..10, 倍数 2.5 -> 区间 [0,2), [2,5), [5,7), [7,10).
        let v = Array3::from_shape_fn((1, 1, 10), |(_, _, x)| x as f32);
        let d = downscale_mean(v.view(), [1.0, 1.0, 2.5]);
        assert_eq!(d.dim(), (1, 1, 4));
        assert!(float_eq(d[(0, 0, 0)], 0.5));
        assert!(float_eq(d[(0, 0, 1)], 3.0));
        assert!(float_eq(d[(0, 0, 2)], 5.5));
        assert!(float_eq(d[(0, 0, 3)], 8.0));
    }

    #[test]
    fn test_downscale_keeps_one_voxel() {
        let v = Array3::from_elem((1, 3, 3), 7.0f32);
        let d = downscale_mean(v.view(), [4.0, 4.0, 4.0]);
        assert_eq!(d.dim(), (1, 1, 1));
        assert!(float_eq(d[(0, 0, 0)], 7.0));
    }

    /// 分两块池化与整体池化结果一致.
    #[test]
    fn test_pool_block_matches_whole() {
        let v = Array3::from_shape_fn((10, 6, 6), |(z, y, x)| (z * 36 + y * 6 + x) as f32);
        let f = [2.5, 2.0, 2.0];
        let whole = downscale_mean(v.view(), f);
        assert_eq!(whole.dim(), (4, 3, 3));

        // 工作分辨率 z 行 [2, 4) 对应原始 [5, 10).
        let part = v.slice(ndarray::s![5..10, .., ..]);
        let p = pool_block(part, (5, 0, 0), (10, 6, 6), (2, 0, 0), (2, 3, 3), f);
        for ((z, y, x), val) in p.indexed_iter() {
            assert!(float_eq(*val, whole[(z + 2, y, x)]));
        }
    }
}

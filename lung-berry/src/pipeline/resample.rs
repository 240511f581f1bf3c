//! 分片重采样: 把全分辨率数据逐片读入并均值池化到工作分辨率.

use std::ops::Range;

use ndarray::{s, Array3};

use super::schedule::Tile;
use crate::data::scale::{pool_block, source_span};
use crate::data::{SourceResult, VolumeSource};
use crate::{Box3d, Idx3d};

/// 分片重采样器.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Resampler {
    /// 全分辨率到工作分辨率的缩小倍数 `[z, y, x]`.
    pub factors: [f64; 3],

    /// 每片包含的工作分辨率 z 行数.
    pub slab_rows: usize,
}

/// 工作分辨率区间 `[origin, origin + len)` 在长度为 `n` 的全分辨率轴上对应的区间.
fn span_range(origin: usize, len: usize, f: f64, n: usize) -> Range<usize> {
    let first = source_span(origin, f, n);
    let last = source_span(origin + len - 1, f, n);
    first.start..last.end
}

impl Resampler {
    /// 创建重采样器. `slab_rows` 至少为 1.
    pub fn new(factors: [f64; 3], slab_rows: usize) -> Self {
        Self {
            factors,
            slab_rows: slab_rows.max(1),
        }
    }

    /// 工作分辨率区间 `region` 对应的全分辨率区间, 已裁剪到 `source_shape` 之内.
    ///
    /// `region` 与 `source_shape` 都不能为空.
    pub fn source_region(&self, region: &Box3d, source_shape: Idx3d) -> Box3d {
        let (o, l, f, n) = (region.start, region.shape(), self.factors, source_shape);
        let z = span_range(o.0, l.0, f[0], n.0);
        let y = span_range(o.1, l.1, f[1], n.1);
        let x = span_range(o.2, l.2, f[2], n.2);
        Box3d::new((z.start, y.start, x.start), (z.end, y.end, x.end))
    }

    /// 把 `tile` 对应的全分辨率数据重采样到工作分辨率.
    ///
    /// 每次只读取 `slab_rows` 行工作分辨率数据对应的全分辨率数据,
    /// 峰值内存与分块大小而非全分辨率体积成正比.
    pub fn resample(&self, source: &dyn VolumeSource, tile: &Tile) -> SourceResult<Array3<f32>> {
        let total = source.shape();
        let mut out = Array3::<f32>::zeros(tile.shape);
        if tile.bbox().is_empty() {
            return Ok(out);
        }

        let (rows, ny, nx) = tile.shape;
        for z0 in (0..rows).step_by(self.slab_rows) {
            let len = self.slab_rows.min(rows - z0);
            let dst_origin = (tile.origin.0 + z0, tile.origin.1, tile.origin.2);
            let dst_shape = (len, ny, nx);
            let region = self.source_region(&Box3d::from_origin(dst_origin, dst_shape), total);
            let data = source.read(&region)?;
            let block = pool_block(
                data.view(),
                region.start,
                total,
                dst_origin,
                dst_shape,
                self.factors,
            );
            out.slice_mut(s![z0..z0 + len, .., ..]).assign(&block);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{downscale_mean, ArraySource, SourceError};
    use crate::pipeline::schedule::TileGrid;
    use std::sync::Mutex;

    /// 记录每次读取区间的数据源.
    struct Recording {
        inner: ArraySource,
        reads: Mutex<Vec<Box3d>>,
    }

    impl VolumeSource for Recording {
        fn shape(&self) -> Idx3d {
            self.inner.shape()
        }

        fn read(&self, region: &Box3d) -> SourceResult<Array3<f32>> {
            self.reads.lock().unwrap().push(*region);
            self.inner.read(region)
        }
    }

    fn ramp(shape: Idx3d) -> Array3<f32> {
        Array3::from_shape_fn(shape, |(z, y, x)| (z * 7 + y * 3 + x) as f32 % 23.0)
    }

    fn f32_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn test_source_region() {
        let r = Resampler::new([2.5, 8.0, 8.0], 10);
        let region = r.source_region(&Box3d::from_origin((0, 1, 2), (4, 2, 1)), (100, 100, 100));
        assert_eq!(region, Box3d::new((0, 8, 16), (10, 24, 24)));

        // 超出全分辨率范围的部分被裁剪.
        let region = r.source_region(&Box3d::from_origin((39, 12, 12), (1, 1, 1)), (99, 100, 100));
        assert_eq!(region, Box3d::new((97, 96, 96), (99, 100, 100)));
    }

    /// 逐块逐片重采样的结果与一次性整体降采样完全一致.
    #[test]
    fn test_resample_matches_global() {
        let data = ramp((23, 17, 30));
        let factors = [2.5, 2.0, 3.0];
        let global = downscale_mean(data.view(), factors);
        assert_eq!(global.dim(), (9, 8, 10));

        let source = ArraySource::new(data);
        let r = Resampler::new(factors, 2);
        let grid = TileGrid::new(global.dim(), 4);
        for tile in grid.iter() {
            let got = r.resample(&source, &tile).unwrap();
            assert_eq!(got.dim(), tile.shape);
            let [z, y, x] = tile.bbox().ranges();
            let expected = global.slice(s![z, y, x]);
            assert!(got.iter().zip(expected.iter()).all(|(a, b)| f32_eq(*a, *b)));
        }
    }

    #[test]
    fn test_resample_slab_bounded() {
        let source = Recording {
            inner: ArraySource::new(ramp((40, 8, 8))),
            reads: Mutex::new(Vec::new()),
        };
        let r = Resampler::new([2.0, 2.0, 2.0], 3);
        let tile = Tile {
            index: 0,
            origin: (0, 0, 0),
            shape: (10, 4, 4),
        };
        r.resample(&source, &tile).unwrap();

        let reads = source.reads.lock().unwrap();
        // 10 行按 3 行一片, 共 4 片, 每片至多 6 个全分辨率平面.
        assert_eq!(reads.len(), 4);
        assert!(reads.iter().all(|b| b.shape().0 <= 6));
        assert_eq!(reads[3], Box3d::new((18, 0, 0), (20, 8, 8)));
    }

    #[test]
    fn test_resample_propagates_read_error() {
        struct Broken;
        impl VolumeSource for Broken {
            fn shape(&self) -> Idx3d {
                (4, 4, 4)
            }
            fn read(&self, _: &Box3d) -> SourceResult<Array3<f32>> {
                Err(SourceError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "disk on fire",
                )))
            }
        }
        let tile = Tile {
            index: 0,
            origin: (0, 0, 0),
            shape: (2, 2, 2),
        };
        let r = Resampler::new([2.0; 3], 10);
        assert!(matches!(r.resample(&Broken, &tile), Err(SourceError::Io(_))));
    }
}

//! 分块结果汇总与输出.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use ndarray::{s, Array3};

use super::context::RunStats;
use super::error::{PipelineResult, SegmentError};
use super::morphometry::Morphometry;
use super::report::{Report, VoxelSize};
use super::schedule::Tile;
use crate::consts::gray;
use crate::Idx3d;

/// 单个分块经过分割与定量后的结果.
#[derive(Debug)]
pub enum TileResult {
    /// 分割成功, 附带标签体数据与逐肺泡记录.
    Segmented {
        /// 与分块同形状的标签体数据.
        labels: Array3<u32>,
        /// 按标签升序的体积与表面积.
        morphometry: Morphometry,
    },

    /// 分块中没有肺泡.
    Empty,

    /// 处理失败.
    Failed(SegmentError),
}

/// 全局输出体数据的保存格式.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OutputFormat {
    /// 单个 `alveoli.npy` 文件.
    #[default]
    Npy,

    /// `alveoli/` 目录下每个 z 平面一张 png.
    PngStack,
}

#[derive(Debug)]
struct Inner {
    volume: Array3<u8>,
    records: BTreeMap<usize, Morphometry>,
}

/// 线程安全的结果汇总器.
///
/// 分块互不重叠, 因此粘贴总是直接覆盖; 记录以分块序号为键保存,
/// 最终按分块序号拼接, 与各分块完成的先后无关.
#[derive(Debug)]
pub struct ResultAggregator {
    inner: Mutex<Inner>,
}

impl ResultAggregator {
    /// 创建全零的全局输出.
    pub fn new(output_shape: Idx3d) -> Self {
        Self {
            inner: Mutex::new(Inner {
                volume: Array3::from_elem(output_shape, gray::BACKGROUND),
                records: BTreeMap::new(),
            }),
        }
    }

    /// 提交一个分块的结果.
    ///
    /// 失败的分块只记录日志, 不合并任何数据.
    pub fn submit(&self, tile: &Tile, result: TileResult) {
        let (labels, morphometry) = match result {
            TileResult::Segmented {
                labels,
                morphometry,
            } => (labels, morphometry),
            TileResult::Empty => return,
            TileResult::Failed(e) => {
                log::warn!("tile #{} at {:?} failed: {e}", tile.index, tile.origin);
                return;
            }
        };
        if labels.dim() != tile.shape {
            log::warn!(
                "tile #{} at {:?}: label shape {:?} does not match tile shape {:?}, dropped",
                tile.index,
                tile.origin,
                labels.dim(),
                tile.shape
            );
            return;
        }

        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let bbox = tile.bbox().clip(inner.volume.dim());
        if bbox.shape() != tile.shape {
            log::warn!(
                "tile #{} at {:?} lies outside the output volume, dropped",
                tile.index,
                tile.origin
            );
            return;
        }
        let [z, y, x] = bbox.ranges();
        inner
            .volume
            .slice_mut(s![z, y, x])
            .zip_mut_with(&labels, |o, &l| {
                *o = if l == 0 {
                    gray::BACKGROUND
                } else {
                    gray::ALVEOLUS
                };
            });
        inner.records.insert(tile.index, morphometry);
    }

    /// 汇总所有结果.
    pub fn finish(self, stats: RunStats) -> AggregatedResult {
        let inner = self
            .inner
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        let mut all = Morphometry::default();
        for m in inner.records.values() {
            all.extend(m);
        }
        AggregatedResult {
            volume: inner.volume,
            volumes: all.volumes,
            surfaces: all.surfaces,
            stats,
            voxel_size: VoxelSize::default(),
            tissue_voxels: None,
        }
    }
}

/// 一次运行的全部结果.
#[derive(Debug, Clone)]
pub struct AggregatedResult {
    /// 工作分辨率下的全局二值输出, 肺泡为 255.
    pub volume: Array3<u8>,

    /// 各肺泡体积 (体素).
    pub volumes: Vec<u64>,

    /// 各肺泡表面积估计 (体素面).
    pub surfaces: Vec<f64>,

    /// 运行统计.
    pub stats: RunStats,

    /// 报告所用的体素尺寸.
    pub voxel_size: VoxelSize,

    /// 组织体积 (工作分辨率体素), 用于密度类指标.
    pub tissue_voxels: Option<f64>,
}

/// 每行一个数值.
fn write_column<T: std::fmt::Display>(path: &Path, values: &[T]) -> std::io::Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    for v in values {
        writeln!(w, "{v}")?;
    }
    w.flush()
}

impl AggregatedResult {
    /// 肺泡个数.
    #[inline]
    pub fn count(&self) -> usize {
        self.volumes.len()
    }

    /// 换算到物理单位的报告.
    pub fn report(&self) -> Report {
        Report::from_records(
            &self.volumes,
            &self.surfaces,
            self.voxel_size,
            self.tissue_voxels,
        )
    }

    /// 把全局输出、逐肺泡记录与报告写入 `dir`.
    ///
    /// 写入 `volumes.csv` (立方微米), `surfaces.csv` (平方微米),
    /// `surface_to_volume.csv` (每毫米) 与 `report.txt`.
    pub fn write<P: AsRef<Path>>(&self, dir: P, format: OutputFormat) -> PipelineResult<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        match format {
            OutputFormat::Npy => ndarray_npy::write_npy(dir.join("alveoli.npy"), &self.volume)?,
            OutputFormat::PngStack => {
                let stack = dir.join("alveoli");
                fs::create_dir_all(&stack)?;
                let (_, height, width) = self.volume.dim();
                for (z, plane) in self.volume.outer_iter().enumerate() {
                    let mut buf = image::GrayImage::new(width as u32, height as u32);
                    for ((h, w), &pix) in plane.indexed_iter() {
                        buf.put_pixel(w as u32, h as u32, image::Luma([pix]));
                    }
                    buf.save(stack.join(format!("{z:05}.png")))?;
                }
            }
        }

        let report = self.report();
        write_column(&dir.join("volumes.csv"), &report.volumes)?;
        write_column(&dir.join("surfaces.csv"), &report.surfaces)?;
        write_column(&dir.join("surface_to_volume.csv"), &report.surface_to_volume)?;
        fs::write(dir.join("report.txt"), report.to_string())?;
        log::info!("{} alveoli written to {}", self.count(), dir.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use threadpool::ThreadPool;

    fn tile(index: usize, origin: Idx3d, shape: Idx3d) -> Tile {
        Tile {
            index,
            origin,
            shape,
        }
    }

    fn segmented(shape: Idx3d, fill: u32, volumes: Vec<u64>) -> TileResult {
        let surfaces = volumes.iter().map(|&v| v as f64 * 2.0).collect();
        TileResult::Segmented {
            labels: Array3::from_elem(shape, fill),
            morphometry: Morphometry { volumes, surfaces },
        }
    }

    fn temp_dir(name: &str) -> std::path::PathBuf {
        let d = std::env::temp_dir().join(format!("lung-berry-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&d);
        d
    }

    #[test]
    fn test_aggregate_paste_and_isolation() {
        let agg = ResultAggregator::new((4, 4, 8));
        let mut labels = Array3::<u32>::zeros((4, 4, 4));
        labels[(1, 2, 3)] = 1;
        labels[(0, 0, 0)] = 2;
        agg.submit(
            &tile(1, (0, 0, 4), (4, 4, 4)),
            TileResult::Segmented {
                labels,
                morphometry: Morphometry {
                    volumes: vec![1, 1],
                    surfaces: vec![26.0, 7.0],
                },
            },
        );
        agg.submit(
            &tile(0, (0, 0, 0), (4, 4, 4)),
            TileResult::Failed(SegmentError::NonFiniteIntensity((0, 0, 0))),
        );
        let r = agg.finish(RunStats::default());

        assert_eq!(r.volume[(1, 2, 7)], gray::ALVEOLUS);
        assert_eq!(r.volume[(0, 0, 4)], gray::ALVEOLUS);
        assert_eq!(r.volume.iter().filter(|&&p| gray::is_alveolus(p)).count(), 2);
        // 失败分块的区域保持为零.
        assert!(r.volume.slice(s![.., .., 0..4]).iter().all(|&p| p == 0));
        assert_eq!(r.volumes, vec![1, 1]);
        assert_eq!(r.surfaces, vec![26.0, 7.0]);
    }

    #[test]
    fn test_aggregate_rejects_wrong_shape() {
        let agg = ResultAggregator::new((4, 4, 4));
        agg.submit(&tile(0, (0, 0, 0), (2, 2, 2)), segmented((3, 3, 3), 1, vec![27]));
        agg.submit(&tile(1, (3, 3, 3), (2, 2, 2)), segmented((2, 2, 2), 1, vec![8]));
        agg.submit(&tile(2, (0, 0, 0), (2, 2, 2)), TileResult::Empty);
        let r = agg.finish(RunStats::default());
        assert_eq!(r.count(), 0);
        assert!(r.volume.iter().all(|&p| p == 0));
    }

    /// 并发提交时, 记录顺序只取决于分块序号.
    #[test]
    fn test_aggregate_concurrent_order() {
        let n = 16;
        let agg = Arc::new(ResultAggregator::new((n, 2, 2)));
        let pool = ThreadPool::new(4);
        for i in (0..n).rev() {
            let agg = Arc::clone(&agg);
            pool.execute(move || {
                let t = tile(i, (i, 0, 0), (1, 2, 2));
                agg.submit(&t, segmented((1, 2, 2), 1, vec![i as u64, 100 + i as u64]));
            });
        }
        pool.join();

        let agg = Arc::try_unwrap(agg).unwrap();
        let r = agg.finish(RunStats::default());
        let expected: Vec<u64> = (0..n as u64).flat_map(|i| [i, 100 + i]).collect();
        assert_eq!(r.volumes, expected);
        assert!(r.volume.iter().all(|&p| p == gray::ALVEOLUS));
    }

    #[test]
    fn test_aggregate_write() {
        let agg = ResultAggregator::new((2, 3, 4));
        agg.submit(&tile(0, (0, 0, 0), (2, 3, 4)), segmented((2, 3, 4), 3, vec![8]));
        let mut r = agg.finish(RunStats::default());
        r.tissue_voxels = Some(8.0e6);

        let dir = temp_dir("write-npy");
        r.write(&dir, OutputFormat::Npy).unwrap();
        let back: Array3<u8> = ndarray_npy::read_npy(dir.join("alveoli.npy")).unwrap();
        assert_eq!(back, r.volume);
        let volumes = fs::read_to_string(dir.join("volumes.csv")).unwrap();
        assert_eq!(volumes.trim(), "1000");
        let s2v = fs::read_to_string(dir.join("surface_to_volume.csv")).unwrap();
        assert_eq!(s2v.trim(), "400");
        let report = fs::read_to_string(dir.join("report.txt")).unwrap();
        assert!(report.contains("1 alveoli detected in the volume"));
        assert!(report.contains("Alveolar density is 1 mm^-3"));

        let dir = temp_dir("write-png");
        r.write(&dir, OutputFormat::PngStack).unwrap();
        let img = image::open(dir.join("alveoli").join("00001.png"))
            .unwrap()
            .into_luma8();
        assert_eq!(img.dimensions(), (4, 3));
        assert!(img.pixels().all(|p| p.0[0] == gray::ALVEOLUS));
        assert!(!dir.join("alveoli").join("00002.png").exists());
    }
}

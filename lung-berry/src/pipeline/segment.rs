//! 骨架引导的分水岭肺泡分割.
//!
//! 单个分块的处理步骤:
//!
//! 1. 低于阈值的体素为前景 (气腔);
//! 2. 球形开运算去噪, 填充小空洞, 得到掩膜 `M`;
//! 3. 细化 `M` 得到骨架 `S`, 骨架为空则分块中没有肺泡;
//! 4. 矢量化 `S` 并剪枝得到 `S'`;
//! 5. 以 `S'` 中的长 junction-to-endpoint 分支为肺泡种子,
//!   junction-to-junction 分支为支气管种子, 在 `-EDT(M)` 上做分水岭;
//! 6. 肺泡盆地与没有任何种子的独立腔室一起作为候选,
//!   按 26 连通重新标记, 并按体素数过滤.

use ndarray::{Array3, ArrayView3, Zip};

use super::error::SegmentError;
use crate::consts::defaults;
use crate::morph_3d::{
    binary_opening_ball, distance_transform_edt, fill_small_holes, label_components,
    skeletonize, watershed_compact, Connectivity,
};
use crate::skeleton::{paint, BranchType, SkeletonGraph};

/// 分割参数.
///
/// `threshold`, `min_size`, `max_size` 与采集条件和分辨率强相关, 没有默认值.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SegmentParams {
    /// 亮度阈值, 严格小于该值的体素为气腔.
    pub threshold: f32,

    /// 去噪开运算的球半径.
    pub opening_radius: usize,

    /// 被填充空洞的体素数上限 (不含).
    pub hole_area: usize,

    /// junction-to-endpoint 分支的剪枝长度, 不超过该长度的分支被剪掉.
    pub prune_length: f64,

    /// 分水岭紧致项系数.
    pub compactness: f64,

    /// 保留的肺泡最小体素数 (含).
    pub min_size: usize,

    /// 保留的肺泡最大体素数 (含).
    pub max_size: usize,
}

impl SegmentParams {
    /// 指定必需参数, 其余参数取默认值.
    pub fn new(threshold: f32, min_size: usize, max_size: usize) -> Self {
        Self {
            threshold,
            opening_radius: defaults::OPENING_RADIUS,
            hole_area: defaults::HOLE_AREA,
            prune_length: defaults::PRUNE_LENGTH,
            compactness: defaults::COMPACTNESS,
            min_size,
            max_size,
        }
    }
}

/// 分块内保留下来的肺泡标签.
#[derive(Debug, Clone, PartialEq)]
pub struct AlveoliLabels {
    /// 与分块同形状的标签体数据, 0 为背景, 肺泡编号为 `1..=count`.
    pub labels: Array3<u32>,

    /// 肺泡个数.
    pub count: u32,
}

/// 单个分块的分割结果.
#[derive(Debug)]
pub enum SegmentOutcome {
    /// 至少保留了一个肺泡.
    Segmented(AlveoliLabels),

    /// 分块中没有肺泡.
    Empty,

    /// 分割失败, 该分块不产生任何输出.
    Failed(SegmentError),
}

impl SegmentOutcome {
    /// 保留的肺泡个数.
    pub fn count(&self) -> u32 {
        match self {
            Self::Segmented(l) => l.count,
            _ => 0,
        }
    }

    /// 标签体数据. 仅 `Segmented` 时存在.
    pub fn labels(&self) -> Option<&Array3<u32>> {
        match self {
            Self::Segmented(l) => Some(&l.labels),
            _ => None,
        }
    }
}

/// 分水岭种子.
///
/// 两类种子共用一个整数空间: 肺泡种子编号为 `1..=alveoli`,
/// 支气管种子编号从 [`Markers::first_bronchial`] 开始.
#[derive(Debug, Clone, PartialEq)]
pub struct Markers {
    /// 种子体数据, 0 为非种子.
    pub volume: Array3<u32>,

    /// 肺泡种子个数.
    pub alveoli: u32,

    /// 支气管种子个数.
    pub bronchial: u32,
}

impl Markers {
    /// 第一个支气管种子编号, 也是肺泡编号的上界 (不含).
    #[inline]
    pub fn first_bronchial(&self) -> u32 {
        self.alveoli + 1
    }

    /// 编号是否属于肺泡种子?
    #[inline]
    pub fn is_alveolus(&self, id: u32) -> bool {
        (1..self.first_bronchial()).contains(&id)
    }

    /// 种子总数.
    #[inline]
    pub fn total(&self) -> u32 {
        self.alveoli + self.bronchial
    }
}

/// 单分块肺泡分割器. 不持有任何可变状态, 可以在多个线程间共享.
#[derive(Debug, Clone)]
pub struct Segmenter {
    params: SegmentParams,
}

impl Segmenter {
    /// 以 `params` 创建分割器.
    #[inline]
    pub fn new(params: SegmentParams) -> Self {
        Self { params }
    }

    /// 分割参数.
    #[inline]
    pub fn params(&self) -> &SegmentParams {
        &self.params
    }

    /// 分割一个强度分块.
    ///
    /// 返回的标签体数据与 `tile` 形状相同, 其中每个肺泡的体素数都位于
    /// `[min_size, max_size]` 之内. 对相同输入多次调用的结果完全一致.
    pub fn segment(&self, tile: ArrayView3<f32>) -> SegmentOutcome {
        if tile.len() >= u32::MAX as usize {
            return SegmentOutcome::Failed(SegmentError::TileTooLarge(tile.len()));
        }
        if let Some((pos, _)) = tile.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return SegmentOutcome::Failed(SegmentError::NonFiniteIntensity(pos));
        }

        let mask = self.clean_mask(tile);
        let skeleton = skeletonize(&mask);
        if !skeleton.iter().any(|&p| p) {
            return SegmentOutcome::Empty;
        }

        let pruned = self.prune(&skeleton, &SkeletonGraph::from_mask(&skeleton));
        let markers = self.markers(&pruned);
        log::trace!(
            "tile {:?}: {} alveolus seeds, {} bronchial seeds",
            tile.dim(),
            markers.alveoli,
            markers.bronchial
        );

        let basins = if markers.total() > 0 {
            let potential = distance_transform_edt(&mask).mapv(|d| -d);
            watershed_compact(
                &potential,
                &markers.volume,
                &mask,
                self.params.compactness,
            )
        } else {
            Array3::zeros(mask.dim())
        };

        let candidates = fold_basins(&mask, &basins, &markers);
        let (labels, count) = self.filter_by_size(&candidates);
        if count == 0 {
            return SegmentOutcome::Empty;
        }
        SegmentOutcome::Segmented(AlveoliLabels { labels, count })
    }

    /// 二值化, 开运算, 填充小空洞.
    pub fn clean_mask(&self, tile: ArrayView3<f32>) -> Array3<bool> {
        let threshold = self.params.threshold;
        let binary = tile.mapv(|v| v < threshold);
        let opened = binary_opening_ball(&binary, self.params.opening_radius);
        fill_small_holes(&opened, self.params.hole_area)
    }

    /// 骨架剪枝.
    ///
    /// 孤立分支与环总是被剪掉, 不超过剪枝长度的 junction-to-endpoint 分支也被剪掉;
    /// 随后恢复所有更长的 junction-to-endpoint 分支和全部 junction-to-junction 分支.
    /// `graph` 必须由 `skeleton` 矢量化得到.
    pub fn prune(&self, skeleton: &Array3<bool>, graph: &SkeletonGraph) -> Array3<bool> {
        let limit = self.params.prune_length;
        let is_short_spur =
            |k: BranchType, len: f64| k == BranchType::JunctionToEndpoint && len <= limit;
        let is_kept = |k: BranchType, len: f64| {
            (k == BranchType::JunctionToEndpoint && len > limit)
                || k == BranchType::JunctionToJunction
        };

        let mut erase = Array3::from_elem(skeleton.dim(), false);
        paint(
            &mut erase,
            graph.branches().iter().filter(|b| {
                matches!(b.kind, BranchType::Isolated | BranchType::Cycle)
                    || is_short_spur(b.kind, b.length)
            }),
            true,
        );
        paint(
            &mut erase,
            graph
                .branches()
                .iter()
                .filter(|b| is_kept(b.kind, b.length)),
            false,
        );

        Zip::from(skeleton)
            .and(&erase)
            .map_collect(|&s, &e| s && !e)
    }

    /// 由剪枝后的骨架生成分水岭种子.
    ///
    /// 重新矢量化后, 长于剪枝长度的 junction-to-endpoint 分支按发现顺序编号为
    /// `1, 2, ...`; junction-to-junction 分支接着编号. 支气管种子后绘制,
    /// 与肺泡种子重叠的体素归支气管所有.
    pub fn markers(&self, pruned: &Array3<bool>) -> Markers {
        let graph = SkeletonGraph::from_mask(pruned);
        let limit = self.params.prune_length;
        let mut volume = Array3::<u32>::zeros(pruned.dim());

        let seeds = graph
            .of_kind(BranchType::JunctionToEndpoint)
            .filter(|b| b.length > limit);
        let mut alveoli = 0u32;
        for b in seeds {
            alveoli += 1;
            paint(&mut volume, [b], alveoli);
        }

        let mut id = alveoli;
        for b in graph.of_kind(BranchType::JunctionToJunction) {
            id += 1;
            paint(&mut volume, [b], id);
        }

        Markers {
            volume,
            alveoli,
            bronchial: id - alveoli,
        }
    }

    /// 重新标记 26 连通分量, 只保留体素数位于 `[min_size, max_size]` 的分量,
    /// 并按光栅顺序重新从 1 编号.
    fn filter_by_size(&self, candidates: &Array3<bool>) -> (Array3<u32>, u32) {
        let (labels, sizes) = label_components(candidates, Connectivity::TwentySix);
        let band = self.params.min_size..=self.params.max_size;

        let mut remap = vec![0u32; sizes.len() + 1];
        let mut count = 0u32;
        for (i, size) in sizes.iter().enumerate() {
            if band.contains(size) {
                count += 1;
                remap[i + 1] = count;
            }
        }
        (labels.mapv(|l| remap[l as usize]), count)
    }
}

/// 合并分水岭盆地.
///
/// 掩膜内属于肺泡种子的盆地, 以及任何种子都无法到达的体素 (没有种子的独立腔室)
/// 成为候选; 支气管盆地成为背景.
///
/// 因此剪枝后骨架为空的腔室整体保留为一个候选. 这也包括一段笔直无分叉的气管:
/// 它的骨架只有一条孤立分支, 剪枝后没有任何种子, 最终同样被当作一个肺泡,
/// 只能靠体积上下限把它排除.
pub fn fold_basins(mask: &Array3<bool>, basins: &Array3<u32>, markers: &Markers) -> Array3<bool> {
    Zip::from(mask)
        .and(basins)
        .map_collect(|&m, &b| m && (b == 0 || markers.is_alveolus(b)))
}

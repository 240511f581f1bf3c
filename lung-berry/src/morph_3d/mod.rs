//! 3D 形态学操作.
//!
//! 所有函数都作用在 `(z, y, x)` 组织的 `Array3<bool>` 二值体数据上,
//! `true` 为前景. 体数据之外的体素在不同操作中的含义不同, 见各函数说明.

use std::collections::VecDeque;

use itertools::iproduct;
use ndarray::Array3;
use once_cell::sync::Lazy;

use crate::Idx3d;

mod edt;
mod thin;
mod watershed;

pub use edt::{
    binary_closing_ball, binary_dilation_ball, binary_erosion_ball, binary_opening_ball,
    distance_transform_edt, squared_edt,
};
pub use thin::skeletonize;
pub use watershed::watershed_compact;

/// 三维偏移量 `(dz, dy, dx)`.
pub type Offset3d = (isize, isize, isize);

/// 6 邻域 (钻石型) 偏移.
pub const DIAMOND: [Offset3d; 6] = [
    (-1, 0, 0),
    (1, 0, 0),
    (0, -1, 0),
    (0, 1, 0),
    (0, 0, -1),
    (0, 0, 1),
];

/// 26 邻域偏移, 按 `(dz, dy, dx)` 字典序排列.
pub static FULL: Lazy<Vec<Offset3d>> = Lazy::new(|| {
    iproduct!(-1isize..=1, -1isize..=1, -1isize..=1)
        .filter(|&d| d != (0, 0, 0))
        .collect()
});

/// 邻域连通方式.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Connectivity {
    /// 面相邻.
    Six,

    /// 面, 棱, 顶点相邻.
    TwentySix,
}

impl Connectivity {
    /// 对应的偏移表.
    #[inline]
    pub fn offsets(self) -> &'static [Offset3d] {
        match self {
            Self::Six => &DIAMOND,
            Self::TwentySix => FULL.as_slice(),
        }
    }
}

/// `pos + d`, 结果越界 (包括负数) 时返回 `None`.
#[inline]
pub fn shift((z, y, x): Idx3d, (dz, dy, dx): Offset3d, (sz, sy, sx): Idx3d) -> Option<Idx3d> {
    let z = z.checked_add_signed(dz).filter(|&v| v < sz)?;
    let y = y.checked_add_signed(dy).filter(|&v| v < sy)?;
    let x = x.checked_add_signed(dx).filter(|&v| v < sx)?;
    Some((z, y, x))
}

/// `pos` 在 `shape` 内的全部邻居.
#[inline]
pub fn neighbours(
    pos: Idx3d,
    shape: Idx3d,
    conn: Connectivity,
) -> impl Iterator<Item = Idx3d> {
    conn.offsets()
        .iter()
        .filter_map(move |&d| shift(pos, d, shape))
}

/// 位置是否贴着体数据边界?
#[inline]
fn on_border((z, y, x): Idx3d, (sz, sy, sx): Idx3d) -> bool {
    z == 0 || y == 0 || x == 0 || z + 1 == sz || y + 1 == sy || x + 1 == sx
}

/// 连通域标记.
///
/// 标签从 1 开始, 按各连通域首个体素的光栅顺序 (z, y, x) 递增分配.
/// 返回标签体数据和各标签的体素个数 (`sizes[label - 1]`).
pub fn label_components(mask: &Array3<bool>, conn: Connectivity) -> (Array3<u32>, Vec<usize>) {
    let shape = mask.dim();
    let mut labels = Array3::<u32>::zeros(shape);
    let mut sizes = Vec::new();
    let mut queue = VecDeque::new();

    for (pos, &p) in mask.indexed_iter() {
        if !p || labels[pos] != 0 {
            continue;
        }
        let label = sizes.len() as u32 + 1;
        labels[pos] = label;
        queue.push_back(pos);
        let mut size = 0usize;
        while let Some(cur) = queue.pop_front() {
            size += 1;
            for n in neighbours(cur, shape, conn) {
                if mask[n] && labels[n] == 0 {
                    labels[n] = label;
                    queue.push_back(n);
                }
            }
        }
        sizes.push(size);
    }
    (labels, sizes)
}

/// 填充前景中的小空洞.
///
/// 不接触体数据边界, 且体素个数严格小于 `max_area` 的 6 连通背景区域会被改为前景.
pub fn fill_small_holes(mask: &Array3<bool>, max_area: usize) -> Array3<bool> {
    let shape = mask.dim();
    let background = mask.mapv(|p| !p);
    let (labels, sizes) = label_components(&background, Connectivity::Six);

    // 接触边界的背景区域不是空洞.
    let mut is_hole: Vec<bool> = sizes.iter().map(|&s| s < max_area).collect();
    for (pos, &l) in labels.indexed_iter() {
        if l != 0 && on_border(pos, shape) {
            is_hole[l as usize - 1] = false;
        }
    }

    let mut out = mask.clone();
    ndarray::Zip::from(&mut out)
        .and(&labels)
        .for_each(|o, &l| {
            if l != 0 && is_hole[l as usize - 1] {
                *o = true;
            }
        });
    out
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ndarray::s;

    /// 以 `c` 为球心, 半径 `r` 的数字球 `dz² + dy² + dx² <= r²`.
    pub(crate) fn ball(shape: Idx3d, c: Idx3d, r: usize) -> Array3<bool> {
        let r2 = (r * r) as isize;
        Array3::from_shape_fn(shape, |(z, y, x)| {
            let dz = z as isize - c.0 as isize;
            let dy = y as isize - c.1 as isize;
            let dx = x as isize - c.2 as isize;
            dz * dz + dy * dy + dx * dx <= r2
        })
    }

    pub(crate) fn count(mask: &Array3<bool>) -> usize {
        mask.iter().filter(|&&p| p).count()
    }

    #[test]
    fn test_shift_and_neighbours() {
        assert_eq!(shift((0, 0, 0), (-1, 0, 0), (2, 2, 2)), None);
        assert_eq!(shift((0, 0, 0), (1, 1, 1), (2, 2, 2)), Some((1, 1, 1)));
        assert_eq!(shift((1, 1, 1), (1, 0, 0), (2, 2, 2)), None);

        assert_eq!(neighbours((0, 0, 0), (3, 3, 3), Connectivity::Six).count(), 3);
        assert_eq!(
            neighbours((0, 0, 0), (3, 3, 3), Connectivity::TwentySix).count(),
            7
        );
        assert_eq!(
            neighbours((1, 1, 1), (3, 3, 3), Connectivity::TwentySix).count(),
            26
        );
    }

    #[test]
    fn test_label_components() {
        let mut m = Array3::from_elem((3, 5, 5), false);
        // 两个对角相邻的体素: 6 连通下是两个区域, 26 连通下是一个.
        m[(1, 1, 1)] = true;
        m[(2, 2, 2)] = true;
        // 一条独立的线.
        m.slice_mut(s![0, 4, ..]).fill(true);

        let (l6, s6) = label_components(&m, Connectivity::Six);
        assert_eq!(s6, vec![5, 1, 1]);
        assert_eq!(l6[(0, 4, 0)], 1);
        assert_eq!(l6[(1, 1, 1)], 2);
        assert_eq!(l6[(2, 2, 2)], 3);

        let (l26, s26) = label_components(&m, Connectivity::TwentySix);
        assert_eq!(s26, vec![5, 2]);
        assert_eq!(l26[(2, 2, 2)], 2);
        assert_eq!(l26[(0, 0, 0)], 0);
    }

    #[test]
    fn test_fill_small_holes() {
        // 实心立方体中挖一个 2x2x2 的空洞, 另外在边界上挖一个缺口.
        let mut m = Array3::from_elem((8, 8, 8), true);
        m.slice_mut(s![3..5, 3..5, 3..5]).fill(false);
        m.slice_mut(s![0..2, 0..2, 0..2]).fill(false);

        let filled = fill_small_holes(&m, 100);
        assert!(filled[(3, 3, 3)]);
        assert!(!filled[(0, 0, 0)]);
        assert_eq!(count(&filled), 512 - 8);

        // 预算不足, 不填充.
        let kept = fill_small_holes(&m, 8);
        assert!(!kept[(4, 4, 4)]);
        assert_eq!(kept, m);
    }
}

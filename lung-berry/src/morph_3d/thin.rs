//! 三维拓扑细化.
//!
//! 按六个边界方向轮流剥离简单点, 直到一整轮没有任何变化.
//! 一个前景体素只有在同时满足以下条件时才会被删除:
//!
//! 1. 它是当前方向上的边界体素 (该方向的邻居是背景或越界);
//! 2. 它不是端点 (26 邻域内恰好只有一个前景);
//! 3. 删除它不改变欧拉示性数;
//! 4. 它是简单点 (26 邻域内的前景彼此 26 连通).
//!
//! 同一方向上的候选点先统一收集, 再逐个复查简单性后删除.

use itertools::iproduct;
use ndarray::Array3;
use once_cell::sync::Lazy;

use super::{shift, Offset3d};
use crate::Idx3d;

/// 六个剥离方向.
const DIRECTIONS: [Offset3d; 6] = [
    (0, -1, 0),
    (0, 1, 0),
    (0, 0, 1),
    (0, 0, -1),
    (1, 0, 0),
    (-1, 0, 0),
];

/// 3x3x3 邻域中心的位序号.
const CENTER: u32 = 13;

/// 邻域内偏移 `d` 对应的位序号.
#[inline]
const fn bit((dz, dy, dx): Offset3d) -> u32 {
    ((dz + 1) * 9 + (dy + 1) * 3 + (dx + 1)) as u32
}

/// 欧拉示性数所需的覆盖表, 以及 26 邻域内部的邻接表.
struct Tables {
    /// 8 个顶点, 每个顶点被其所在卦限的 7 个邻居覆盖.
    vertices: Vec<u32>,
    /// 12 条棱, 每条棱被 3 个邻居覆盖.
    edges: Vec<u32>,
    /// 6 个面, 每个面被 1 个邻居覆盖.
    faces: Vec<u32>,
    /// `adjacent[b]`: 与位 `b` 26 相邻的其它邻域位 (不含中心).
    adjacent: [u32; 27],
}

static TABLES: Lazy<Tables> = Lazy::new(|| {
    let signs = [-1isize, 1];
    let vertices = iproduct!(signs, signs, signs)
        .map(|(a, b, c)| {
            iproduct!([0, a], [0, b], [0, c])
                .filter(|&d| d != (0, 0, 0))
                .fold(0u32, |m, d| m | 1 << bit(d))
        })
        .collect();

    let mut edges = Vec::with_capacity(12);
    for axis in 0..3 {
        for (s1, s2) in iproduct!(signs, signs) {
            let mut m = 0u32;
            for (a, b) in [(s1, 0), (0, s2), (s1, s2)] {
                let d = match axis {
                    0 => (0, a, b),
                    1 => (a, 0, b),
                    _ => (a, b, 0),
                };
                m |= 1 << bit(d);
            }
            edges.push(m);
        }
    }

    let faces = super::DIAMOND.iter().map(|&d| 1u32 << bit(d)).collect();

    let mut adjacent = [0u32; 27];
    let cube: Vec<Offset3d> = iproduct!(-1isize..=1, -1isize..=1, -1isize..=1).collect();
    for &a in cube.iter() {
        for &b in cube.iter() {
            let near = (a.0 - b.0).abs() <= 1 && (a.1 - b.1).abs() <= 1 && (a.2 - b.2).abs() <= 1;
            if a != b && near && b != (0, 0, 0) {
                adjacent[bit(a) as usize] |= 1 << bit(b);
            }
        }
    }

    Tables {
        vertices,
        edges,
        faces,
        adjacent,
    }
});

/// 以位图表示的 `pos` 的 3x3x3 邻域, 越界视为背景.
#[inline]
fn neighbourhood(img: &Array3<bool>, pos: Idx3d) -> u32 {
    let shape = img.dim();
    super::FULL
        .iter()
        .filter(|&&d| shift(pos, d, shape).is_some_and(|q| img[q]))
        .fold(0u32, |m, &d| m | 1 << bit(d))
}

/// 删除中心后, 中心立方体表面被邻居覆盖部分的欧拉示性数是否为 1?
fn is_euler_invariant(nb: u32) -> bool {
    let t = &*TABLES;
    let hit = |masks: &[u32]| masks.iter().filter(|&&m| nb & m != 0).count() as i32;
    hit(&t.vertices) - hit(&t.edges) + hit(&t.faces) == 1
}

/// 26 邻域内的前景是否恰好构成一个 26 连通分量?
fn is_simple(nb: u32) -> bool {
    let nb = nb & !(1 << CENTER);
    if nb == 0 {
        return false;
    }
    let t = &*TABLES;
    let mut seen = 1u32 << nb.trailing_zeros();
    loop {
        let mut grown = seen;
        let mut rest = seen;
        while rest != 0 {
            let b = rest.trailing_zeros();
            rest &= rest - 1;
            grown |= t.adjacent[b as usize] & nb;
        }
        if grown == seen {
            return seen == nb;
        }
        seen = grown;
    }
}

/// 三维拓扑细化, 得到单体素宽的骨架.
///
/// 每个 26 连通分量的连通性, 以及其中的环都会被保留.
/// 球状区域收缩为一小段线, 不会被完全删除.
pub fn skeletonize(mask: &Array3<bool>) -> Array3<bool> {
    let mut img = mask.clone();
    let shape = img.dim();
    let mut points: Vec<Idx3d> = img
        .indexed_iter()
        .filter(|(_, &p)| p)
        .map(|(i, _)| i)
        .collect();

    let mut rounds = 0usize;
    loop {
        let mut unchanged = 0;
        for dir in DIRECTIONS {
            let candidates: Vec<Idx3d> = points
                .iter()
                .copied()
                .filter(|&p| {
                    if shift(p, dir, shape).is_some_and(|q| img[q]) {
                        return false;
                    }
                    let nb = neighbourhood(&img, p) & !(1 << CENTER);
                    nb.count_ones() != 1 && is_euler_invariant(nb) && is_simple(nb)
                })
                .collect();

            let mut changed = false;
            for p in candidates {
                if is_simple(neighbourhood(&img, p)) {
                    img[p] = false;
                    changed = true;
                }
            }
            if changed {
                points.retain(|&p| img[p]);
            } else {
                unchanged += 1;
            }
        }
        rounds += 1;
        if unchanged == DIRECTIONS.len() {
            break;
        }
    }
    log::trace!(
        "skeletonize: {} rounds, {} voxels left",
        rounds,
        points.len()
    );
    img
}

//! 骨架矢量化.
//!
//! 把单体素宽的骨架 (26 邻接) 转换成由分支组成的图, 并对每条分支分类.
//!
//! 节点是骨架度数不等于 2 的体素: 度数为 1 的端点, 度数为 0 的孤立点,
//! 以及度数不小于 3 的交叉点. 彼此 26 相邻的交叉点被合并为一个交叉团,
//! 团内部的相邻关系不算分支. 两个节点之间经过的度数为 2 的体素构成一条分支.

use std::collections::{HashMap, HashSet};
use std::fmt::{self, Display, Formatter};

use ndarray::Array3;

use crate::morph_3d::{neighbours, Connectivity};
use crate::Idx3d;

/// 分支类型.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BranchType {
    /// 端点到端点, 或单个孤立体素.
    Isolated = 0,

    /// 交叉点到端点.
    JunctionToEndpoint = 1,

    /// 交叉点到交叉点.
    JunctionToJunction = 2,

    /// 不含任何节点的环.
    Cycle = 3,
}

impl Display for BranchType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as u8)
    }
}

/// 骨架图中的一条分支.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Branch {
    /// 分支类型.
    pub kind: BranchType,

    /// 沿路径的欧氏长度.
    pub length: f64,

    /// 有序体素路径, 包含两端的节点. 环的首尾是同一个体素.
    pub path: Vec<Idx3d>,
}

impl Branch {
    fn new(kind: BranchType, path: Vec<Idx3d>) -> Self {
        let length = path
            .windows(2)
            .map(|w| {
                let (a, b) = (w[0], w[1]);
                let dz = a.0 as f64 - b.0 as f64;
                let dy = a.1 as f64 - b.1 as f64;
                let dx = a.2 as f64 - b.2 as f64;
                (dz * dz + dy * dy + dx * dx).sqrt()
            })
            .sum();
        Self { kind, length, path }
    }
}

/// 把 `branches` 路径上的所有体素设置为 `value`.
pub fn paint<'a, T, I>(volume: &mut Array3<T>, branches: I, value: T)
where
    T: Copy,
    I: IntoIterator<Item = &'a Branch>,
{
    for b in branches {
        for &p in b.path.iter() {
            volume[p] = value;
        }
    }
}

/// 骨架分支图.
#[derive(Debug, Clone, Default)]
pub struct SkeletonGraph {
    branches: Vec<Branch>,
}

/// 体素在图中的角色.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Isolated,
    Endpoint,
    Path,
    Junction,
}

impl Role {
    fn from_degree(d: usize) -> Self {
        match d {
            0 => Self::Isolated,
            1 => Self::Endpoint,
            2 => Self::Path,
            _ => Self::Junction,
        }
    }
}

/// 无向边的规范形式.
#[inline]
fn edge(a: usize, b: usize) -> (usize, usize) {
    (a.min(b), a.max(b))
}

impl SkeletonGraph {
    /// 由骨架体数据构建分支图.
    ///
    /// 分支的发现顺序是确定的: 先按起始节点的光栅顺序, 再按其邻居的光栅顺序.
    /// 所有节点出发的分支之后, 依次追加剩余的环.
    pub fn from_mask(skeleton: &Array3<bool>) -> Self {
        let shape = skeleton.dim();
        let points: Vec<Idx3d> = skeleton
            .indexed_iter()
            .filter(|(_, &p)| p)
            .map(|(i, _)| i)
            .collect();
        let index: HashMap<Idx3d, usize> =
            points.iter().enumerate().map(|(i, &p)| (p, i)).collect();
        let adj: Vec<Vec<usize>> = points
            .iter()
            .map(|&p| {
                neighbours(p, shape, Connectivity::TwentySix)
                    .filter_map(|q| index.get(&q).copied())
                    .collect()
            })
            .collect();
        let roles: Vec<Role> = adj.iter().map(|a| Role::from_degree(a.len())).collect();
        let clusters = junction_clusters(&adj, &roles);

        let mut branches = Vec::new();
        let mut visited = vec![false; points.len()];
        let mut walked: HashSet<(usize, usize)> = HashSet::new();

        for start in 0..points.len() {
            match roles[start] {
                Role::Path => continue,
                Role::Isolated => {
                    visited[start] = true;
                    branches.push(Branch::new(BranchType::Isolated, vec![points[start]]));
                    continue;
                }
                Role::Endpoint | Role::Junction => visited[start] = true,
            }

            for &first in adj[start].iter() {
                let same_cluster = clusters[start].is_some() && clusters[start] == clusters[first];
                if same_cluster || walked.contains(&edge(start, first)) {
                    continue;
                }
                walked.insert(edge(start, first));

                let mut path = vec![points[start], points[first]];
                let (mut prev, mut cur) = (start, first);
                while roles[cur] == Role::Path {
                    visited[cur] = true;
                    let Some(&next) = adj[cur].iter().find(|&&n| n != prev) else {
                        break;
                    };
                    walked.insert(edge(cur, next));
                    path.push(points[next]);
                    (prev, cur) = (cur, next);
                }
                visited[cur] = true;

                let kind = match (roles[start], roles[cur]) {
                    (Role::Junction, Role::Junction) => BranchType::JunctionToJunction,
                    (Role::Junction, _) | (_, Role::Junction) => BranchType::JunctionToEndpoint,
                    _ => BranchType::Isolated,
                };
                branches.push(Branch::new(kind, path));
            }
        }

        // 剩余的度数为 2 的体素只能构成环.
        for start in 0..points.len() {
            if visited[start] {
                continue;
            }
            visited[start] = true;
            let mut path = vec![points[start]];
            let (mut prev, mut cur) = (start, adj[start][0]);
            while cur != start {
                visited[cur] = true;
                path.push(points[cur]);
                let Some(&next) = adj[cur].iter().find(|&&n| n != prev) else {
                    break;
                };
                (prev, cur) = (cur, next);
            }
            path.push(points[start]);
            branches.push(Branch::new(BranchType::Cycle, path));
        }

        Self { branches }
    }

    /// 全部分支.
    #[inline]
    pub fn branches(&self) -> &[Branch] {
        &self.branches
    }

    /// 分支条数.
    #[inline]
    pub fn len(&self) -> usize {
        self.branches.len()
    }

    /// 是否不含任何分支?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    /// 按类型筛选分支.
    pub fn of_kind(&self, kind: BranchType) -> impl Iterator<Item = &Branch> {
        self.branches.iter().filter(move |b| b.kind == kind)
    }
}

/// 交叉点按 26 邻接合并成团, 返回每个体素所属的团编号.
fn junction_clusters(adj: &[Vec<usize>], roles: &[Role]) -> Vec<Option<usize>> {
    let mut cluster = vec![None; adj.len()];
    let mut next = 0;
    let mut stack = Vec::new();
    for i in 0..adj.len() {
        if roles[i] != Role::Junction || cluster[i].is_some() {
            continue;
        }
        cluster[i] = Some(next);
        stack.push(i);
        while let Some(j) = stack.pop() {
            for &k in adj[j].iter() {
                if roles[k] == Role::Junction && cluster[k].is_none() {
                    cluster[k] = Some(next);
                    stack.push(k);
                }
            }
        }
        next += 1;
    }
    cluster
}

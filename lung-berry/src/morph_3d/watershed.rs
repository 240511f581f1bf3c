//! 带紧致项的种子分水岭.

use binary_heap_plus::BinaryHeap;
use ndarray::Array3;
use ordered_float::OrderedFloat;

use super::{neighbours, Connectivity};
use crate::Idx3d;

/// 优先队列中的元素.
#[derive(Debug, Clone, Copy)]
struct Elem {
    /// 优先级: 势能 + 紧致项.
    value: OrderedFloat<f64>,
    /// 入队次序, 用于打破平局.
    age: u64,
    index: Idx3d,
    /// 这一支洪水的种子位置.
    source: Idx3d,
}

impl Elem {
    #[inline]
    fn key(&self) -> (OrderedFloat<f64>, u64, Idx3d) {
        (self.value, self.age, self.index)
    }
}

#[inline]
fn euclid(a: Idx3d, b: Idx3d) -> f64 {
    let dz = a.0 as f64 - b.0 as f64;
    let dy = a.1 as f64 - b.1 as f64;
    let dx = a.2 as f64 - b.2 as f64;
    (dz * dz + dy * dy + dx * dx).sqrt()
}

/// 种子分水岭, 只在 `mask` 内部泛洪.
///
/// `markers` 中非零且位于 `mask` 内的体素是种子, 其值即为标签.
/// 体素 `n` 由种子 `s` 所在的洪水到达时, 优先级为
/// `potential[n] + compactness * |n - s|`. 优先级相同时先入队者优先,
/// 再相同时按体素索引的光栅顺序. 邻接为 6 连通.
///
/// 从种子出发无法到达的 `mask` 体素保持为 0.
///
/// # 注意
///
/// 三个参数的形状必须一致, 否则 panic.
pub fn watershed_compact(
    potential: &Array3<f64>,
    markers: &Array3<u32>,
    mask: &Array3<bool>,
    compactness: f64,
) -> Array3<u32> {
    let shape = potential.dim();
    assert_eq!(shape, markers.dim());
    assert_eq!(shape, mask.dim());

    let mut output = Array3::<u32>::zeros(shape);
    let mut heap = BinaryHeap::new_by(|a: &Elem, b: &Elem| b.key().cmp(&a.key()));

    for (pos, &m) in markers.indexed_iter() {
        if m == 0 || !mask[pos] {
            continue;
        }
        output[pos] = m;
        heap.push(Elem {
            value: OrderedFloat(potential[pos]),
            age: 0,
            index: pos,
            source: pos,
        });
    }

    let mut age = 0u64;
    while let Some(elem) = heap.pop() {
        if output[elem.index] != 0 && elem.index != elem.source {
            // 已经被更早的洪水占据.
            continue;
        }
        let label = output[elem.source];
        output[elem.index] = label;

        for n in neighbours(elem.index, shape, Connectivity::Six) {
            if !mask[n] || output[n] != 0 {
                continue;
            }
            age += 1;
            let value = potential[n] + compactness * euclid(n, elem.source);
            heap.push(Elem {
                value: OrderedFloat(value),
                age,
                index: n,
                source: elem.source,
            });
        }
    }
    output
}

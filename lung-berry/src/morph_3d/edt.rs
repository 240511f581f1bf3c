//! 精确欧氏距离变换, 以及基于它的球形结构元形态学.

use ndarray::{Array3, ArrayViewMut1, Axis, Zip};

/// 一维平方距离变换 (下包络线算法).
///
/// `f[q]` 为位置 `q` 处的初始代价, 无穷大表示此处没有目标.
/// 结果写回 `f`: `f[q] = min_p ((q - p)² + f[p])`.
fn edt_1d(mut f: ArrayViewMut1<f64>, hull: &mut Vec<(usize, f64)>, bounds: &mut Vec<f64>) {
    hull.clear();
    bounds.clear();

    for (q, &fq) in f.iter().enumerate() {
        if fq.is_infinite() {
            continue;
        }
        let qf = q as f64;
        loop {
            let Some(&(p, fp)) = hull.last() else {
                hull.push((q, fq));
                bounds.push(f64::NEG_INFINITY);
                break;
            };
            let pf = p as f64;
            // 抛物线 q 与 p 的交点.
            let s = ((fq + qf * qf) - (fp + pf * pf)) / (2.0 * (qf - pf));
            if bounds.last().is_some_and(|&b| s <= b) {
                hull.pop();
                bounds.pop();
                continue;
            }
            hull.push((q, fq));
            bounds.push(s);
            break;
        }
    }

    if hull.is_empty() {
        return;
    }
    let mut k = 0;
    for (q, v) in f.iter_mut().enumerate() {
        let qf = q as f64;
        while k + 1 < hull.len() && bounds[k + 1] < qf {
            k += 1;
        }
        let (p, fp) = hull[k];
        let d = qf - p as f64;
        *v = d * d + fp;
    }
}

/// 沿 `axis` 对每一条线做一维变换.
fn edt_axis(data: &mut Array3<f64>, axis: usize) {
    let lanes = data.lanes_mut(Axis(axis));
    cfg_if::cfg_if! {
        if #[cfg(feature = "rayon")] {
            Zip::from(lanes).par_for_each(|lane| {
                let (mut hull, mut bounds) = (Vec::new(), Vec::new());
                edt_1d(lane, &mut hull, &mut bounds);
            });
        } else {
            let (mut hull, mut bounds) = (Vec::new(), Vec::new());
            Zip::from(lanes).for_each(|lane| edt_1d(lane, &mut hull, &mut bounds));
        }
    }
}

/// 平方欧氏距离变换: 每个体素到最近的 `mask == target` 体素的平方距离.
///
/// 只考虑体数据内部的目标. 体数据中没有任何目标时, 结果全部为 `f64::INFINITY`.
pub fn squared_edt(mask: &Array3<bool>, target: bool) -> Array3<f64> {
    let mut d = mask.mapv(|p| if p == target { 0.0 } else { f64::INFINITY });
    for axis in [2, 1, 0] {
        edt_axis(&mut d, axis);
    }
    d
}

/// 欧氏距离变换: 每个前景体素到最近背景体素的距离, 背景体素为 0.
///
/// 体数据中没有背景时, 前景的距离被截断为体数据对角线长度.
pub fn distance_transform_edt(mask: &Array3<bool>) -> Array3<f64> {
    let (z, y, x) = mask.dim();
    let cap = ((z * z + y * y + x * x) as f64).sqrt();
    squared_edt(mask, false).mapv(|d| if d.is_finite() { d.sqrt() } else { cap })
}

/// 以半径 `r` 的数字球 `dz² + dy² + dx² <= r²` 为结构元的腐蚀.
///
/// 体数据之外视为前景: 只有体数据内部的背景会侵蚀前景. `r == 0` 时不做任何修改.
pub fn binary_erosion_ball(mask: &Array3<bool>, r: usize) -> Array3<bool> {
    if r == 0 {
        return mask.clone();
    }
    let r2 = (r * r) as f64;
    let d = squared_edt(mask, false);
    Zip::from(mask).and(&d).map_collect(|&p, &d| p && d > r2)
}

/// 以半径 `r` 的数字球为结构元的膨胀. 体数据之外视为背景.
pub fn binary_dilation_ball(mask: &Array3<bool>, r: usize) -> Array3<bool> {
    if r == 0 {
        return mask.clone();
    }
    let r2 = (r * r) as f64;
    squared_edt(mask, true).mapv(|d| d <= r2)
}

/// 开运算: 先腐蚀再膨胀.
pub fn binary_opening_ball(mask: &Array3<bool>, r: usize) -> Array3<bool> {
    binary_dilation_ball(&binary_erosion_ball(mask, r), r)
}

/// 闭运算: 先膨胀再腐蚀.
pub fn binary_closing_ball(mask: &Array3<bool>, r: usize) -> Array3<bool> {
    binary_erosion_ball(&binary_dilation_ball(mask, r), r)
}

//! 形态学统计报告.

use std::fmt::{self, Display, Formatter};

use crate::consts::defaults;

/// 工作分辨率下单个体素的边长 (微米).
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VoxelSize {
    /// z 方向.
    pub z: f64,
    /// y 方向.
    pub y: f64,
    /// x 方向.
    pub x: f64,
}

impl Default for VoxelSize {
    fn default() -> Self {
        Self::isotropic(defaults::VOXEL_UM)
    }
}

impl VoxelSize {
    /// 各向同性体素.
    #[inline]
    pub const fn isotropic(um: f64) -> Self {
        Self {
            z: um,
            y: um,
            x: um,
        }
    }

    /// 单个体素的体积 (立方微米).
    #[inline]
    pub fn volume(&self) -> f64 {
        self.z * self.y * self.x
    }

    /// 单位表面积估计对应的面积 (平方微米).
    ///
    /// 各向异性时取体素体积的 2/3 次方.
    #[inline]
    pub fn area(&self) -> f64 {
        self.volume().powf(2.0 / 3.0)
    }
}

/// 均值与 (总体) 标准差.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MeanStd {
    /// 均值.
    pub mean: f64,
    /// 标准差.
    pub std: f64,
}

impl MeanStd {
    /// 空序列的均值与标准差都记为 NaN.
    pub fn of(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self {
                mean: f64::NAN,
                std: f64::NAN,
            };
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
        Self {
            mean,
            std: var.sqrt(),
        }
    }
}

impl Display for MeanStd {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}+/-{}", self.mean, self.std)
    }
}

/// 换算为物理单位的逐肺泡记录与汇总统计.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Report {
    /// 各肺泡体积 (立方微米).
    pub volumes: Vec<f64>,

    /// 各肺泡表面积 (平方微米).
    pub surfaces: Vec<f64>,

    /// 各肺泡面体比 (每毫米).
    pub surface_to_volume: Vec<f64>,

    /// 组织体积 (立方毫米). 没有粗粒度掩膜时未知.
    pub tissue_mm3: Option<f64>,
}

impl Report {
    /// 由以体素为单位的记录构建.
    ///
    /// `tissue_voxels` 为工作分辨率下的组织体素数.
    pub fn from_records(
        volumes: &[u64],
        surfaces: &[f64],
        voxel: VoxelSize,
        tissue_voxels: Option<f64>,
    ) -> Self {
        let volumes: Vec<f64> = volumes.iter().map(|&v| v as f64 * voxel.volume()).collect();
        let surfaces: Vec<f64> = surfaces.iter().map(|&s| s * voxel.area()).collect();
        let surface_to_volume = volumes
            .iter()
            .zip(surfaces.iter())
            .map(|(v, s)| s / v * 1000.0)
            .collect();
        Self {
            volumes,
            surfaces,
            surface_to_volume,
            tissue_mm3: tissue_voxels.map(|n| n * voxel.volume() / 1e9),
        }
    }

    /// 肺泡个数.
    #[inline]
    pub fn count(&self) -> usize {
        self.volumes.len()
    }

    /// 肺泡总体积 (立方微米).
    pub fn total_volume(&self) -> f64 {
        self.volumes.iter().sum()
    }

    /// 肺泡体积占组织体积的比例.
    pub fn volume_ratio(&self) -> Option<f64> {
        self.tissue_mm3.map(|t| self.total_volume() / (1e9 * t))
    }

    /// 肺泡表面密度 (每毫米).
    pub fn surface_density(&self) -> Option<f64> {
        self.tissue_mm3
            .map(|t| self.surfaces.iter().sum::<f64>() / (1e6 * t))
    }

    /// 肺泡数密度 (每立方毫米).
    pub fn alveolar_density(&self) -> Option<f64> {
        self.tissue_mm3.map(|t| self.count() as f64 / t)
    }
}

impl Display for Report {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Alveolar volume is {} um^3 (mean +/- std)",
            MeanStd::of(&self.volumes)
        )?;
        writeln!(
            f,
            "Alveolar surface is {} um^2 (mean +/- std)",
            MeanStd::of(&self.surfaces)
        )?;
        writeln!(
            f,
            "Alveolar surface/volume ratio is {} mm^-1 (mean +/- std)",
            MeanStd::of(&self.surface_to_volume)
        )?;
        if let (Some(ratio), Some(surface), Some(density)) = (
            self.volume_ratio(),
            self.surface_density(),
            self.alveolar_density(),
        ) {
            writeln!(f, "Alveolar volume ratio is {ratio}")?;
            writeln!(f, "Alveolar surface density is {surface} mm^-1")?;
            writeln!(f, "Alveolar density is {density} mm^-3")?;
        }
        writeln!(f, "{} alveoli detected in the volume", self.count())
    }
}

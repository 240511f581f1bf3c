//! 从环境变量读取路径与参数.
//!
//! 所有变量都以 `ALVEOLI_` 开头. 亮度阈值与肺泡体积上下限没有默认值,
//! 必须给出; 其余变量缺省时使用 `lung_berry::consts::defaults` 中的值.

use std::env;
use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;
use std::str::FromStr;

use lung_berry::pipeline::{OutputFormat, PipelineConfig, SurfaceEstimator, VoxelSize};
use lung_berry::MaskParams;

/// 环境变量错误.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvError {
    /// 必需的变量不存在.
    Missing(&'static str),

    /// 变量无法解析.
    Invalid {
        /// 变量名.
        name: &'static str,
        /// 原始值.
        value: String,
    },
}

impl Display for EnvError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing(name) => write!(f, "environment variable `{name}` is required"),
            Self::Invalid { name, value } => {
                write!(f, "environment variable `{name}` has invalid value `{value}`")
            }
        }
    }
}

impl std::error::Error for EnvError {}

/// 获取 `{用户主目录}/dataset` 目录下给定继续项组成的全路径.
pub fn home_dataset_dir_with<I: IntoIterator<Item = &'static str>>(it: I) -> Option<PathBuf> {
    let mut ans = dirs::home_dir()?;
    ans.push("dataset");
    ans.extend(it);
    Some(ans)
}

/// 带可替换变量来源的读取器, 便于测试.
pub struct Vars<F: Fn(&str) -> Option<String>> {
    get: F,
}

/// 读取真实进程环境的读取器.
pub fn process_env() -> Vars<impl Fn(&str) -> Option<String>> {
    Vars::new(|k: &str| env::var(k).ok())
}

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    /// 以 `get` 为变量来源.
    pub fn new(get: F) -> Self {
        Self { get }
    }

    /// 路径变量, 空字符串视为不存在.
    pub fn path(&self, name: &str) -> Option<PathBuf> {
        (self.get)(name)
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
    }

    /// 可选的数值变量.
    pub fn parse<T: FromStr>(&self, name: &'static str) -> Result<Option<T>, EnvError> {
        match (self.get)(name) {
            None => Ok(None),
            Some(v) => v
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| EnvError::Invalid { name, value: v }),
        }
    }

    /// 必需的数值变量.
    pub fn require<T: FromStr>(&self, name: &'static str) -> Result<T, EnvError> {
        self.parse(name)?.ok_or(EnvError::Missing(name))
    }

    /// 输入体数据路径, 来自 `$ALVEOLI_INPUT`.
    pub fn input(&self) -> Result<PathBuf, EnvError> {
        self.path("ALVEOLI_INPUT")
            .ok_or(EnvError::Missing("ALVEOLI_INPUT"))
    }

    /// 预览图路径, 来自 `$ALVEOLI_PREVIEW`. 不存在时不使用粗粒度掩膜.
    pub fn preview(&self) -> Option<PathBuf> {
        self.path("ALVEOLI_PREVIEW")
    }

    /// 输出目录.
    ///
    /// 1. 若环境变量 `$ALVEOLI_OUTPUT` 非空, 则返回其值;
    /// 2. 否则, 返回 `$HOME/dataset/alveoli/out`;
    /// 3. 连主目录都无法确定时, 返回当前目录下的 `alveoli-out`.
    pub fn output_dir(&self) -> PathBuf {
        self.path("ALVEOLI_OUTPUT")
            .or_else(|| home_dataset_dir_with(["alveoli", "out"]))
            .unwrap_or_else(|| PathBuf::from("alveoli-out"))
    }

    /// 输出格式, `npy` (默认) 或 `png`.
    pub fn format(&self) -> Result<OutputFormat, EnvError> {
        match (self.get)("ALVEOLI_FORMAT").as_deref().map(str::trim) {
            None | Some("npy") => Ok(OutputFormat::Npy),
            Some("png") => Ok(OutputFormat::PngStack),
            Some(v) => Err(EnvError::Invalid {
                name: "ALVEOLI_FORMAT",
                value: v.to_owned(),
            }),
        }
    }

    /// 表面积估计方法, `shell` (默认) 或 `mesh` (需要 `mesh` feature).
    fn surface(&self) -> Result<SurfaceEstimator, EnvError> {
        match (self.get)("ALVEOLI_SURFACE").as_deref().map(str::trim) {
            None | Some("shell") => Ok(SurfaceEstimator::DilationShell),
            #[cfg(feature = "mesh")]
            Some("mesh") => Ok(SurfaceEstimator::Mesh),
            Some(v) => Err(EnvError::Invalid {
                name: "ALVEOLI_SURFACE",
                value: v.to_owned(),
            }),
        }
    }

    /// 流水线配置. `default_workers` 在 `$ALVEOLI_WORKERS` 缺省时使用.
    pub fn pipeline_config(&self, default_workers: usize) -> Result<PipelineConfig, EnvError> {
        let mut c = PipelineConfig::new(
            self.require("ALVEOLI_THRESHOLD")?,
            self.require("ALVEOLI_MIN_SIZE")?,
            self.require("ALVEOLI_MAX_SIZE")?,
        )
        .with_workers(default_workers)
        .with_surface(self.surface()?);

        if let Some(v) = self.parse("ALVEOLI_TILE_SIZE")? {
            c.tile_size = v;
        }
        if let Some(v) = self.parse("ALVEOLI_Z_FACTOR")? {
            c.factors[0] = v;
        }
        if let Some(v) = self.parse::<f64>("ALVEOLI_XY_FACTOR")? {
            c.factors[1] = v;
            c.factors[2] = v;
        }
        if let Some(v) = self.parse("ALVEOLI_SLAB_ROWS")? {
            c.slab_rows = v;
        }
        if let Some(v) = self.parse("ALVEOLI_WORKERS")? {
            c.workers = v;
        }
        if let Some(v) = self.parse("ALVEOLI_OPENING_RADIUS")? {
            c.segment.opening_radius = v;
        }
        if let Some(v) = self.parse("ALVEOLI_HOLE_AREA")? {
            c.segment.hole_area = v;
        }
        if let Some(v) = self.parse("ALVEOLI_PRUNE_LENGTH")? {
            c.segment.prune_length = v;
        }
        if let Some(v) = self.parse("ALVEOLI_COMPACTNESS")? {
            c.segment.compactness = v;
        }
        if let Some(v) = self.parse("ALVEOLI_VOXEL_UM")? {
            c.voxel_size = VoxelSize::isotropic(v);
        }
        Ok(c)
    }

    /// 粗粒度掩膜参数. 工作分辨率缩小倍数取自 `config`.
    pub fn mask_params(&self, config: &PipelineConfig) -> Result<MaskParams, EnvError> {
        let mut p = MaskParams {
            working_factors: config.factors,
            ..MaskParams::default()
        };
        if let Some(v) = self.parse("ALVEOLI_MASK_THRESHOLD")? {
            p.threshold = v;
        }
        if let Some(v) = self.parse("ALVEOLI_MASK_SCALE")? {
            p.mask_scale = v;
        }
        if let Some(v) = self.parse("ALVEOLI_PREVIEW_Z_FACTOR")? {
            p.preview_factors[0] = v;
        }
        if let Some(v) = self.parse::<f64>("ALVEOLI_PREVIEW_XY_FACTOR")? {
            p.preview_factors[1] = v;
            p.preview_factors[2] = v;
        }
        Ok(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> Vars<impl Fn(&str) -> Option<String>> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Vars::new(move |k: &str| map.get(k).cloned())
    }

    const REQUIRED: [(&str, &str); 3] = [
        ("ALVEOLI_THRESHOLD", "100"),
        ("ALVEOLI_MIN_SIZE", "50"),
        ("ALVEOLI_MAX_SIZE", "30000"),
    ];

    #[test]
    fn test_config_required() {
        let v = vars(&REQUIRED[..2]);
        assert_eq!(
            v.pipeline_config(4).unwrap_err(),
            EnvError::Missing("ALVEOLI_MAX_SIZE")
        );

        let c = vars(&REQUIRED).pipeline_config(4).unwrap();
        assert_eq!(c.segment.threshold, 100.0);
        assert_eq!(c.segment.min_size, 50);
        assert_eq!(c.segment.max_size, 30000);
        assert_eq!(c.workers, 4);
        assert_eq!(c.tile_size, 320);
    }

    #[test]
    fn test_config_overrides() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("ALVEOLI_TILE_SIZE", "128"),
            ("ALVEOLI_XY_FACTOR", "4"),
            ("ALVEOLI_WORKERS", " 2 "),
            ("ALVEOLI_PRUNE_LENGTH", "10.5"),
            ("ALVEOLI_VOXEL_UM", "2.5"),
            ("ALVEOLI_PREVIEW_XY_FACTOR", "32"),
        ]);
        let v = vars(&pairs);
        let c = v.pipeline_config(8).unwrap();
        assert_eq!(c.tile_size, 128);
        assert_eq!(c.factors, [2.5, 4.0, 4.0]);
        assert_eq!(c.workers, 2);
        assert_eq!(c.segment.prune_length, 10.5);
        assert_eq!(c.voxel_size, VoxelSize::isotropic(2.5));

        let m = v.mask_params(&c).unwrap();
        assert_eq!(m.working_factors, [2.5, 4.0, 4.0]);
        assert_eq!(m.preview_factors, [5.0, 32.0, 32.0]);
    }

    #[test]
    fn test_invalid_values() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("ALVEOLI_TILE_SIZE", "big"));
        assert_eq!(
            vars(&pairs).pipeline_config(1).unwrap_err(),
            EnvError::Invalid {
                name: "ALVEOLI_TILE_SIZE",
                value: "big".into()
            }
        );
        assert!(vars(&[("ALVEOLI_FORMAT", "tiff")]).format().is_err());
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("ALVEOLI_SURFACE", "marching"));
        assert!(matches!(
            vars(&pairs).pipeline_config(1),
            Err(EnvError::Invalid {
                name: "ALVEOLI_SURFACE",
                ..
            })
        ));
    }

    #[test]
    fn test_paths() {
        let v = vars(&[
            ("ALVEOLI_INPUT", "/data/lung"),
            ("ALVEOLI_PREVIEW", "  "),
            ("ALVEOLI_OUTPUT", "/tmp/out"),
            ("ALVEOLI_FORMAT", "png"),
        ]);
        assert_eq!(v.input().unwrap(), PathBuf::from("/data/lung"));
        assert_eq!(v.preview(), None);
        assert_eq!(v.output_dir(), PathBuf::from("/tmp/out"));
        assert_eq!(v.format().unwrap(), OutputFormat::PngStack);
        assert_eq!(vars(&[]).input(), Err(EnvError::Missing("ALVEOLI_INPUT")));
    }
}

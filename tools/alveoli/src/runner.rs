//! 程序运行函数.

use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;
use std::time::Instant;

use lung_berry::pipeline::{Pipeline, PipelineError};
use lung_berry::{open_source, CoarseMask, SourceError};
use utils::loader::{self, EnvError};

use crate::result::AlveoliResult;

/// 使运行中止的错误.
#[derive(Debug)]
pub enum RunError {
    /// 环境变量缺失或非法.
    Env(EnvError),

    /// 无法打开输入或预览图.
    Open(PathBuf, SourceError),

    /// 配置非法或输出写入失败.
    Pipeline(PipelineError),
}

impl Display for RunError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Env(e) => write!(f, "{e}"),
            Self::Open(p, e) => write!(f, "cannot open `{}`: {e}", p.display()),
            Self::Pipeline(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for RunError {}

impl From<EnvError> for RunError {
    fn from(e: EnvError) -> Self {
        Self::Env(e)
    }
}

impl From<PipelineError> for RunError {
    fn from(e: PipelineError) -> Self {
        Self::Pipeline(e)
    }
}

/// 实际运行.
pub fn run() -> Result<AlveoliResult, RunError> {
    let vars = loader::process_env();
    let config = vars.pipeline_config(utils::cpus())?;
    let input = vars.input()?;
    let output = vars.output_dir();
    let format = vars.format()?;

    let source = open_source(&input).map_err(|e| RunError::Open(input.clone(), e))?;
    log::info!("input `{}` of shape {:?}", input.display(), source.shape());

    let coarse = match vars.preview() {
        Some(p) => {
            let params = vars.mask_params(&config)?;
            let preview = open_source(&p)
                .and_then(|s| s.read_all())
                .map_err(|e| RunError::Open(p.clone(), e))?;
            let mask = CoarseMask::from_preview(preview.view(), &params);
            log::info!(
                "coarse mask {:?} from `{}`, {:.2}% foreground",
                mask.shape(),
                p.display(),
                mask.foreground_fraction() * 100.0
            );
            mask
        }
        None => {
            log::info!("no preview given, every tile will be processed");
            CoarseMask::everywhere()
        }
    };

    let pipeline = Pipeline::new(config)?;
    let start = Instant::now();
    let result = pipeline.run(source.as_ref(), &coarse)?;
    let elapsed = start.elapsed();

    result.write(&output, format)?;
    Ok(AlveoliResult::new(result, output, elapsed))
}

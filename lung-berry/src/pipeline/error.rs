//! 运行时错误.

use std::fmt::{self, Display, Formatter};

use crate::data::SourceError;

/// 单个分块的分割失败原因. 这类错误只影响该分块, 不会中止整体流程.
#[derive(Debug)]
pub enum SegmentError {
    /// 分块中存在 NaN 或无穷大. 参数为第一个出问题的局部索引.
    NonFiniteIntensity(crate::Idx3d),

    /// 分块体素数超出了 `u32` 标签空间.
    TileTooLarge(usize),

    /// 读取分块数据失败.
    Read(SourceError),

    /// 算法内部 panic, 参数为 panic 信息.
    Panicked(String),
}

impl Display for SegmentError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonFiniteIntensity(p) => write!(f, "non-finite intensity at {p:?}"),
            Self::TileTooLarge(n) => write!(f, "tile of {n} voxels exceeds the label id space"),
            Self::Read(e) => write!(f, "failed to read tile: {e}"),
            Self::Panicked(msg) => write!(f, "segmentation panicked: {msg}"),
        }
    }
}

impl std::error::Error for SegmentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Read(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SourceError> for SegmentError {
    fn from(e: SourceError) -> Self {
        Self::Read(e)
    }
}

/// 使整个流程无法继续的错误.
#[derive(Debug)]
pub enum PipelineError {
    /// 配置不合法.
    Config(String),

    /// 输出文件写入失败.
    Io(std::io::Error),

    /// 输出 npy 编码失败.
    Npy(ndarray_npy::WriteNpyError),

    /// 输出切片编码失败.
    Image(image::ImageError),

    /// 线程池创建失败.
    #[cfg(feature = "rayon")]
    ThreadPool(rayon::ThreadPoolBuildError),
}

/// 流程运行结果.
pub type PipelineResult<T> = Result<T, PipelineError>;

impl Display for PipelineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "invalid configuration: {msg}"),
            Self::Io(e) => write!(f, "failed to write output: {e}"),
            Self::Npy(e) => write!(f, "failed to write npy output: {e}"),
            Self::Image(e) => write!(f, "failed to write image output: {e}"),
            #[cfg(feature = "rayon")]
            Self::ThreadPool(e) => write!(f, "failed to build thread pool: {e}"),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(_) => None,
            Self::Io(e) => Some(e),
            Self::Npy(e) => Some(e),
            Self::Image(e) => Some(e),
            #[cfg(feature = "rayon")]
            Self::ThreadPool(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<ndarray_npy::WriteNpyError> for PipelineError {
    fn from(e: ndarray_npy::WriteNpyError) -> Self {
        Self::Npy(e)
    }
}

impl From<image::ImageError> for PipelineError {
    fn from(e: image::ImageError) -> Self {
        Self::Image(e)
    }
}

#[cfg(feature = "rayon")]
impl From<rayon::ThreadPoolBuildError> for PipelineError {
    fn from(e: rayon::ThreadPoolBuildError) -> Self {
        Self::ThreadPool(e)
    }
}

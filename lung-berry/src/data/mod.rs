use std::fmt::{self, Display, Formatter};
use std::path::{Path, PathBuf};

use ndarray::Array3;

use crate::{Box3d, Idx3d};

mod coarse;
mod file;
pub(crate) mod scale;
mod stack;

pub use coarse::{CoarseMask, MaskParams};
pub use file::{NiftiSource, NpySource};
pub use scale::downscale_mean;
pub use stack::SliceStackSource;

/// 读取体数据时可能发生的错误.
#[derive(Debug)]
pub enum SourceError {
    /// 请求的区间与数据完全不相交.
    OutOfRange {
        /// 请求的区间.
        region: Box3d,
        /// 数据形状.
        shape: Idx3d,
    },

    /// 文件读写错误.
    Io(std::io::Error),

    /// 二维切片解码错误.
    Image(image::ImageError),

    /// nifti 解码错误.
    Nifti(nifti::NiftiError),

    /// npy 解码错误.
    Npy(ndarray_npy::ReadNpyError),

    /// 数组形状不是三维, 或与声明的形状不符.
    Shape(ndarray::ShapeError),

    /// 切片序列中某张切片的尺寸与第一张不一致.
    ///
    /// 第一个参数是出问题的文件, 后两个参数分别是期望与实际的 `(height, width)`.
    ShapeMismatch(PathBuf, (usize, usize), (usize, usize)),

    /// 目录中没有任何可用切片.
    EmptyStack(PathBuf),

    /// 无法根据路径判断数据格式.
    UnsupportedFormat(PathBuf),
}

/// 体数据读取结果.
pub type SourceResult<T> = Result<T, SourceError>;

impl Display for SourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfRange { region, shape } => write!(
                f,
                "region {:?}..{:?} lies outside volume of shape {:?}",
                region.start, region.end, shape
            ),
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Image(e) => write!(f, "image decode error: {e}"),
            Self::Nifti(e) => write!(f, "nifti decode error: {e}"),
            Self::Npy(e) => write!(f, "npy decode error: {e}"),
            Self::Shape(e) => write!(f, "bad array shape: {e}"),
            Self::ShapeMismatch(p, expected, found) => write!(
                f,
                "slice {} has shape {:?}, expected {:?}",
                p.display(),
                found,
                expected
            ),
            Self::EmptyStack(p) => write!(f, "no image slices found in {}", p.display()),
            Self::UnsupportedFormat(p) => write!(f, "unsupported volume format: {}", p.display()),
        }
    }
}

impl std::error::Error for SourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Image(e) => Some(e),
            Self::Nifti(e) => Some(e),
            Self::Npy(e) => Some(e),
            Self::Shape(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SourceError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<image::ImageError> for SourceError {
    fn from(e: image::ImageError) -> Self {
        Self::Image(e)
    }
}

impl From<nifti::NiftiError> for SourceError {
    fn from(e: nifti::NiftiError) -> Self {
        Self::Nifti(e)
    }
}

impl From<ndarray_npy::ReadNpyError> for SourceError {
    fn from(e: ndarray_npy::ReadNpyError) -> Self {
        Self::Npy(e)
    }
}

impl From<ndarray::ShapeError> for SourceError {
    fn from(e: ndarray::ShapeError) -> Self {
        Self::Shape(e)
    }
}

/// 只读的三维强度体数据, 按区间读取.
///
/// 实现者可以把数据放在内存, 也可以按需从磁盘解码.
/// 需要满足 `Send + Sync`, 以便多个分块并发读取.
pub trait VolumeSource: Send + Sync {
    /// 数据形状 `(z, y, x)`.
    fn shape(&self) -> Idx3d;

    /// 读取 `region` 内的体素.
    ///
    /// `region` 会先被裁剪到数据范围之内, 返回数组的形状即裁剪后区间的形状.
    /// 仅当裁剪后为空 (请求完全越界) 时返回 [`SourceError::OutOfRange`].
    fn read(&self, region: &Box3d) -> SourceResult<Array3<f32>>;

    /// 读取全部数据. 只应当用在小体积 (例如预览图) 上.
    #[inline]
    fn read_all(&self) -> SourceResult<Array3<f32>> {
        self.read(&Box3d::full(self.shape()))
    }
}

/// 裁剪 `region`, 完全越界时返回错误.
pub(crate) fn clip_region(region: &Box3d, shape: Idx3d) -> SourceResult<Box3d> {
    let clipped = region.clip(shape);
    if clipped.is_empty() {
        return Err(SourceError::OutOfRange {
            region: *region,
            shape,
        });
    }
    Ok(clipped)
}

/// 完全驻留在内存中的体数据.
#[derive(Debug, Clone)]
pub struct ArraySource {
    data: Array3<f32>,
}

impl ArraySource {
    /// 包装一个已有数组.
    #[inline]
    pub fn new(data: Array3<f32>) -> Self {
        Self { data }
    }

    /// 获取内部数组.
    #[inline]
    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    /// 取出内部数组.
    #[inline]
    pub fn into_inner(self) -> Array3<f32> {
        self.data
    }
}

impl From<Array3<f32>> for ArraySource {
    fn from(data: Array3<f32>) -> Self {
        Self::new(data)
    }
}

impl VolumeSource for ArraySource {
    #[inline]
    fn shape(&self) -> Idx3d {
        self.data.dim()
    }

    fn read(&self, region: &Box3d) -> SourceResult<Array3<f32>> {
        let [z, y, x] = clip_region(region, self.shape())?.ranges();
        Ok(self.data.slice(ndarray::s![z, y, x]).to_owned())
    }
}

/// 根据路径打开体数据.
///
/// 1. 目录: 二维切片序列, 见 [`SliceStackSource`].
/// 2. `.nii`, `.nii.gz`: 见 [`NiftiSource`].
/// 3. `.npy`: 见 [`NpySource`].
pub fn open_source<P: AsRef<Path>>(path: P) -> SourceResult<Box<dyn VolumeSource>> {
    let path = path.as_ref();
    if path.is_dir() {
        return Ok(Box::new(SliceStackSource::open(path)?));
    }
    let name = path
        .file_name()
        .map(|s| s.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    if name.ends_with(".nii") || name.ends_with(".nii.gz") {
        Ok(Box::new(NiftiSource::open(path)?))
    } else if name.ends_with(".npy") {
        Ok(Box::new(NpySource::open(path)?))
    } else {
        Err(SourceError::UnsupportedFormat(path.to_path_buf()))
    }
}

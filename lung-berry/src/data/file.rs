//! 单文件体数据格式.

use std::path::Path;

use ndarray::{Array3, Ix3};
use ndarray_npy::{read_npy, ReadNpyError};
use nifti::{IntoNdArray, NiftiObject, ReaderOptions};

use super::{ArraySource, SourceResult, VolumeSource};
use crate::{Box3d, Idx3d};

/// nii 格式体数据. 打开时整体解码到内存, 并由 `[x, y, z]` 转为 `(z, y, x)`.
#[derive(Debug, Clone)]
pub struct NiftiSource {
    inner: ArraySource,
    /// 体素分辨率 `[z, y, x]`, 单位由文件决定.
    pix_dim: [f64; 3],
}

impl NiftiSource {
    /// 打开 `.nii` 或 `.nii.gz` 文件.
    pub fn open<P: AsRef<Path>>(path: P) -> SourceResult<Self> {
        let obj = ReaderOptions::new().read_file(path.as_ref())?;
        let [_, w, h, z, ..] = obj.header().pixdim;
        let pix_dim = [z as f64, h as f64, w as f64];

        // [x, y, z] -> [z, y, x].
        let data = obj
            .into_volume()
            .into_ndarray::<f32>()?
            .permuted_axes([2, 1, 0].as_slice())
            .into_dimensionality::<Ix3>()?;
        let data = data.as_standard_layout().into_owned();

        Ok(Self {
            inner: ArraySource::new(data),
            pix_dim,
        })
    }

    /// 体素分辨率 `[z, y, x]`.
    #[inline]
    pub fn pix_dim(&self) -> [f64; 3] {
        self.pix_dim
    }
}

impl VolumeSource for NiftiSource {
    #[inline]
    fn shape(&self) -> Idx3d {
        self.inner.shape()
    }

    #[inline]
    fn read(&self, region: &Box3d) -> SourceResult<Array3<f32>> {
        self.inner.read(region)
    }
}

/// npy 格式三维数组. 元素类型可以是 `f32`, `u16` 或 `u8`.
#[derive(Debug, Clone)]
pub struct NpySource {
    inner: ArraySource,
}

/// 依次尝试 `f32`, `u16`, `u8`.
fn read_npy_any(path: &Path) -> Result<Array3<f32>, ReadNpyError> {
    match read_npy::<_, Array3<f32>>(path) {
        Err(ReadNpyError::WrongDescriptor(_)) => {}
        other => return other,
    }
    match read_npy::<_, Array3<u16>>(path) {
        Err(ReadNpyError::WrongDescriptor(_)) => {}
        other => return other.map(|a| a.mapv(f32::from)),
    }
    read_npy::<_, Array3<u8>>(path).map(|a| a.mapv(f32::from))
}

impl NpySource {
    /// 打开 `.npy` 文件.
    pub fn open<P: AsRef<Path>>(path: P) -> SourceResult<Self> {
        let data = read_npy_any(path.as_ref())?;
        Ok(Self {
            inner: ArraySource::new(data),
        })
    }
}

impl VolumeSource for NpySource {
    #[inline]
    fn shape(&self) -> Idx3d {
        self.inner.shape()
    }

    #[inline]
    fn read(&self, region: &Box3d) -> SourceResult<Array3<f32>> {
        self.inner.read(region)
    }
}

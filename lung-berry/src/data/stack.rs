//! 二维切片序列目录.

use std::path::{Path, PathBuf};

use image::{ColorType, DynamicImage};
use ndarray::{s, Array2, Array3};

use super::{clip_region, SourceError, SourceResult, VolumeSource};
use crate::{Box3d, Idx3d};

/// 可以被识别为切片的文件扩展名.
const SLICE_EXTENSIONS: [&str; 5] = ["png", "tif", "tiff", "bmp", "jpg"];

/// 一个目录中按文件名字典序排列的二维灰度切片, 每个文件对应一个 z.
///
/// 打开时只读取第一张切片的尺寸, 读取区间时才解码对应的 z 切片.
/// 支持 8 位与 16 位灰度, 彩色图像会先转换成灰度.
#[derive(Debug, Clone)]
pub struct SliceStackSource {
    files: Vec<PathBuf>,
    /// `(height, width)`.
    plane: (usize, usize),
}

/// 判断路径是否是可识别的切片文件.
fn is_slice_file(p: &Path) -> bool {
    p.is_file()
        && p.extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .is_some_and(|e| SLICE_EXTENSIONS.contains(&e.as_str()))
}

/// 解码一张切片为 `f32` 灰度.
fn decode_plane(path: &Path) -> SourceResult<Array2<f32>> {
    let img = image::open(path)?;
    let (w, h) = (img.width() as usize, img.height() as usize);
    let raw: Vec<f32> = match img.color() {
        ColorType::L16 | ColorType::La16 | ColorType::Rgb16 | ColorType::Rgba16 => img
            .to_luma16()
            .into_raw()
            .into_iter()
            .map(f32::from)
            .collect(),
        ColorType::L8 => match img {
            DynamicImage::ImageLuma8(b) => b.into_raw().into_iter().map(f32::from).collect(),
            other => other.to_luma8().into_raw().into_iter().map(f32::from).collect(),
        },
        _ => img
            .to_luma8()
            .into_raw()
            .into_iter()
            .map(f32::from)
            .collect(),
    };
    Ok(Array2::from_shape_vec((h, w), raw)?)
}

impl SliceStackSource {
    /// 打开目录 `dir`. 目录中没有可识别切片时返回 [`SourceError::EmptyStack`].
    pub fn open<P: AsRef<Path>>(dir: P) -> SourceResult<Self> {
        let dir = dir.as_ref();
        let mut files = std::fs::read_dir(dir)?
            .map(|e| e.map(|e| e.path()))
            .collect::<Result<Vec<_>, _>>()?;
        files.retain(|p| is_slice_file(p));
        files.sort();

        let Some(first) = files.first() else {
            return Err(SourceError::EmptyStack(dir.to_path_buf()));
        };
        let (w, h) = image::image_dimensions(first)?;
        log::debug!(
            "slice stack {}: {} slices of {}x{}",
            dir.display(),
            files.len(),
            h,
            w
        );
        Ok(Self {
            files,
            plane: (h as usize, w as usize),
        })
    }

    /// 所有切片文件, 已排序.
    #[inline]
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }
}

impl VolumeSource for SliceStackSource {
    #[inline]
    fn shape(&self) -> Idx3d {
        (self.files.len(), self.plane.0, self.plane.1)
    }

    fn read(&self, region: &Box3d) -> SourceResult<Array3<f32>> {
        let region = clip_region(region, self.shape())?;
        let [zr, yr, xr] = region.ranges();
        let mut out = Array3::<f32>::zeros(region.shape());

        for (k, z) in zr.enumerate() {
            let path = &self.files[z];
            let plane = decode_plane(path)?;
            if plane.dim() != self.plane {
                return Err(SourceError::ShapeMismatch(
                    path.clone(),
                    self.plane,
                    plane.dim(),
                ));
            }
            out.slice_mut(s![k, .., ..])
                .assign(&plane.slice(s![yr.clone(), xr.clone()]));
        }
        Ok(out)
    }
}

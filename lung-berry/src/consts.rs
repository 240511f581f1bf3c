//! 通用常量.

/// 单通道输出颜色.
pub mod gray {
    /// 输出体数据中, 背景 (组织, 支气管/血管树) 的像素值.
    pub const BACKGROUND: u8 = 0;

    /// 输出体数据中, 肺泡的像素值.
    pub const ALVEOLUS: u8 = 255;

    /// 像素是否是背景?
    #[inline]
    pub const fn is_background(p: u8) -> bool {
        matches!(p, BACKGROUND)
    }

    /// 像素是否是肺泡?
    #[inline]
    pub const fn is_alveolus(p: u8) -> bool {
        !is_background(p)
    }
}

/// 默认参数.
///
/// 这些数值均是在某一特定采集条件下经验调出的, 与分辨率强相关,
/// 不应被当作普适常量. 肺泡体积上下限没有默认值, 必须由使用者给出.
pub mod defaults {
    /// 工作分辨率下的分块边长 (体素).
    pub const TILE_SIZE: usize = 320;

    /// 全分辨率到工作分辨率的 xy 方向缩小倍数.
    pub const XY_FACTOR: f64 = 8.0;

    /// 全分辨率到工作分辨率的 z 方向缩小倍数.
    pub const Z_FACTOR: f64 = 2.5;

    /// 重采样时每次读取的工作分辨率 z 行数.
    pub const SLAB_ROWS: usize = 10;

    /// 开运算所用球形结构元半径.
    pub const OPENING_RADIUS: usize = 3;

    /// 被填充的背景空洞的体积上限 (不含).
    pub const HOLE_AREA: usize = 100_000;

    /// junction-to-endpoint 分支的剪枝长度阈值 (工作分辨率体素).
    pub const PRUNE_LENGTH: f64 = 15.0;

    /// 分水岭紧致项系数.
    pub const COMPACTNESS: f64 = 10.0;

    /// 粗粒度掩膜的亮度阈值 (严格大于).
    pub const MASK_THRESHOLD: f32 = 150.0;

    /// 预览图到粗粒度掩膜的缩小倍数.
    pub const MASK_SCALE: usize = 2;

    /// 全分辨率到预览图的 xy 方向缩小倍数.
    pub const PREVIEW_XY_FACTOR: f64 = 16.0;

    /// 全分辨率到预览图的 z 方向缩小倍数.
    pub const PREVIEW_Z_FACTOR: f64 = 5.0;

    /// 粗粒度掩膜闭运算半径.
    pub const MASK_CLOSING_RADIUS: usize = 5;

    /// 粗粒度掩膜开运算半径.
    pub const MASK_OPENING_RADIUS: usize = 3;

    /// 工作分辨率下单个体素的边长 (微米).
    pub const VOXEL_UM: f64 = 5.0;
}

/// 视频输入系统 (Video Input System)
///
/// - `Frame`:       采集到的原始帧 (RGBA / RGB / YUV420P)
/// - `FrameSource`: 帧来源接口, 采集循环只依赖这个 trait
/// - `CameraSource`: 本地摄像头 (DirectShow/AVFoundation/V4L2, 需要 `camera` 特性)
#[cfg(feature = "camera")]
pub mod camera;
#[cfg(feature = "camera")]
pub mod decode_filter;

#[cfg(feature = "camera")]
pub use camera::{list_video_devices, CameraSource, VideoDevice};

use anyhow::{anyhow, bail, Result};
use image::{DynamicImage, RgbImage, RgbaImage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgba8,
    Rgb8,
    /// Planar Y, U, V with 2x2 chroma subsampling, tightly packed.
    Yuv420p,
}

/// 原始帧
///
/// Owned by the loop iteration that captured it and dropped once that
/// iteration has handed its image to the presenter.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

impl Frame {
    pub fn new(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            format,
            data,
        }
    }

    pub fn from_rgba(image: RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self::new(width, height, PixelFormat::Rgba8, image.into_raw())
    }

    /// Expected byte length of `data` for this geometry and format.
    pub fn expected_len(&self) -> usize {
        let (w, h) = (self.width as usize, self.height as usize);
        match self.format {
            PixelFormat::Rgba8 => w * h * 4,
            PixelFormat::Rgb8 => w * h * 3,
            PixelFormat::Yuv420p => {
                let (cw, ch) = ((w + 1) / 2, (h + 1) / 2);
                w * h + 2 * cw * ch
            }
        }
    }

    /// 解码为工作用的 RGBA 图片
    pub fn into_rgba(self) -> Result<RgbaImage> {
        if self.width == 0 || self.height == 0 {
            bail!("empty {}x{} frame", self.width, self.height);
        }
        if self.data.len() != self.expected_len() {
            bail!(
                "{:?} frame {}x{} has {} bytes, expected {}",
                self.format,
                self.width,
                self.height,
                self.data.len(),
                self.expected_len()
            );
        }

        match self.format {
            PixelFormat::Rgba8 => RgbaImage::from_raw(self.width, self.height, self.data)
                .ok_or_else(|| anyhow!("RGBA图像转换失败")),
            PixelFormat::Rgb8 => RgbImage::from_raw(self.width, self.height, self.data)
                .map(|rgb| DynamicImage::ImageRgb8(rgb).to_rgba8())
                .ok_or_else(|| anyhow!("RGB图像转换失败")),
            PixelFormat::Yuv420p => {
                let mut buffer = vec![255u8; (self.width * self.height * 4) as usize];
                yuv420p_to_rgba(&self.data, self.width as usize, self.height as usize, &mut buffer);
                RgbaImage::from_raw(self.width, self.height, buffer)
                    .ok_or_else(|| anyhow!("YUV图像转换失败"))
            }
        }
    }
}

/// YUV420P → RGBA (BT.601, 定点运算)
///
/// `yuv` must hold tightly packed planes; alpha bytes in `buffer` are left
/// untouched.
pub fn yuv420p_to_rgba(yuv: &[u8], width: usize, height: usize, buffer: &mut [u8]) {
    let (cw, ch) = ((width + 1) / 2, (height + 1) / 2);
    let (y_plane, rest) = yuv.split_at(width * height);
    let (u_plane, v_plane) = rest.split_at(cw * ch);

    let mut out_idx = 0;
    for y in 0..height {
        let y_row = y * width;
        let uv_row = (y >> 1) * cw;

        for x in 0..width {
            let y_val = y_plane[y_row + x] as i32;
            let u_val = u_plane[uv_row + (x >> 1)] as i32 - 128;
            let v_val = v_plane[uv_row + (x >> 1)] as i32 - 128;

            buffer[out_idx] = (y_val + ((v_val * 179) >> 7)).clamp(0, 255) as u8;
            buffer[out_idx + 1] =
                (y_val - ((u_val * 44) >> 7) - ((v_val * 91) >> 7)).clamp(0, 255) as u8;
            buffer[out_idx + 2] = (y_val + ((u_val * 227) >> 7)).clamp(0, 255) as u8;
            out_idx += 4;
        }
    }
}

/// 帧来源
///
/// `None` means "no frame this time" (device busy, disconnected, empty
/// frame). Callers keep polling; it is never an error.
pub trait FrameSource {
    fn next_frame(&mut self) -> Option<Frame>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Option<Frame> {
        (**self).next_frame()
    }
}

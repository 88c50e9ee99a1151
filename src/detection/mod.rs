/// 检测系统 (Detection System)
///
/// - `Detector`: 推理能力接口, 循环只依赖这个 trait
/// - `YoloDetector`: 基于 ONNX Runtime 的 YOLOv8 实现
pub mod detector;
pub mod types;

use anyhow::Result;
use image::RgbaImage;

pub use detector::YoloDetector;
pub use types::{BoundingBox, Corners, Detection, DetectionSet};

/// Object detection capability.
///
/// Synchronous and possibly slow (hundreds of milliseconds on CPU). An empty
/// set is a normal outcome. Callers do not retry on error.
pub trait Detector {
    fn detect(&mut self, image: &RgbaImage) -> Result<DetectionSet>;
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn detect(&mut self, image: &RgbaImage) -> Result<DetectionSet> {
        (**self).detect(image)
    }
}

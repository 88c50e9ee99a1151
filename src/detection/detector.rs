//! 检测器 (Detector)
//! 职责: RGBA图片 → YOLO检测 → DetectionSet

use std::time::Instant;

use anyhow::Result;
use image::RgbaImage;
use log::{debug, info};

use super::types::DetectionSet;
use super::Detector;
use crate::models::{Model, YOLOv8};
use crate::DetectorConfig;

/// YOLOv8 + ONNX Runtime 检测器
///
/// Built once at startup. Construction failure (bad model path, broken
/// runtime) is a startup fault and never reaches the capture loop.
pub struct YoloDetector {
    model: YOLOv8,

    // 统计
    count: u64,
    last: Instant,
}

impl YoloDetector {
    pub fn new(config: &DetectorConfig) -> Result<Self> {
        info!("🔍 加载检测模型: {}", config.model_path);
        let model = YOLOv8::new(config)?;
        model.summary();
        info!("✅ 检测模型加载成功");

        Ok(Self {
            model,
            count: 0,
            last: Instant::now(),
        })
    }
}

impl Detector for YoloDetector {
    fn detect(&mut self, image: &RgbaImage) -> Result<DetectionSet> {
        let start = Instant::now();
        let detections = self
            .model
            .forward(std::slice::from_ref(image))?
            .into_iter()
            .next()
            .unwrap_or_default();

        self.count += 1;
        let now = Instant::now();
        if now.duration_since(self.last).as_secs() >= 1 {
            let fps = self.count as f64 / now.duration_since(self.last).as_secs_f64();
            self.count = 0;
            self.last = now;
            debug!(
                "🎯 检测: {}个目标 | {:.1}ms/帧 | {:.1}fps",
                detections.len(),
                start.elapsed().as_secs_f64() * 1000.0,
                fps
            );
        }

        Ok(detections)
    }
}

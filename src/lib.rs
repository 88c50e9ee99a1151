// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod annotate; // 检测框绘制
pub mod config; // 命令行与JSON配置
pub mod detection; // 检测器接口与YOLO实现
pub mod input; // 视频输入系统
pub mod models; // 模型接口与具体实现
pub mod ort_backend; // ONNX Runtime 推理后端
pub mod pipeline; // 采集 → 推理 → 绘制 → 显示 循环
pub mod present; // 显示面 (最新帧覆盖)
pub mod renderer; // macroquad 窗口 + egui 控制面板

pub use crate::annotate::{AnnotateStyle, Annotator};
pub use crate::config::{AppConfig, Args, CaptureConfig, DetectorConfig, OverlayConfig};
pub use crate::detection::{BoundingBox, Corners, Detection, DetectionSet, Detector, YoloDetector};
pub use crate::input::{Frame, FrameSource, PixelFormat};
pub use crate::models::{Model, YOLOv8};
pub use crate::ort_backend::{OrtBackend, OrtConfig, OrtEP, YOLOTask};
pub use crate::pipeline::{
    CancellationToken, LiveView, LoopController, LoopStats, LoopStatus, RunState, StatusSnapshot,
};
pub use crate::present::{DisplaySlot, Presenter};

/// Greedy NMS: highest confidence first, drop anything overlapping a kept box
/// by more than `iou_threshold`. Order of the survivors is by confidence.
pub fn non_max_suppression(xs: &mut Vec<Detection>, iou_threshold: f32) {
    xs.sort_by(|b1, b2| b2.confidence.total_cmp(&b1.confidence));

    let mut current_index = 0;
    for index in 0..xs.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            let iou = xs[prev_index].bbox.iou(&xs[index].bbox);
            if iou > iou_threshold {
                drop = true;
                break;
            }
        }
        if !drop {
            xs.swap(current_index, index);
            current_index += 1;
        }
    }
    xs.truncate(current_index);
}

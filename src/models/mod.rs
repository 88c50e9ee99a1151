/// 模型统一接口与实现
///
/// ## Model Trait
/// 统一的模型接口，定义标准流程: preprocess → run → postprocess
///
/// ```text
/// 原始图片 → preprocess → ndarray张量
///          ↓
///     推理引擎 run
///          ↓
///     原始输出 → postprocess → 检测结果
/// ```
///
/// ## 使用示例
/// ```no_run
/// use yolo_webcam::models::{Model, YOLOv8};
/// use yolo_webcam::DetectorConfig;
///
/// # fn main() -> anyhow::Result<()> {
/// let mut model = YOLOv8::new(&DetectorConfig::default())?;
/// let image = image::RgbaImage::new(640, 480);
/// let results = model.forward(std::slice::from_ref(&image))?;
/// # Ok(())
/// # }
/// ```
use anyhow::Result;
use image::RgbaImage;
use ndarray::{Array, IxDyn};

use crate::DetectionSet;

pub trait Model {
    /// 预处理: 图片 → NCHW 张量
    fn preprocess(&mut self, images: &[RgbaImage]) -> Result<Array<f32, IxDyn>>;

    /// 推理: 执行模型前向传播
    fn run(&mut self, xs: Array<f32, IxDyn>, profile: bool) -> Result<Vec<Array<f32, IxDyn>>>;

    /// 后处理: 原始输出 → 检测结果 (坐标还原到原始图片)
    fn postprocess(&self, xs: Vec<Array<f32, IxDyn>>, xs0: &[RgbaImage]) -> Result<Vec<DetectionSet>>;

    /// 完整的推理流程: preprocess → run → postprocess
    fn forward(&mut self, images: &[RgbaImage]) -> Result<Vec<DetectionSet>> {
        let xs = self.preprocess(images)?;
        let ys = self.run(xs, false)?;
        self.postprocess(ys, images)
    }

    /// 打印模型信息
    fn summary(&self);
}

pub mod yolov8;

pub use yolov8::YOLOv8;

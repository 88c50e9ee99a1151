//! 配置 - 命令行参数 + JSON文件
//!
//! 优先级: 命令行显式参数 > JSON配置文件 > 默认值

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::info;
use serde::{Deserialize, Serialize};

use crate::YOLOTask;

/// YOLOv8 摄像头实时检测
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about = "YOLOv8 摄像头实时检测", long_about = None)]
pub struct Args {
    /// JSON配置文件
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// ONNX模型路径
    #[arg(short, long)]
    pub model: Option<String>,

    /// 模型任务类型 (只支持 detect)
    #[arg(long, value_enum)]
    pub task: Option<YOLOTask>,

    /// 使用CUDA加速
    #[arg(long)]
    pub cuda: bool,

    /// 使用TensorRT加速 (隐含 --cuda)
    #[arg(long)]
    pub trt: bool,

    /// GPU设备号
    #[arg(long)]
    pub device_id: Option<i32>,

    /// 启动时预热模型
    #[arg(long)]
    pub prime: bool,

    /// 置信度阈值
    #[arg(long)]
    pub conf: Option<f32>,

    /// NMS IOU阈值
    #[arg(long)]
    pub iou: Option<f32>,

    /// 模型输入尺寸
    #[arg(long)]
    pub input_size: Option<u32>,

    /// 摄像头索引
    #[arg(long)]
    pub camera: Option<usize>,

    /// 摄像头设备名 (Windows dshow 需要)
    #[arg(long)]
    pub camera_name: Option<String>,

    /// 采集宽度
    #[arg(long)]
    pub width: Option<u32>,

    /// 采集高度
    #[arg(long)]
    pub height: Option<u32>,

    /// 采集帧率
    #[arg(long)]
    pub fps: Option<u32>,

    /// 标签字体 (TTF/OTF)
    #[arg(long)]
    pub font: Option<String>,

    /// 标签显示置信度
    #[arg(long)]
    pub show_conf: bool,

    /// 列出摄像头设备后退出
    #[arg(long)]
    pub list_devices: bool,
}

/// 检测器配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub model_path: String,
    pub model_kind: YOLOTask,
    pub use_acceleration: bool,
    pub use_tensorrt: bool,
    pub accelerator_id: i32,
    pub pre_warm: bool,
    pub conf_threshold: f32,
    pub iou_threshold: f32,
    pub input_size: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: String::from("models/yolov8s.onnx"),
            model_kind: YOLOTask::Detect,
            use_acceleration: false,
            use_tensorrt: false,
            accelerator_id: 0,
            pre_warm: false,
            conf_threshold: 0.25,
            iou_threshold: 0.45,
            input_size: 640,
        }
    }
}

/// 采集配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub device_index: usize,
    pub device_name: Option<String>,
    pub frame_rate: u32,
    pub width: u32,
    pub height: u32,
    pub poll_timeout_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            device_name: None,
            frame_rate: 30,
            width: 640,
            height: 480,
            poll_timeout_ms: 500,
        }
    }
}

/// 检测框绘制配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    pub font_path: Option<String>,
    pub show_confidence: bool,
    pub stroke_width: u32,
    pub text_scale: f32,
    pub color: [u8; 3],
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            font_path: None,
            show_confidence: false,
            stroke_width: 3,
            text_scale: 20.0,
            color: [255, 0, 0],
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub detector: DetectorConfig,
    pub capture: CaptureConfig,
    pub overlay: OverlayConfig,
}

impl AppConfig {
    /// 从JSON文件加载配置 (缺省字段取默认值)
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .with_context(|| format!("读取配置文件失败: {}", path.display()))?;
        let config = serde_json::from_str(&json)
            .with_context(|| format!("配置文件解析失败: {}", path.display()))?;
        info!("✅ 配置已从 {} 加载", path.display());
        Ok(config)
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self).context("序列化配置失败")?;
        fs::write(path, json).with_context(|| format!("保存配置失败: {}", path.display()))?;
        info!("💾 配置已保存到 {}", path.display());
        Ok(())
    }

    /// 合并配置文件与命令行参数
    pub fn from_args(args: &Args) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_args(args);
        config.validate()?;
        Ok(config)
    }

    /// 只覆盖命令行里显式给出的参数
    pub fn apply_args(&mut self, args: &Args) {
        let detector = &mut self.detector;
        if let Some(model) = &args.model {
            detector.model_path = model.clone();
        }
        if let Some(task) = args.task {
            detector.model_kind = task;
        }
        if args.cuda || args.trt {
            detector.use_acceleration = true;
        }
        if args.trt {
            detector.use_tensorrt = true;
        }
        if let Some(id) = args.device_id {
            detector.accelerator_id = id;
        }
        if args.prime {
            detector.pre_warm = true;
        }
        if let Some(conf) = args.conf {
            detector.conf_threshold = conf;
        }
        if let Some(iou) = args.iou {
            detector.iou_threshold = iou;
        }
        if let Some(size) = args.input_size {
            detector.input_size = size;
        }

        let capture = &mut self.capture;
        if let Some(index) = args.camera {
            capture.device_index = index;
        }
        if let Some(name) = &args.camera_name {
            capture.device_name = Some(name.clone());
        }
        if let Some(width) = args.width {
            capture.width = width;
        }
        if let Some(height) = args.height {
            capture.height = height;
        }
        if let Some(fps) = args.fps {
            capture.frame_rate = fps;
        }

        if let Some(font) = &args.font {
            self.overlay.font_path = Some(font.clone());
        }
        if args.show_conf {
            self.overlay.show_confidence = true;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let d = &self.detector;
        if d.model_path.is_empty() {
            bail!("model_path 不能为空");
        }
        if !(0.0..=1.0).contains(&d.conf_threshold) {
            bail!("conf_threshold 必须在 [0, 1] 之间: {}", d.conf_threshold);
        }
        if !(0.0..=1.0).contains(&d.iou_threshold) {
            bail!("iou_threshold 必须在 [0, 1] 之间: {}", d.iou_threshold);
        }
        if d.input_size == 0 || d.input_size % 32 != 0 {
            bail!("input_size 必须是32的正整数倍: {}", d.input_size);
        }

        let c = &self.capture;
        if c.width == 0 || c.height == 0 || c.frame_rate == 0 {
            bail!(
                "非法采集参数: {}x{} @ {}fps",
                c.width,
                c.height,
                c.frame_rate
            );
        }
        if self.overlay.stroke_width == 0 {
            bail!("stroke_width 不能为0");
        }
        Ok(())
    }

    pub fn print_summary(&self) {
        let d = &self.detector;
        let c = &self.capture;
        info!("🎛️  当前配置:");
        info!("  模型: {} ({:?})", d.model_path, d.model_kind);
        info!(
            "  加速: {} | 设备号: {} | TensorRT: {} | 预热: {}",
            d.use_acceleration, d.accelerator_id, d.use_tensorrt, d.pre_warm
        );
        info!(
            "  阈值: conf={:.2} iou={:.2} | 输入 {}x{}",
            d.conf_threshold, d.iou_threshold, d.input_size, d.input_size
        );
        info!(
            "  摄像头: #{} {} | {}x{} @ {}fps",
            c.device_index,
            c.device_name.as_deref().unwrap_or("-"),
            c.width,
            c.height,
            c.frame_rate
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.detector.model_path, "models/yolov8s.onnx");
        assert_eq!(config.detector.model_kind, YOLOTask::Detect);
        assert!(!config.detector.use_acceleration);
        assert_eq!(config.detector.accelerator_id, 0);
        assert_eq!(config.capture.device_index, 0);
        assert_eq!((config.capture.width, config.capture.height), (640, 480));
        assert_eq!(config.capture.frame_rate, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = AppConfig::default();
        config.detector.use_acceleration = true;
        config.capture.device_name = Some("USB Camera".into());
        config.save(&path).unwrap();

        assert_eq!(AppConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.json");
        fs::write(&path, r#"{"capture": {"width": 1280, "height": 720}}"#).unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.capture.width, 1280);
        assert_eq!(config.capture.frame_rate, 30);
        assert_eq!(config.detector, DetectorConfig::default());
    }

    #[test]
    fn test_args_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut file_config = AppConfig::default();
        file_config.capture.frame_rate = 15;
        file_config.detector.model_path = "file.onnx".into();
        file_config.save(&path).unwrap();

        let args = Args::parse_from([
            "yolo-webcam",
            "--config",
            path.to_str().unwrap(),
            "--model",
            "cli.onnx",
            "--cuda",
            "--device-id",
            "1",
        ]);
        let config = AppConfig::from_args(&args).unwrap();
        assert_eq!(config.detector.model_path, "cli.onnx");
        assert!(config.detector.use_acceleration);
        assert_eq!(config.detector.accelerator_id, 1);
        // 未显式给出的参数保持文件里的值
        assert_eq!(config.capture.frame_rate, 15);
    }

    #[test]
    fn test_trt_implies_acceleration() {
        let args = Args::parse_from(["yolo-webcam", "--trt"]);
        let config = AppConfig::from_args(&args).unwrap();
        assert!(config.detector.use_acceleration);
        assert!(config.detector.use_tensorrt);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.detector.conf_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.capture.width = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.detector.input_size = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(AppConfig::load("/nonexistent/yolo-webcam.json").is_err());
    }
}

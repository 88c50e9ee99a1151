// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// ONNX Runtime 推理后端
// 包含: 会话构建、执行设备选择、预热、模型元数据(类别名)解析

use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use ndarray::{Array, IxDyn};
use ort::execution_providers::{CUDAExecutionProvider, TensorRTExecutionProvider};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// 模型任务类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum YOLOTask {
    Classify,
    Detect,
    Pose,
    Segment,
}

/// 执行设备 (execution provider)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrtEP {
    CPU,
    CUDA(i32),
    Trt(i32),
}

#[derive(Debug, Clone)]
pub struct OrtConfig {
    pub f: String,
    pub ep: OrtEP,
    pub task: YOLOTask,
    /// (height, width) of the model input
    pub image_size: (u32, u32),
    pub pre_warm: bool,
}

pub struct OrtBackend {
    session: Session,
    ep: OrtEP,
    task: YOLOTask,
    height: u32,
    width: u32,
    names: Option<Vec<String>>,
}

impl OrtBackend {
    pub fn build(args: OrtConfig) -> Result<Self> {
        let builder = Session::builder()
            .map_err(|e| anyhow!("failed to create ORT session builder: {e}"))?;

        // CUDA/TensorRT 注册失败时 onnxruntime 会自动回退到 CPU
        let builder = match args.ep {
            OrtEP::CPU => builder,
            OrtEP::CUDA(device_id) => builder
                .with_execution_providers([CUDAExecutionProvider::default()
                    .with_device_id(device_id)
                    .build()])
                .map_err(|e| anyhow!("failed to register CUDA execution provider: {e}"))?,
            OrtEP::Trt(device_id) => builder
                .with_execution_providers([
                    TensorRTExecutionProvider::default()
                        .with_device_id(device_id)
                        .build(),
                    CUDAExecutionProvider::default()
                        .with_device_id(device_id)
                        .build(),
                ])
                .map_err(|e| anyhow!("failed to register TensorRT execution provider: {e}"))?,
        };

        let session = builder
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| anyhow!("failed to set optimization level: {e}"))?
            .commit_from_file(&args.f)
            .map_err(|e| anyhow!("failed to load ONNX model {}: {e}", args.f))?;

        let names = session
            .metadata()
            .ok()
            .and_then(|metadata| metadata.custom("names").ok().flatten())
            .map(|raw| parse_names(&raw))
            .filter(|names| !names.is_empty());

        // 静态输入尺寸以模型为准, 动态输入才用配置值
        let model_hw = session
            .inputs
            .first()
            .and_then(|input| input.input_type.tensor_shape())
            .and_then(|shape| static_input_hw(shape));
        let (height, width) = match model_hw {
            Some(hw) => {
                if hw != args.image_size {
                    warn!(
                        "⚠️ 模型输入为 {}x{}, 忽略配置的 {}x{}",
                        hw.1, hw.0, args.image_size.1, args.image_size.0
                    );
                }
                hw
            }
            None => {
                debug!("模型输入尺寸是动态的, 使用配置值 {:?}", args.image_size);
                args.image_size
            }
        };
        let mut backend = Self {
            session,
            ep: args.ep,
            task: args.task,
            height,
            width,
            names,
        };

        if args.pre_warm {
            let t = Instant::now();
            backend
                .warm_up()
                .context("model pre-warm inference failed")?;
            info!("🔥 模型预热完成: {:?}", t.elapsed());
        }

        Ok(backend)
    }

    /// One throwaway inference so the first real frame does not pay for
    /// device memory allocation and kernel selection.
    pub fn warm_up(&mut self) -> Result<()> {
        let xs = Array::zeros(IxDyn(&[1, 3, self.height as usize, self.width as usize]));
        self.run(xs, false)?;
        Ok(())
    }

    pub fn run(&mut self, xs: Array<f32, IxDyn>, profile: bool) -> Result<Vec<Array<f32, IxDyn>>> {
        let t = Instant::now();
        let tensor =
            Tensor::from_array(xs).map_err(|e| anyhow!("failed to create input tensor: {e}"))?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .map_err(|e| anyhow!("inference failed: {e}"))?;

        let mut ys = Vec::new();
        for (_name, value) in outputs.iter() {
            let (shape, data) = value
                .try_extract_tensor::<f32>()
                .map_err(|e| anyhow!("failed to extract output tensor: {e}"))?;
            let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
            ys.push(Array::from_shape_vec(IxDyn(&dims), data.to_vec())?);
        }

        if profile {
            debug!("[ORT Inference]: {:?}", t.elapsed());
        }
        Ok(ys)
    }

    pub fn ep(&self) -> &OrtEP {
        &self.ep
    }

    pub fn task(&self) -> YOLOTask {
        self.task
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn names(&self) -> Option<Vec<String>> {
        self.names.clone()
    }
}

/// (height, width) of a static NCHW input shape; `None` when H or W is dynamic.
pub fn static_input_hw(shape: &[i64]) -> Option<(u32, u32)> {
    match shape {
        [_, _, h, w] if *h > 0 && *w > 0 => {
            Some((u32::try_from(*h).ok()?, u32::try_from(*w).ok()?))
        }
        _ => None,
    }
}

/// Parse the ultralytics `names` metadata, e.g. `{0: 'person', 1: 'bicycle'}`.
pub fn parse_names(raw: &str) -> Vec<String> {
    let Ok(re) = Regex::new(r#"(\d+)\s*:\s*['"]([^'"]*)['"]"#) else {
        return Vec::new();
    };
    let mut pairs: Vec<(usize, String)> = re
        .captures_iter(raw)
        .filter_map(|caps| {
            let id = caps.get(1)?.as_str().parse::<usize>().ok()?;
            Some((id, caps.get(2)?.as_str().to_string()))
        })
        .collect();
    pairs.sort_by_key(|(id, _)| *id);

    // 类别号不连续时用占位名补齐, 保证 names[id] 对应类别号
    let mut names = Vec::with_capacity(pairs.len());
    for (id, name) in pairs {
        while names.len() < id {
            names.push(format!("class_{}", names.len()));
        }
        if names.len() == id {
            names.push(name);
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_names_ultralytics_format() {
        let names = parse_names("{0: 'person', 1: 'bicycle', 2: 'car'}");
        assert_eq!(names, vec!["person", "bicycle", "car"]);
    }

    #[test]
    fn test_parse_names_fills_gaps_and_sorts() {
        let names = parse_names(r#"{2: "car", 0: "person"}"#);
        assert_eq!(names, vec!["person", "class_1", "car"]);
    }

    #[test]
    fn test_static_input_hw() {
        assert_eq!(static_input_hw(&[1, 3, 640, 640]), Some((640, 640)));
        assert_eq!(static_input_hw(&[1, 3, 384, 640]), Some((384, 640)));
        // 动态 batch 不影响
        assert_eq!(static_input_hw(&[-1, 3, 320, 320]), Some((320, 320)));
    }

    #[test]
    fn test_static_input_hw_dynamic_or_odd_shapes() {
        assert_eq!(static_input_hw(&[1, 3, -1, -1]), None);
        assert_eq!(static_input_hw(&[1, 3, 640, -1]), None);
        assert_eq!(static_input_hw(&[1, 3, 640]), None);
        assert_eq!(static_input_hw(&[]), None);
    }

    #[test]
    fn test_parse_names_garbage() {
        assert!(parse_names("not a dict").is_empty());
    }
}

// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// YOLOv8 检测模型实现
// 包含: 模型加载、预处理、推理、后处理

use anyhow::{anyhow, bail, Result};
use fast_image_resize as fr;
use image::RgbaImage;
use log::info;
use ndarray::{s, Array, ArrayView2, Axis, Ix2, IxDyn};

use crate::{
    non_max_suppression, BoundingBox, Detection, DetectionSet, DetectorConfig, OrtBackend,
    OrtConfig, OrtEP, YOLOTask,
};

const CXYWH_OFFSET: usize = 4;
/// 填充色 (与 ultralytics 训练时一致)
const PAD_VALUE: f32 = 144.0 / 255.0;

pub struct YOLOv8 {
    engine: OrtBackend,
    height: u32,
    width: u32,
    task: YOLOTask,
    conf: f32,
    iou: f32,
    names: Vec<String>,
}

impl YOLOv8 {
    /// 从配置创建 YOLOv8 模型
    pub fn new(config: &DetectorConfig) -> Result<Self> {
        if config.model_kind != YOLOTask::Detect {
            bail!(
                "unsupported model kind {:?}: only object detection models can drive the overlay",
                config.model_kind
            );
        }

        // execution provider
        let ep = if !config.use_acceleration {
            OrtEP::CPU
        } else if config.use_tensorrt {
            OrtEP::Trt(config.accelerator_id)
        } else {
            OrtEP::CUDA(config.accelerator_id)
        };

        let engine = OrtBackend::build(OrtConfig {
            f: config.model_path.clone(),
            ep,
            task: config.model_kind,
            image_size: (config.input_size, config.input_size),
            pre_warm: config.pre_warm,
        })?;

        let names = engine.names().unwrap_or_default();

        Ok(Self {
            height: engine.height(),
            width: engine.width(),
            task: engine.task(),
            engine,
            conf: config.conf_threshold,
            iou: config.iou_threshold,
            names,
        })
    }

    pub fn preprocess(&mut self, xs: &[RgbaImage]) -> Result<Array<f32, IxDyn>> {
        letterbox(xs, self.width, self.height)
    }

    pub fn postprocess(
        &self,
        xs: Vec<Array<f32, IxDyn>>,
        xs0: &[RgbaImage],
    ) -> Result<Vec<DetectionSet>> {
        // YOLOv8 输出: [batch, 4 + nc, anchors]
        let preds = xs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        if preds.ndim() != 3 {
            bail!("unexpected detection output shape {:?}", preds.shape());
        }

        let mut ys = Vec::with_capacity(xs0.len());
        for (idx, anchor) in preds.axis_iter(Axis(0)).enumerate() {
            let Some(x0) = xs0.get(idx) else {
                break;
            };
            let width_original = x0.width() as f32;
            let height_original = x0.height() as f32;
            let (ratio, _, _) = scale_wh(
                width_original,
                height_original,
                self.width as f32,
                self.height as f32,
            );

            let anchor = anchor.into_dimensionality::<Ix2>()?;
            let mut data = decode_predictions(
                anchor,
                ratio,
                (width_original, height_original),
                self.conf,
                &self.names,
            );
            non_max_suppression(&mut data, self.iou);
            ys.push(data);
        }

        Ok(ys)
    }

    pub fn summary(&self) {
        info!(
            "\nSummary:\n\
            > Task: {:?}\n\
            > EP: {:?} {}\n\
            > Height: {}, Width: {}\n\
            > nc: {}, conf: {}, iou: {}",
            self.task,
            self.engine.ep(),
            if let OrtEP::CPU = self.engine.ep() {
                ""
            } else {
                "(May still fall back to CPU)"
            },
            self.height,
            self.width,
            self.names.len(),
            self.conf,
            self.iou,
        );
    }
}

impl super::Model for YOLOv8 {
    fn preprocess(&mut self, images: &[RgbaImage]) -> Result<Array<f32, IxDyn>> {
        YOLOv8::preprocess(self, images)
    }

    fn run(&mut self, xs: Array<f32, IxDyn>, profile: bool) -> Result<Vec<Array<f32, IxDyn>>> {
        self.engine.run(xs, profile)
    }

    fn postprocess(&self, xs: Vec<Array<f32, IxDyn>>, xs0: &[RgbaImage]) -> Result<Vec<DetectionSet>> {
        YOLOv8::postprocess(self, xs, xs0)
    }

    fn summary(&self) {
        YOLOv8::summary(self)
    }
}

/// 等比缩放: 返回 (ratio, 新宽, 新高)
pub fn scale_wh(w0: f32, h0: f32, w1: f32, h1: f32) -> (f32, f32, f32) {
    let r = (w1 / w0).min(h1 / h0);
    (r, (w0 * r).round(), (h0 * r).round())
}

/// Aspect-preserving resize of every image into the top-left corner of a
/// `width` x `height` canvas, padded with [`PAD_VALUE`]. Output is NCHW, `[0,1]`.
pub fn letterbox(xs: &[RgbaImage], width: u32, height: u32) -> Result<Array<f32, IxDyn>> {
    let mut ys = Array::from_elem((xs.len(), 3, height as usize, width as usize), PAD_VALUE)
        .into_dyn();
    let mut resizer = fr::Resizer::new();

    for (idx, x) in xs.iter().enumerate() {
        let (w0, h0) = x.dimensions();
        if w0 == 0 || h0 == 0 {
            bail!("cannot preprocess an empty {}x{} image", w0, h0);
        }
        let (_, w_new, h_new) = scale_wh(w0 as f32, h0 as f32, width as f32, height as f32);
        let w_new = (w_new as u32).clamp(1, width);
        let h_new = (h_new as u32).clamp(1, height);

        let src = fr::images::ImageRef::new(w0, h0, x.as_raw(), fr::PixelType::U8x4)
            .map_err(|e| anyhow!("invalid source image: {e}"))?;
        let mut dst = fr::images::Image::new(w_new, h_new, fr::PixelType::U8x4);
        resizer
            .resize(
                &src,
                &mut dst,
                &fr::ResizeOptions::new()
                    .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear)),
            )
            .map_err(|e| anyhow!("resize failed: {e}"))?;

        let row = w_new as usize;
        for (i, rgba) in dst.buffer().chunks_exact(4).enumerate() {
            let (y, x) = (i / row, i % row);
            ys[[idx, 0, y, x]] = (rgba[0] as f32) / 255.0;
            ys[[idx, 1, y, x]] = (rgba[1] as f32) / 255.0;
            ys[[idx, 2, y, x]] = (rgba[2] as f32) / 255.0;
        }
    }

    Ok(ys)
}

/// Decode one image's raw predictions (`[4 + nc, anchors]`) into detections
/// in source-image pixels. No NMS.
pub fn decode_predictions(
    preds: ArrayView2<f32>,
    ratio: f32,
    (width_original, height_original): (f32, f32),
    conf: f32,
    names: &[String],
) -> DetectionSet {
    let nc = preds.nrows().saturating_sub(CXYWH_OFFSET);
    let mut data = Vec::new();
    if nc == 0 || ratio <= 0.0 {
        return data;
    }

    for pred in preds.axis_iter(Axis(1)) {
        let clss = pred.slice(s![CXYWH_OFFSET..CXYWH_OFFSET + nc]);
        let Some((id, &confidence)) = clss
            .iter()
            .enumerate()
            .reduce(|max, x| if x.1 > max.1 { x } else { max })
        else {
            continue;
        };

        if confidence < conf {
            continue;
        }

        let cx = pred[0] / ratio;
        let cy = pred[1] / ratio;
        let w = pred[2] / ratio;
        let h = pred[3] / ratio;

        let left = (cx - w / 2.).clamp(0.0, width_original);
        let top = (cy - h / 2.).clamp(0.0, height_original);
        let right = (cx + w / 2.).clamp(0.0, width_original);
        let bottom = (cy + h / 2.).clamp(0.0, height_original);
        if right <= left || bottom <= top {
            continue;
        }

        let label = names
            .get(id)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", id));
        data.push(Detection::new(
            BoundingBox::from_corners(left, top, right, bottom),
            id,
            label,
            confidence,
        ));
    }

    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    #[test]
    fn test_scale_wh_keeps_aspect() {
        let (r, w, h) = scale_wh(1280.0, 720.0, 640.0, 640.0);
        assert_relative_eq!(r, 0.5);
        assert_eq!((w, h), (640.0, 360.0));
    }

    #[test]
    fn test_letterbox_pads_bottom() {
        let img = RgbaImage::from_pixel(64, 32, image::Rgba([255, 0, 0, 255]));
        let ys = letterbox(&[img], 32, 32).unwrap();
        assert_eq!(ys.shape(), &[1, 3, 32, 32]);

        // 上半部分是缩放后的图片, 下半部分为填充
        assert_relative_eq!(ys[[0, 0, 4, 4]], 1.0);
        assert_relative_eq!(ys[[0, 1, 4, 4]], 0.0);
        assert_relative_eq!(ys[[0, 0, 28, 4]], PAD_VALUE);
    }

    #[test]
    fn test_letterbox_rejects_empty_image() {
        let img = RgbaImage::new(0, 0);
        assert!(letterbox(&[img], 32, 32).is_err());
    }

    /// 构造 [4 + nc, anchors] 的预测矩阵
    fn preds(anchors: &[([f32; 4], Vec<f32>)]) -> Array2<f32> {
        let nc = anchors[0].1.len();
        let mut a = Array2::zeros((4 + nc, anchors.len()));
        for (j, (bbox, scores)) in anchors.iter().enumerate() {
            for (i, v) in bbox.iter().chain(scores.iter()).enumerate() {
                a[[i, j]] = *v;
            }
        }
        a
    }

    #[test]
    fn test_decode_predictions() {
        let names = vec!["person".to_string(), "dog".to_string()];
        let a = preds(&[
            ([50.0, 25.0, 20.0, 10.0], vec![0.1, 0.8]),
            ([10.0, 10.0, 4.0, 4.0], vec![0.05, 0.1]),
        ]);
        let dets = decode_predictions(a.view(), 0.5, (200.0, 100.0), 0.25, &names);

        assert_eq!(dets.len(), 1);
        let d = &dets[0];
        assert_eq!(d.class_id, 1);
        assert_eq!(d.label, "dog");
        assert_relative_eq!(d.confidence, 0.8);
        assert_eq!(d.bbox, BoundingBox::new(100.0, 50.0, 40.0, 20.0));
    }

    #[test]
    fn test_decode_clamps_to_image_and_labels_unknown_class() {
        let a = preds(&[([2.0, 2.0, 10.0, 10.0], vec![0.0, 0.0, 0.9])]);
        let dets = decode_predictions(a.view(), 1.0, (100.0, 100.0), 0.25, &[]);

        assert_eq!(dets.len(), 1);
        let c = dets[0].bbox.corners();
        assert_eq!((c.left, c.top, c.right, c.bottom), (0.0, 0.0, 7.0, 7.0));
        assert_eq!(dets[0].label, "class_2");
    }
}

//! 检测框绘制 (Annotator)
//! 职责: 原始图片 + DetectionSet → 新的标注图片 (输入不变)

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use ab_glyph::{Font, FontArc, PxScale, ScaleFont};
use anyhow::{anyhow, Context, Result};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use log::{info, warn};

use crate::{Detection, OverlayConfig};

const BUNDLED_FONT: &[u8] = include_bytes!("../assets/font/DejaVuSans.ttf");

#[derive(Debug, Clone, PartialEq)]
pub struct AnnotateStyle {
    /// 线宽, 以框线为中心向内外扩展
    pub stroke_width: u32,
    pub color: Rgba<u8>,
    /// 文字像素高度
    pub text_scale: f32,
    /// 标签基线距框顶的距离
    pub text_offset: f32,
    pub show_confidence: bool,
}

impl Default for AnnotateStyle {
    fn default() -> Self {
        Self {
            stroke_width: 3,
            color: Rgba([255, 0, 0, 255]),
            text_scale: 20.0,
            text_offset: 5.0,
            show_confidence: false,
        }
    }
}

impl From<&OverlayConfig> for AnnotateStyle {
    fn from(config: &OverlayConfig) -> Self {
        let [r, g, b] = config.color;
        Self {
            stroke_width: config.stroke_width.max(1),
            color: Rgba([r, g, b, 255]),
            text_scale: config.text_scale,
            show_confidence: config.show_confidence,
            ..Self::default()
        }
    }
}

pub struct Annotator {
    style: AnnotateStyle,
    font: Option<FontArc>,
    warned_no_font: AtomicBool,
}

impl Annotator {
    /// 不带字体: 只画框, 不画标签 (见 `with_font`)
    pub fn new(style: AnnotateStyle) -> Self {
        Self {
            style,
            font: None,
            warned_no_font: AtomicBool::new(false),
        }
    }

    pub fn with_font(mut self, font: FontArc) -> Self {
        self.font = Some(font);
        self
    }

    /// 从 TTF/OTF 文件加载标签字体
    pub fn load_font(path: impl AsRef<Path>) -> Result<FontArc> {
        let path = path.as_ref();
        let bytes =
            fs::read(path).with_context(|| format!("读取字体失败: {}", path.display()))?;
        let font = FontArc::try_from_vec(bytes)
            .map_err(|e| anyhow!("字体解析失败 {}: {e}", path.display()))?;
        info!("🔤 标签字体: {}", path.display());
        Ok(font)
    }

    /// 随程序打包的 DejaVu Sans
    pub fn bundled_font() -> Result<FontArc> {
        FontArc::try_from_slice(BUNDLED_FONT).map_err(|e| anyhow!("内置字体解析失败: {e}"))
    }

    /// 按配置构建; 配置的字体不可用时回退到内置字体
    pub fn from_config(config: &OverlayConfig) -> Self {
        let annotator = Self::new(AnnotateStyle::from(config));
        let configured = match config.font_path.as_deref().map(Self::load_font) {
            Some(Ok(font)) => Some(font),
            Some(Err(e)) => {
                warn!("⚠️ {e:#}, 使用内置字体");
                None
            }
            None => None,
        };

        match configured.map_or_else(Self::bundled_font, Ok) {
            Ok(font) => annotator.with_font(font),
            Err(e) => {
                warn!("⚠️ {e:#}, 只绘制检测框");
                annotator
            }
        }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// 在图片副本上按顺序绘制检测框和标签, 尺寸不变
    pub fn annotate(&self, image: &RgbaImage, detections: &[Detection]) -> RgbaImage {
        let mut canvas = image.clone();
        if detections.is_empty() {
            return canvas;
        }

        for detection in detections {
            self.draw_box(&mut canvas, detection);
            self.draw_label(&mut canvas, detection);
        }
        canvas
    }

    fn draw_box(&self, canvas: &mut RgbaImage, detection: &Detection) {
        let stroke = self.style.stroke_width.max(1) as i32;

        // 先裁到画布外一圈, 避免极端坐标转 i32 后溢出
        let (cw, ch) = canvas.dimensions();
        let margin = (stroke + 1) as f32;
        let clip_x = |v: f32| v.round().clamp(-margin, cw as f32 + margin) as i32;
        let clip_y = |v: f32| v.round().clamp(-margin, ch as f32 + margin) as i32;

        let c = detection.bbox.corners();
        let left = clip_x(c.left);
        let top = clip_y(c.top);
        // 不足一个像素的框按一个像素画
        let width = (clip_x(c.right) - left).max(0);
        let height = (clip_y(c.bottom) - top).max(0);

        for i in 0..stroke {
            let grow = i - stroke / 2;
            let w = width + 1 + 2 * grow;
            let h = height + 1 + 2 * grow;
            // 框太小时内圈不存在
            if w <= 0 || h <= 0 {
                continue;
            }
            let rect = Rect::at(left - grow, top - grow).of_size(w as u32, h as u32);
            draw_hollow_rect_mut(canvas, rect, self.style.color);
        }
    }

    fn draw_label(&self, canvas: &mut RgbaImage, detection: &Detection) {
        let Some(font) = &self.font else {
            if !self.warned_no_font.swap(true, Ordering::Relaxed) {
                warn!("⚠️ 未加载字体, 跳过标签绘制");
            }
            return;
        };

        let text = self.label_text(detection);
        if text.is_empty() {
            return;
        }

        let scale = PxScale::from(self.style.text_scale);
        let scaled = font.as_scaled(scale);
        let text_width: f32 = text
            .chars()
            .map(|ch| scaled.h_advance(scaled.glyph_id(ch)))
            .sum();

        // (left, top - offset) 是文字基线
        let c = detection.bbox.corners();
        let x = c.left.round();
        let y = (c.top - self.style.text_offset - scaled.ascent()).round();

        // 完全在画布外的标签不画, 部分超出的由 draw_text_mut 裁掉
        let (cw, ch) = canvas.dimensions();
        let visible = x + text_width > 0.0
            && x < cw as f32
            && y + scaled.height() > 0.0
            && y < ch as f32;
        if !visible {
            return;
        }
        draw_text_mut(canvas, self.style.color, x as i32, y as i32, scale, font, &text);
    }

    pub fn label_text(&self, detection: &Detection) -> String {
        if self.style.show_confidence {
            format!("{} {:.2}", detection.label, detection.confidence)
        } else {
            detection.label.clone()
        }
    }
}

impl Default for Annotator {
    fn default() -> Self {
        Self::new(AnnotateStyle::default())
    }
}

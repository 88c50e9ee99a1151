//! 渲染器 (Renderer)
//! macroquad 窗口显示最新帧 + egui 控制面板 (开始 / 停止 / 状态)

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use egui_macroquad::egui;
use log::{error, info, warn};
use macroquad::prelude::*;

use crate::pipeline::LoopStats;
use crate::{Annotator, Detector, DisplaySlot, FrameSource, LiveView};

pub type BoxedDetector = Box<dyn Detector + Send>;
pub type BoxedSource = Box<dyn FrameSource + Send>;

/// 每次点击"开始"时在采集线程上打开一个新的帧来源
pub type SourceFactory = Arc<dyn Fn() -> Result<BoxedSource> + Send + Sync>;

pub struct Renderer {
    view: LiveView<BoxedDetector, DisplaySlot>,
    slot: DisplaySlot,
    open_source: SourceFactory,

    texture: Option<Texture2D>,
    seen: u64,
    show_control_panel: bool,
    last_error: Option<String>,
    last_stats: Option<LoopStats>,

    // 渲染帧率统计
    render_count: u64,
    render_last: Instant,
    render_fps: f64,
}

impl Renderer {
    pub fn new(detector: BoxedDetector, annotator: Annotator, open_source: SourceFactory) -> Self {
        info!("🎨 渲染器启动");
        let slot = DisplaySlot::new();
        Self {
            view: LiveView::new(detector, slot.clone(), annotator),
            slot,
            open_source,
            texture: None,
            seen: 0,
            show_control_panel: true,
            last_error: None,
            last_stats: None,
            render_count: 0,
            render_last: Instant::now(),
            render_fps: 0.0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.view.is_running()
    }

    /// "开始" 按钮
    pub fn start(&mut self) {
        if self.view.is_running() {
            warn!("⚠️ 采集循环已在运行, 忽略");
            return;
        }
        let open = Arc::clone(&self.open_source);
        match self.view.start_with(move || open()) {
            Ok(()) => self.last_error = None,
            Err(e) => {
                error!("❌ 启动失败: {e:#}");
                self.last_error = Some(format!("{e:#}"));
            }
        }
    }

    /// "停止" 按钮
    pub fn stop(&mut self) {
        match self.view.stop() {
            Ok(Some(stats)) => self.last_stats = Some(stats),
            Ok(None) => {}
            Err(e) => {
                error!("❌ {e:#}");
                self.last_error = Some(format!("{e:#}"));
            }
        }
    }

    /// 关闭窗口: 停止循环, 释放摄像头, 清空显示
    pub fn shutdown(&mut self) {
        info!("👋 关闭窗口, 释放资源");
        self.stop();
        self.slot.clear();
        self.texture = None;
    }

    pub fn update(&mut self) {
        if let Some((seq, image)) = self.slot.take_latest(self.seen) {
            self.seen = seq;
            let (w, h) = image.dimensions();

            // 只在分辨率变化时重建纹理，否则更新像素数据
            let needs_rebuild = match &self.texture {
                Some(tex) => tex.width() != w as f32 || tex.height() != h as f32,
                None => true,
            };

            if needs_rebuild {
                let texture = Texture2D::from_rgba8(w as u16, h as u16, image.as_raw());
                texture.set_filter(FilterMode::Linear);
                self.texture = Some(texture);
            } else if let Some(tex) = &self.texture {
                tex.update(&Image {
                    bytes: image.into_raw(),
                    width: w as u16,
                    height: h as u16,
                });
            }
        }

        self.render_count += 1;
        let elapsed = self.render_last.elapsed().as_secs_f64();
        if elapsed >= 1.0 {
            self.render_fps = self.render_count as f64 / elapsed;
            self.render_count = 0;
            self.render_last = Instant::now();
        }
    }

    pub fn draw(&mut self) {
        clear_background(Color::from_rgba(20, 20, 30, 255));

        match &self.texture {
            Some(texture) => {
                let (x, y, w, h) =
                    fit_rect(texture.width(), texture.height(), screen_width(), screen_height());
                draw_texture_ex(
                    texture,
                    x,
                    y,
                    WHITE,
                    DrawTextureParams {
                        dest_size: Some(vec2(w, h)),
                        ..Default::default()
                    },
                );
            }
            None => {
                let text = "Press Start to open the camera";
                let dims = measure_text(text, None, 24, 1.0);
                draw_text(
                    text,
                    (screen_width() - dims.width) / 2.0,
                    screen_height() / 2.0,
                    24.0,
                    GRAY,
                );
            }
        }
    }

    pub fn draw_egui(&mut self) {
        let state = self.view.run_state();
        let status = self.view.status().snapshot();
        let render_fps = self.render_fps;
        let last_error = self.last_error.clone().or_else(|| status.last_error.clone());
        let last_stats = self.last_stats;

        let mut open = self.show_control_panel;
        let mut start_clicked = false;
        let mut stop_clicked = false;

        egui_macroquad::ui(|egui_ctx| {
            egui::Window::new("YOLOv8 Webcam")
                .open(&mut open)
                .resizable(false)
                .default_pos([10.0, 10.0])
                .show(egui_ctx, |ui| {
                    ui.horizontal(|ui| {
                        start_clicked = ui
                            .add_enabled(!state.running, egui::Button::new("▶ Start"))
                            .clicked();
                        stop_clicked = ui
                            .add_enabled(state.running, egui::Button::new("■ Stop"))
                            .clicked();
                    });
                    ui.separator();

                    let label = match (state.running, state.cancellation_requested) {
                        (true, true) => "stopping",
                        (true, false) => "running",
                        (false, _) => "idle",
                    };
                    ui.label(format!("State: {label}"));
                    ui.label(format!("Loop: {:.1} fps", status.fps));
                    ui.label(format!("Inference: {:.1} ms", status.inference_ms));
                    ui.label(format!("Detections: {}", status.detections));
                    ui.label(format!("Render: {:.1} fps", render_fps));

                    if let Some(stats) = last_stats {
                        ui.separator();
                        ui.label(format!(
                            "Last run: {} frames, {} presented, {} detector errors",
                            stats.frames, stats.presented, stats.detector_failures
                        ));
                    }
                    if let Some(err) = &last_error {
                        ui.separator();
                        ui.colored_label(egui::Color32::RED, err);
                    }
                });
        });
        egui_macroquad::draw();

        self.show_control_panel = open;
        if start_clicked {
            self.start();
        }
        if stop_clicked {
            self.stop();
        }
    }

    pub fn handle_input(&mut self) {
        if is_key_pressed(KeyCode::Tab) {
            self.show_control_panel = !self.show_control_panel;
        }
        if is_key_pressed(KeyCode::Space) {
            if self.view.is_running() {
                self.stop();
            } else {
                self.start();
            }
        }
    }
}

/// 保持宽高比把 (src_w, src_h) 放进 (dst_w, dst_h), 居中; 返回 (x, y, w, h)
pub fn fit_rect(src_w: f32, src_h: f32, dst_w: f32, dst_h: f32) -> (f32, f32, f32, f32) {
    if src_w <= 0.0 || src_h <= 0.0 {
        return (0.0, 0.0, 0.0, 0.0);
    }
    let scale = (dst_w / src_w).min(dst_h / src_h);
    let (w, h) = (src_w * scale, src_h * scale);
    ((dst_w - w) / 2.0, (dst_h - h) / 2.0, w, h)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_fit_rect_pillarbox() {
        let (x, y, w, h) = fit_rect(640.0, 480.0, 1280.0, 720.0);
        assert_relative_eq!(w, 960.0);
        assert_relative_eq!(h, 720.0);
        assert_relative_eq!(x, 160.0);
        assert_relative_eq!(y, 0.0);
    }

    #[test]
    fn test_fit_rect_letterbox() {
        let (x, y, w, h) = fit_rect(1920.0, 1080.0, 800.0, 800.0);
        assert_relative_eq!(w, 800.0);
        assert_relative_eq!(h, 450.0);
        assert_relative_eq!(x, 0.0);
        assert_relative_eq!(y, 175.0);
    }

    #[test]
    fn test_fit_rect_empty_source() {
        assert_eq!(fit_rect(0.0, 0.0, 100.0, 100.0), (0.0, 0.0, 0.0, 0.0));
    }
}

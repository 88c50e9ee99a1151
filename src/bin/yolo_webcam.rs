/// YOLOv8 摄像头实时检测
///
/// 主程序入口 - 直接运行: cargo run --bin yolo-webcam --features camera --release
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use log::{info, warn};
use macroquad::prelude::*;
use yolo_webcam::input::{list_video_devices, CameraSource};
use yolo_webcam::renderer::{BoxedSource, Renderer, SourceFactory};
use yolo_webcam::{AppConfig, Args, Annotator, YoloDetector};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    if args.list_devices {
        let devices = list_video_devices()?;
        if devices.is_empty() {
            println!("⚠️ 未找到摄像头设备");
        }
        for device in devices {
            println!("📷 [{}] {}", device.index, device.name);
        }
        return Ok(());
    }

    let config = AppConfig::from_args(&args)?;
    config.print_summary();

    // 模型加载失败直接退出, 不进入主循环
    let detector = YoloDetector::new(&config.detector)?;
    let annotator = Annotator::from_config(&config.overlay);
    if !annotator.has_font() {
        warn!("⚠️ 没有可用字体, 只显示检测框");
    }

    let capture = config.capture.clone();
    let open_source: SourceFactory = Arc::new(move || -> Result<BoxedSource> {
        Ok(Box::new(CameraSource::open(&capture)?))
    });

    let window = macroquad::window::Conf {
        window_title: String::from("YOLOv8 Webcam"),
        window_width: 1280,
        window_height: 720,
        high_dpi: true,
        ..Default::default()
    };

    macroquad::Window::from_config(window, async move {
        let mut renderer = Renderer::new(Box::new(detector), annotator, open_source);
        prevent_quit();

        loop {
            renderer.handle_input();
            renderer.update();
            renderer.draw();
            renderer.draw_egui();

            if is_quit_requested() {
                renderer.shutdown();
                break;
            }
            next_frame().await;
        }
        info!("✅ 程序退出");
    });

    Ok(())
}

//! 摄像头输入模块
//!
//! 处理本地摄像头输入,支持 DirectShow(Windows) / AVFoundation(macOS) / V4L2(Linux)

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use ez_ffmpeg::core::context::null_output::create_null_output;
use ez_ffmpeg::filter::frame_pipeline_builder::FramePipelineBuilder;
use ez_ffmpeg::{AVMediaType, FfmpegContext, Input};
use log::{error, info, warn};

use super::decode_filter::DecodeFilter;
use super::{Frame, FrameSource};
use crate::CaptureConfig;

const OPEN_TIMEOUT: Duration = Duration::from_secs(10);

#[cfg(target_os = "windows")]
const INPUT_FORMAT: &str = "dshow"; // DirectShow
#[cfg(target_os = "macos")]
const INPUT_FORMAT: &str = "avfoundation"; // AVFoundation
#[cfg(target_os = "linux")]
const INPUT_FORMAT: &str = "v4l2"; // Video4Linux2
#[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
const INPUT_FORMAT: &str = "video4linux2";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoDevice {
    pub index: usize,
    pub name: String,
}

/// 获取可用的摄像头设备列表
pub fn list_video_devices() -> Result<Vec<VideoDevice>> {
    let devices = ez_ffmpeg::device::get_input_video_devices()
        .map_err(|e| anyhow!("获取摄像头列表失败: {e}"))?;
    Ok(devices
        .into_iter()
        .enumerate()
        .map(|(index, name)| VideoDevice { index, name })
        .collect())
}

/// 本地摄像头帧来源
///
/// FFmpeg runs on its own thread; the newest decoded frame waits in a
/// single-slot channel. Dropping the source releases the device.
pub struct CameraSource {
    rx: Receiver<Frame>,
    released: Arc<AtomicBool>,
    poll_timeout: Duration,
    handle: Option<JoinHandle<()>>,
    url: String,
}

impl CameraSource {
    /// 打开摄像头, 等到 FFmpeg 调度启动成功才返回
    pub fn open(config: &CaptureConfig) -> Result<Self> {
        let url = camera_url(config)?;
        info!("🎥 打开摄像头: {} ({})", url, INPUT_FORMAT);
        info!(
            "📷 请求参数: {}x{} @ {}fps",
            config.width, config.height, config.frame_rate
        );

        let (tx, rx) = bounded::<Frame>(1);
        let (ready_tx, ready_rx) = bounded::<Result<(), String>>(1);
        let released = Arc::new(AtomicBool::new(false));

        let filter = DecodeFilter::new(tx, rx.clone(), Arc::clone(&released));
        let framerate = config.frame_rate.to_string();
        let video_size = format!("{}x{}", config.width, config.height);
        let input_url = url.clone();

        let handle = thread::Builder::new()
            .name("camera-decode".into())
            .spawn(move || {
                let pipe: FramePipelineBuilder = AVMediaType::AVMEDIA_TYPE_VIDEO.into();
                let pipe = pipe.filter("decode", Box::new(filter));
                let out = create_null_output().add_frame_pipeline(pipe);

                let input = Input::new(input_url)
                    .set_format(INPUT_FORMAT)
                    .set_input_opts(
                        [
                            ("framerate", framerate.as_str()),
                            ("video_size", video_size.as_str()),
                        ]
                        .into(),
                    );

                let ctx = match FfmpegContext::builder()
                    .input(input)
                    .filter_desc("format=yuv420p")
                    .output(out)
                    .build()
                {
                    Ok(ctx) => ctx,
                    Err(e) => {
                        let _ = ready_tx.send(Err(format!("构建失败: {e}")));
                        return;
                    }
                };

                let sch = match ctx.start() {
                    Ok(sch) => sch,
                    Err(e) => {
                        let _ = ready_tx.send(Err(format!("启动失败: {e}")));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                if let Err(e) = sch.wait() {
                    // 释放设备时 filter 主动返回错误, 属于正常退出
                    info!("📹 摄像头解码循环结束: {e}");
                } else {
                    info!("📹 摄像头解码循环结束");
                }
            })
            .context("创建摄像头线程失败")?;

        let started = ready_rx
            .recv_timeout(OPEN_TIMEOUT)
            .map_err(|_| anyhow!("摄像头启动超时 ({:?})", OPEN_TIMEOUT))
            .and_then(|r| r.map_err(|e| anyhow!(e)));

        if let Err(e) = started {
            released.store(true, Ordering::Release);
            if handle.is_finished() {
                let _ = handle.join();
            }
            error!("❌ 摄像头打开失败: {e}");
            warn!("💡 提示: 请检查设备名称是否正确,或尝试关闭其他占用摄像头的程序");
            return Err(e).with_context(|| format!("无法打开摄像头 {}", url));
        }

        info!("✅ 摄像头连接成功,开始解码!");
        Ok(Self {
            rx,
            released,
            poll_timeout: Duration::from_millis(config.poll_timeout_ms.max(1)),
            handle: Some(handle),
            url,
        })
    }

    /// 释放设备 (幂等)
    pub fn release(&mut self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.handle.take() {
            // 下一帧到达时 filter 返回错误, FFmpeg 随即关闭设备
            if handle.join().is_err() {
                error!("❌ 摄像头线程异常退出");
            }
        }
        info!("📷 摄像头已释放: {}", self.url);
    }
}

impl FrameSource for CameraSource {
    fn next_frame(&mut self) -> Option<Frame> {
        match self.rx.recv_timeout(self.poll_timeout) {
            Ok(frame) => Some(frame),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                // 解码线程已结束; 放慢轮询, 等待上层取消
                thread::sleep(self.poll_timeout);
                None
            }
        }
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.release();
    }
}

/// 格式化摄像头URL - 根据平台选择
fn camera_url(config: &CaptureConfig) -> Result<String> {
    if cfg!(target_os = "windows") {
        let name = match &config.device_name {
            Some(name) => name.clone(),
            None => {
                let devices = list_video_devices()?;
                match devices.into_iter().find(|d| d.index == config.device_index) {
                    Some(device) => device.name,
                    None => bail!("找不到摄像头 #{}", config.device_index),
                }
            }
        };
        Ok(format!("video={}", name))
    } else if cfg!(target_os = "linux") {
        Ok(format!("/dev/video{}", config.device_index))
    } else {
        Ok(format!("{}", config.device_index))
    }
}

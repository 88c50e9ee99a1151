/// FFmpeg解码过滤器: 摄像头 → YUV420P帧 → 采集循环
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use ez_ffmpeg::filter::frame_filter::FrameFilter;
use ez_ffmpeg::filter::frame_filter_context::FrameFilterContext;
use ez_ffmpeg::{AVMediaType, Frame as AvFrame};
use log::{debug, info, warn};

use super::{Frame, PixelFormat};

/// 每个解码帧复制成紧凑的 YUV420P `Frame`, 交给单槽通道 (只保留最新帧)
pub struct DecodeFilter {
    tx: Sender<Frame>,
    // 通道满时用来丢掉旧帧
    drain: Receiver<Frame>,
    released: Arc<AtomicBool>,

    count: usize,
    last: Instant,
    current_fps: f64,
    dropped_frames: usize,
    replaced_frames: usize,
    total_frames: usize,
}

impl DecodeFilter {
    pub fn new(tx: Sender<Frame>, drain: Receiver<Frame>, released: Arc<AtomicBool>) -> Self {
        Self {
            tx,
            drain,
            released,
            count: 0,
            last: Instant::now(),
            current_fps: 0.0,
            dropped_frames: 0,
            replaced_frames: 0,
            total_frames: 0,
        }
    }

    fn drop_frame(&mut self, reason: std::fmt::Arguments) {
        self.dropped_frames += 1;
        if self.total_frames <= 10 {
            warn!("⚠️ 丢弃帧 #{}: {}", self.total_frames, reason);
        }
    }

    /// 新帧覆盖旧帧
    fn publish(&mut self, frame: Frame) -> Result<(), String> {
        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(frame)) => {
                if self.drain.try_recv().is_ok() {
                    self.replaced_frames += 1;
                }
                // 消费者可能刚好取走了旧帧, 再满就放弃这一帧
                let _ = self.tx.try_send(frame);
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err("frame receiver closed".to_string()),
        }
    }
}

impl FrameFilter for DecodeFilter {
    fn media_type(&self) -> AVMediaType {
        AVMediaType::AVMEDIA_TYPE_VIDEO
    }

    fn init(&mut self, _ctx: &FrameFilterContext) -> Result<(), String> {
        info!("✅ 解码线程启动");
        Ok(())
    }

    fn filter_frame(
        &mut self,
        frame: AvFrame,
        _ctx: &FrameFilterContext,
    ) -> Result<Option<AvFrame>, String> {
        // 设备已释放: 返回错误让 FFmpeg 结束调度
        if self.released.load(Ordering::Acquire) {
            return Err("camera released".to_string());
        }

        self.total_frames += 1;

        let owned = unsafe {
            if frame.as_ptr().is_null() || frame.is_empty() || frame.is_corrupt() {
                self.drop_frame(format_args!("空帧/损坏帧"));
                return Ok(None);
            }

            let raw = &*frame.as_ptr();
            let w = raw.width.max(0) as usize;
            let h = raw.height.max(0) as usize;
            if w == 0 || h == 0 || w > 4096 || h > 4096 {
                self.drop_frame(format_args!("非法分辨率 {}x{}", w, h));
                return Ok(None);
            }

            let y_plane = raw.data[0];
            let u_plane = raw.data[1];
            let v_plane = raw.data[2];
            let y_stride = raw.linesize[0].max(0) as usize;
            let uv_stride = raw.linesize[1].max(0) as usize;
            let (cw, ch) = ((w + 1) / 2, (h + 1) / 2);

            if y_plane.is_null() || u_plane.is_null() || v_plane.is_null() {
                self.drop_frame(format_args!("YUV指针为空"));
                return Ok(None);
            }
            if y_stride < w || uv_stride < cw || raw.linesize[2] < raw.linesize[1] {
                self.drop_frame(format_args!(
                    "步长异常 y_stride={} uv_stride={}",
                    y_stride, uv_stride
                ));
                return Ok(None);
            }

            // 去掉行尾 padding, 拷贝成紧凑平面
            let mut data = Vec::with_capacity(w * h + 2 * cw * ch);
            for row in 0..h {
                data.extend_from_slice(std::slice::from_raw_parts(y_plane.add(row * y_stride), w));
            }
            for plane in [u_plane, v_plane] {
                for row in 0..ch {
                    data.extend_from_slice(std::slice::from_raw_parts(
                        plane.add(row * uv_stride),
                        cw,
                    ));
                }
            }

            Frame::new(w as u32, h as u32, PixelFormat::Yuv420p, data)
        };

        self.count += 1;
        if self.last.elapsed().as_secs_f64() >= 1.0 {
            let elapsed = self.last.elapsed().as_secs_f64();
            self.current_fps = self.count as f64 / elapsed;
            let drop_rate = self.dropped_frames as f64 / self.total_frames as f64 * 100.0;
            debug!(
                "📺 采集统计: {}帧 | 实际{:.1}fps | 总帧{} | 丢弃{} ({:.1}%) | 覆盖{}",
                self.count,
                self.current_fps,
                self.total_frames,
                self.dropped_frames,
                drop_rate,
                self.replaced_frames
            );
            self.last = Instant::now();
            self.count = 0;
        }

        self.publish(owned)?;
        Ok(Some(frame))
    }

    fn uninit(&mut self, _ctx: &FrameFilterContext) {
        info!(
            "✅ 解码线程退出 (总帧{} | 丢弃{})",
            self.total_frames, self.dropped_frames
        );
    }
}

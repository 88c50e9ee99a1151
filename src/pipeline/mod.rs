/// 采集处理循环 (Capture Loop)
///
/// 单线程串行: 采集 → 解码 → 检测 → 绘制 → 显示, 直到收到取消信号
/// - `LoopController`: 循环本体, 只依赖 trait, 可以用 mock 测试
/// - `LiveView`:       工作线程生命周期 (start / stop), 见 `worker`
pub mod worker;

pub use worker::{CancellationToken, LiveView, RunState};

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use log::{debug, info, warn};

use crate::{Annotator, Detector, FrameSource, Presenter};

/// 循环退出时返回的计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub iterations: u64,
    pub frames: u64,
    pub skipped_frames: u64,
    pub decode_failures: u64,
    pub detector_failures: u64,
    pub empty_results: u64,
    pub annotated: u64,
    pub presented: u64,
}

impl fmt::Display for LoopStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "循环{}次 | 帧{} | 无帧{} | 解码失败{} | 检测失败{} | 无目标{} | 标注{} | 显示{}",
            self.iterations,
            self.frames,
            self.skipped_frames,
            self.decode_failures,
            self.detector_failures,
            self.empty_results,
            self.annotated,
            self.presented
        )
    }
}

/// 给界面读的实时状态
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusSnapshot {
    pub running: bool,
    pub fps: f64,
    pub inference_ms: f64,
    pub detections: usize,
    pub presented: u64,
    /// 最近一次启动失败的原因
    pub last_error: Option<String>,
}

/// 循环与界面共享的状态
#[derive(Clone, Default)]
pub struct LoopStatus {
    inner: Arc<Mutex<StatusSnapshot>>,
}

impl LoopStatus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StatusSnapshot> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.lock().clone()
    }

    pub(crate) fn set_error(&self, error: String) {
        let mut s = self.lock();
        s.running = false;
        s.last_error = Some(error);
    }

    pub(crate) fn clear_error(&self) {
        self.lock().last_error = None;
    }

    pub(crate) fn set_running(&self, running: bool) {
        let mut s = self.lock();
        s.running = running;
        if !running {
            s.fps = 0.0;
        }
    }

    fn record(&self, inference_ms: f64, detections: usize, presented: u64) {
        let mut s = self.lock();
        s.inference_ms = inference_ms;
        s.detections = detections;
        s.presented = presented;
    }

    fn set_fps(&self, fps: f64) {
        self.lock().fps = fps;
    }
}

/// 前10次都记录, 之后每100次记录一次
fn should_log(n: u64) -> bool {
    n <= 10 || n % 100 == 0
}

/// 采集处理循环
///
/// Owns the frame source, detector and presenter for as long as it runs.
/// Per iteration: check cancellation, pull a frame, decode, detect, draw
/// (only when there is something to draw), present.
pub struct LoopController<S, D, P> {
    source: S,
    detector: D,
    presenter: P,
    annotator: Arc<Annotator>,
    status: LoopStatus,
}

impl<S, D, P> LoopController<S, D, P>
where
    S: FrameSource,
    D: Detector,
    P: Presenter,
{
    pub fn new(source: S, detector: D, presenter: P, annotator: Arc<Annotator>) -> Self {
        Self {
            source,
            detector,
            presenter,
            annotator,
            status: LoopStatus::new(),
        }
    }

    pub fn with_status(mut self, status: LoopStatus) -> Self {
        self.status = status;
        self
    }

    pub fn status(&self) -> &LoopStatus {
        &self.status
    }

    /// 运行直到 `cancel` 被置位; 每次采集前检查一次
    ///
    /// A capture or inference call already in flight is never interrupted,
    /// so at most one more cycle completes after cancellation is requested.
    pub fn run(&mut self, cancel: &CancellationToken) -> LoopStats {
        info!("▶️ 采集循环启动");
        self.status.set_running(true);

        let mut stats = LoopStats::default();
        let mut count = 0u64;
        let mut last = Instant::now();

        while !cancel.is_cancelled() {
            stats.iterations += 1;

            // 1. 采集
            let Some(frame) = self.source.next_frame() else {
                stats.skipped_frames += 1;
                if should_log(stats.skipped_frames) {
                    debug!("⏳ 暂无帧 (累计{})", stats.skipped_frames);
                }
                continue;
            };
            stats.frames += 1;

            // 2. 解码
            let image = match frame.into_rgba() {
                Ok(image) => image,
                Err(e) => {
                    stats.decode_failures += 1;
                    if should_log(stats.decode_failures) {
                        warn!("⚠️ 帧解码失败 (累计{}): {e:#}", stats.decode_failures);
                    }
                    continue;
                }
            };

            // 3. 检测; 出错按无目标处理, 不重试
            let start = Instant::now();
            let detections = match self.detector.detect(&image) {
                Ok(detections) => detections,
                Err(e) => {
                    stats.detector_failures += 1;
                    if should_log(stats.detector_failures) {
                        warn!("⚠️ 检测失败 (累计{}): {e:#}", stats.detector_failures);
                    }
                    Vec::new()
                }
            };
            let inference_ms = start.elapsed().as_secs_f64() * 1000.0;

            // 4. 绘制 (无目标时原图直接显示)
            let output = if detections.is_empty() {
                stats.empty_results += 1;
                image
            } else {
                stats.annotated += 1;
                self.annotator.annotate(&image, &detections)
            };

            // 5. 显示
            self.presenter.show(output);
            stats.presented += 1;
            self.status
                .record(inference_ms, detections.len(), stats.presented);

            count += 1;
            let elapsed = last.elapsed().as_secs_f64();
            if elapsed >= 1.0 {
                let fps = count as f64 / elapsed;
                self.status.set_fps(fps);
                debug!(
                    "🎯 循环: {:.1}fps | 推理 {:.1}ms | {}个目标",
                    fps,
                    inference_ms,
                    detections.len()
                );
                count = 0;
                last = Instant::now();
            }
        }

        self.status.set_running(false);
        info!("⏹️ 采集循环结束: {stats}");
        stats
    }

    pub fn into_parts(self) -> (S, D, P) {
        (self.source, self.detector, self.presenter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BoundingBox, Detection, DetectionSet, Frame, PixelFormat};
    use anyhow::{anyhow, Result};
    use image::{Rgba, RgbaImage};

    /// 按脚本返回帧; 第 `cancel_after` 次调用时置位取消
    struct ScriptedSource {
        frames: Vec<Option<Frame>>,
        calls: usize,
        cancel_after: usize,
        token: CancellationToken,
    }

    impl ScriptedSource {
        fn new(frames: Vec<Option<Frame>>, cancel_after: usize, token: &CancellationToken) -> Self {
            Self {
                frames,
                calls: 0,
                cancel_after,
                token: token.clone(),
            }
        }
    }

    impl FrameSource for ScriptedSource {
        fn next_frame(&mut self) -> Option<Frame> {
            let frame = self.frames.get(self.calls).cloned().flatten();
            self.calls += 1;
            if self.calls >= self.cancel_after {
                self.token.cancel();
            }
            frame
        }
    }

    enum Behaviour {
        Empty,
        Fail,
        One,
    }

    struct MockDetector {
        behaviour: Behaviour,
        calls: usize,
    }

    impl MockDetector {
        fn new(behaviour: Behaviour) -> Self {
            Self { behaviour, calls: 0 }
        }
    }

    impl Detector for MockDetector {
        fn detect(&mut self, _image: &RgbaImage) -> Result<DetectionSet> {
            self.calls += 1;
            match self.behaviour {
                Behaviour::Empty => Ok(Vec::new()),
                Behaviour::Fail => Err(anyhow!("inference failed")),
                Behaviour::One => Ok(vec![Detection::new(
                    BoundingBox::new(4.0, 4.0, 4.0, 4.0),
                    0,
                    "person",
                    0.8,
                )]),
            }
        }
    }

    #[derive(Default)]
    struct Collect(Vec<RgbaImage>);

    impl Presenter for Collect {
        fn show(&mut self, image: RgbaImage) {
            self.0.push(image);
        }
    }

    fn gray_frame() -> Frame {
        Frame::from_rgba(RgbaImage::from_pixel(10, 10, Rgba([50, 50, 50, 255])))
    }

    fn controller(
        source: ScriptedSource,
        behaviour: Behaviour,
    ) -> LoopController<ScriptedSource, MockDetector, Collect> {
        LoopController::new(
            source,
            MockDetector::new(behaviour),
            Collect::default(),
            Arc::new(Annotator::default()),
        )
    }

    #[test]
    fn test_none_frames_keep_polling() {
        let token = CancellationToken::new();
        let source = ScriptedSource::new(vec![None; 50], 50, &token);
        let mut ctl = controller(source, Behaviour::One);

        let stats = ctl.run(&token);
        assert_eq!(stats.iterations, 50);
        assert_eq!(stats.skipped_frames, 50);
        assert_eq!(stats.presented, 0);

        let (_, detector, presenter) = ctl.into_parts();
        assert_eq!(detector.calls, 0);
        assert!(presenter.0.is_empty());
    }

    #[test]
    fn test_empty_detections_pass_through() {
        let token = CancellationToken::new();
        let source = ScriptedSource::new(vec![Some(gray_frame()); 5], 5, &token);
        let mut ctl = controller(source, Behaviour::Empty);

        let stats = ctl.run(&token);
        assert_eq!(stats.annotated, 0);
        assert_eq!(stats.empty_results, 5);
        assert_eq!(stats.presented, 5);

        let (_, _, presenter) = ctl.into_parts();
        let original = gray_frame().into_rgba().unwrap();
        assert!(presenter.0.iter().all(|img| *img == original));
    }

    #[test]
    fn test_detector_error_treated_as_empty() {
        let token = CancellationToken::new();
        let source = ScriptedSource::new(vec![Some(gray_frame()); 3], 3, &token);
        let mut ctl = controller(source, Behaviour::Fail);

        let stats = ctl.run(&token);
        assert_eq!(stats.detector_failures, 3);
        assert_eq!(stats.annotated, 0);
        assert_eq!(stats.presented, 3);
    }

    #[test]
    fn test_detections_are_annotated() {
        let token = CancellationToken::new();
        let source = ScriptedSource::new(vec![Some(gray_frame()); 2], 2, &token);
        let mut ctl = controller(source, Behaviour::One);

        let stats = ctl.run(&token);
        assert_eq!(stats.annotated, 2);

        let (_, _, presenter) = ctl.into_parts();
        let original = gray_frame().into_rgba().unwrap();
        assert_eq!(presenter.0.len(), 2);
        assert_ne!(presenter.0[0], original);
        assert_eq!(presenter.0[0].dimensions(), original.dimensions());
    }

    #[test]
    fn test_decode_failure_skips_iteration() {
        let token = CancellationToken::new();
        let broken = Frame::new(4, 4, PixelFormat::Rgba8, vec![0; 3]);
        let source = ScriptedSource::new(vec![Some(broken), Some(gray_frame())], 2, &token);
        let mut ctl = controller(source, Behaviour::Empty);

        let stats = ctl.run(&token);
        assert_eq!(stats.decode_failures, 1);
        assert_eq!(stats.frames, 2);
        assert_eq!(stats.presented, 1);

        let (_, detector, _) = ctl.into_parts();
        assert_eq!(detector.calls, 1);
    }

    #[test]
    fn test_cancel_during_capture_finishes_current_cycle_only() {
        let token = CancellationToken::new();
        // 第3次采集时取消: 当前这一轮照常完成, 之后不再采集
        let source = ScriptedSource::new(vec![Some(gray_frame()); 10], 3, &token);
        let mut ctl = controller(source, Behaviour::Empty);

        let stats = ctl.run(&token);
        assert_eq!(stats.iterations, 3);
        assert_eq!(stats.presented, 3);

        let (source, _, _) = ctl.into_parts();
        assert_eq!(source.calls, 3);
    }

    #[test]
    fn test_cancelled_before_start_never_captures() {
        let token = CancellationToken::new();
        token.cancel();
        let source = ScriptedSource::new(vec![Some(gray_frame())], 1, &token);
        let mut ctl = controller(source, Behaviour::Empty);

        assert_eq!(ctl.run(&token), LoopStats::default());
        assert!(!ctl.status().snapshot().running);
    }

    #[test]
    fn test_status_records_last_cycle() {
        let token = CancellationToken::new();
        let source = ScriptedSource::new(vec![Some(gray_frame()); 4], 4, &token);
        let status = LoopStatus::new();
        let mut ctl = controller(source, Behaviour::One).with_status(status.clone());

        ctl.run(&token);
        let snapshot = status.snapshot();
        assert!(!snapshot.running);
        assert_eq!(snapshot.detections, 1);
        assert_eq!(snapshot.presented, 4);
    }

    #[test]
    fn test_should_log_throttle() {
        assert!(should_log(1));
        assert!(should_log(10));
        assert!(!should_log(11));
        assert!(should_log(200));
    }
}

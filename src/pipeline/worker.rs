//! 工作线程 (LiveView)
//! 职责: 在独立线程上运行采集循环, 对称的 start / stop, 保证资源释放

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, bail, Context, Result};
use log::{error, info};

use super::{LoopController, LoopStats, LoopStatus};
use crate::{Annotator, Detector, FrameSource, Presenter};

/// 协作式取消信号; clone 共享同一个标志
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunState {
    pub running: bool,
    pub cancellation_requested: bool,
}

struct Worker<D> {
    token: CancellationToken,
    handle: JoinHandle<(D, LoopStats)>,
}

/// 实时检测视图: 同一时刻最多一个采集循环
///
/// The detector moves into the worker thread on `start` and comes back on
/// `stop`, so a stopped view can be started again with a fresh source. The
/// source is dropped on the worker thread before the detector is handed
/// back, which releases the capture device first.
pub struct LiveView<D, P> {
    detector: Option<D>,
    presenter: P,
    annotator: Arc<Annotator>,
    status: LoopStatus,
    worker: Option<Worker<D>>,
}

impl<D, P> LiveView<D, P>
where
    D: Detector + Send + 'static,
    P: Presenter + Clone + Send + 'static,
{
    pub fn new(detector: D, presenter: P, annotator: Annotator) -> Self {
        Self {
            detector: Some(detector),
            presenter,
            annotator: Arc::new(annotator),
            status: LoopStatus::new(),
            worker: None,
        }
    }

    /// 启动采集循环; 已在运行时拒绝
    pub fn start<S>(&mut self, source: S) -> Result<()>
    where
        S: FrameSource + Send + 'static,
    {
        self.start_with(move || Ok(source))
    }

    /// 在工作线程上打开帧来源并启动采集循环
    ///
    /// Opening a camera can block for seconds, so `open` runs on the worker.
    /// An open failure ends the worker and is reported through
    /// [`LoopStatus`] (`last_error`); the detector comes back on `stop`.
    pub fn start_with<S, F>(&mut self, open: F) -> Result<()>
    where
        S: FrameSource + Send + 'static,
        F: FnOnce() -> Result<S> + Send + 'static,
    {
        if let Some(worker) = &self.worker {
            if !worker.handle.is_finished() {
                bail!("采集循环已在运行");
            }
            // 线程已自行结束 (打开失败或 panic), 先回收
            self.stop()?;
        }

        let detector = self
            .detector
            .take()
            .ok_or_else(|| anyhow!("检测器不可用 (上一次采集线程异常退出)"))?;

        let token = CancellationToken::new();
        let cancel = token.clone();
        let presenter = self.presenter.clone();
        let annotator = Arc::clone(&self.annotator);
        let status = self.status.clone();
        status.clear_error();

        let handle = thread::Builder::new()
            .name("capture-loop".into())
            .spawn(move || {
                let source = match open() {
                    Ok(source) => source,
                    Err(e) => {
                        error!("❌ 打开帧来源失败: {e:#}");
                        status.set_error(format!("{e:#}"));
                        return (detector, LoopStats::default());
                    }
                };
                let mut controller =
                    LoopController::new(source, detector, presenter, annotator).with_status(status);
                let stats = controller.run(&cancel);
                let (source, detector, _presenter) = controller.into_parts();
                drop(source);
                (detector, stats)
            })
            .context("创建采集线程失败")?;

        self.worker = Some(Worker { token, handle });
        info!("🚀 实时检测已启动");
        Ok(())
    }

    /// 请求取消并等待工作线程退出; 未运行时返回 `Ok(None)`
    ///
    /// Blocks for at most one capture + inference cycle. A device that
    /// never returns a frame blocks here too.
    pub fn stop(&mut self) -> Result<Option<LoopStats>> {
        let Some(worker) = self.worker.take() else {
            return Ok(None);
        };

        worker.token.cancel();
        match worker.handle.join() {
            Ok((detector, stats)) => {
                self.detector = Some(detector);
                info!("🛑 实时检测已停止");
                Ok(Some(stats))
            }
            Err(_) => {
                self.status.set_running(false);
                error!("❌ 采集线程异常退出");
                bail!("采集线程异常退出, 检测器已丢失")
            }
        }
    }

    pub fn run_state(&self) -> RunState {
        match &self.worker {
            Some(worker) => RunState {
                running: !worker.handle.is_finished(),
                cancellation_requested: worker.token.is_cancelled(),
            },
            None => RunState::default(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.run_state().running
    }

    pub fn status(&self) -> &LoopStatus {
        &self.status
    }

    /// 运行期间检测器在工作线程里, 返回 None
    pub fn detector(&self) -> Option<&D> {
        self.detector.as_ref()
    }
}

impl<D, P> Drop for LiveView<D, P> {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.token.cancel();
            if worker.handle.join().is_err() {
                error!("❌ 采集线程异常退出");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_shared_between_clones() {
        let token = CancellationToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());
        token.cancel();
        assert!(other.is_cancelled());
    }
}

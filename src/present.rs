//! 显示面 (Presenter)
//!
//! 工作线程写入, 渲染线程读取; 只保留最新一帧, 不排队

use std::sync::{Arc, Mutex, MutexGuard};

use image::RgbaImage;

/// 把一帧交给界面; 必须能从工作线程调用
pub trait Presenter {
    fn show(&mut self, image: RgbaImage);
}

impl<P: Presenter + ?Sized> Presenter for Box<P> {
    fn show(&mut self, image: RgbaImage) {
        (**self).show(image)
    }
}

#[derive(Default)]
struct SlotState {
    latest: Option<RgbaImage>,
    seq: u64,
}

/// 单槽显示面, 后写覆盖先写 (last-write-wins)
///
/// Cloning shares the slot. The sequence number increases on every `show`,
/// so the renderer can tell whether anything new arrived.
#[derive(Clone, Default)]
pub struct DisplaySlot {
    inner: Arc<Mutex<SlotState>>,
}

impl DisplaySlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        // 写入方 panic 不影响显示
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 取出比 `since` 更新的帧; 没有新帧返回 None
    pub fn take_latest(&self, since: u64) -> Option<(u64, RgbaImage)> {
        let mut state = self.lock();
        if state.seq <= since {
            return None;
        }
        let seq = state.seq;
        state.latest.take().map(|image| (seq, image))
    }

    /// 当前帧的拷贝, 不清空槽位
    pub fn peek(&self) -> Option<RgbaImage> {
        self.lock().latest.clone()
    }

    pub fn sequence(&self) -> u64 {
        self.lock().seq
    }

    pub fn clear(&self) {
        self.lock().latest = None;
    }
}

impl Presenter for DisplaySlot {
    fn show(&mut self, image: RgbaImage) {
        let mut state = self.lock();
        state.latest = Some(image);
        state.seq += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn img(v: u8) -> RgbaImage {
        RgbaImage::from_pixel(2, 2, Rgba([v, v, v, 255]))
    }

    #[test]
    fn test_last_write_wins() {
        let mut slot = DisplaySlot::new();
        slot.show(img(1));
        slot.show(img(2));
        slot.show(img(3));

        let (seq, latest) = slot.take_latest(0).unwrap();
        assert_eq!(seq, 3);
        assert_eq!(latest, img(3));
        // 已取走
        assert!(slot.take_latest(0).is_none());
    }

    #[test]
    fn test_take_latest_skips_seen_sequence() {
        let mut slot = DisplaySlot::new();
        slot.show(img(1));
        assert!(slot.take_latest(1).is_none());
        assert!(slot.peek().is_some());

        slot.show(img(2));
        assert_eq!(slot.take_latest(1).map(|(s, _)| s), Some(2));
    }

    #[test]
    fn test_clones_share_slot_across_threads() {
        let slot = DisplaySlot::new();
        let mut writer = slot.clone();
        std::thread::spawn(move || writer.show(img(9)))
            .join()
            .unwrap();
        assert_eq!(slot.sequence(), 1);
        assert_eq!(slot.peek(), Some(img(9)));

        slot.clear();
        assert!(slot.peek().is_none());
        assert_eq!(slot.sequence(), 1);
    }
}

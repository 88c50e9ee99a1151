// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 检测框 (center + size)
///
/// The model reports boxes as `(cx, cy, w, h)` in source-image pixels; the
/// corner form is derived on demand for drawing.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BoundingBox {
    pub cx: f32,
    pub cy: f32,
    pub width: f32,
    pub height: f32,
}

/// Corner form of a [`BoundingBox`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Corners {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl BoundingBox {
    pub fn new(cx: f32, cy: f32, width: f32, height: f32) -> Self {
        Self {
            cx,
            cy,
            width,
            height,
        }
    }

    pub fn from_corners(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        let width = right - left;
        let height = bottom - top;
        Self {
            cx: left + width / 2.,
            cy: top + height / 2.,
            width,
            height,
        }
    }

    pub fn left(&self) -> f32 {
        self.cx - self.width / 2.
    }

    pub fn top(&self) -> f32 {
        self.cy - self.height / 2.
    }

    pub fn right(&self) -> f32 {
        self.cx + self.width / 2.
    }

    pub fn bottom(&self) -> f32 {
        self.cy + self.height / 2.
    }

    pub fn corners(&self) -> Corners {
        Corners {
            left: self.left(),
            top: self.top(),
            right: self.right(),
            bottom: self.bottom(),
        }
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    pub fn intersection_area(&self, another: &BoundingBox) -> f32 {
        let l = self.left().max(another.left());
        let r = self.right().min(another.right());
        let t = self.top().max(another.top());
        let b = self.bottom().min(another.bottom());
        (r - l).max(0.) * (b - t).max(0.)
    }

    pub fn union(&self, another: &BoundingBox) -> f32 {
        self.area() + another.area() - self.intersection_area(another)
    }

    pub fn iou(&self, another: &BoundingBox) -> f32 {
        let union = self.union(another);
        if union <= 0. {
            return 0.;
        }
        self.intersection_area(another) / union
    }
}

/// 单个检测目标
///
/// Produced fresh for every frame; nothing links a detection to the one in
/// the previous frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub class_id: usize,
    pub label: String,
    pub confidence: f32,
}

impl Detection {
    pub fn new(bbox: BoundingBox, class_id: usize, label: impl Into<String>, confidence: f32) -> Self {
        Self {
            bbox,
            class_id,
            label: label.into(),
            confidence,
        }
    }
}

/// Ordered detections of one frame. May be empty.
pub type DetectionSet = Vec<Detection>;

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_corners_from_center() {
        let bbox = BoundingBox::new(100.0, 50.0, 40.0, 20.0);
        let c = bbox.corners();
        assert_eq!(
            c,
            Corners {
                left: 80.0,
                top: 40.0,
                right: 120.0,
                bottom: 60.0
            }
        );
    }

    #[test]
    fn test_corners_preserve_size() {
        let boxes = [
            BoundingBox::new(0.0, 0.0, 10.0, 10.0),
            BoundingBox::new(320.5, 17.25, 33.3, 7.7),
            BoundingBox::new(-5.0, 3.0, 1.0, 0.5),
            BoundingBox::new(1e4, 2e4, 123.456, 0.001),
        ];
        for bbox in boxes {
            let c = bbox.corners();
            assert_relative_eq!(c.left, bbox.cx - bbox.width / 2.0);
            assert_relative_eq!(c.right, bbox.cx + bbox.width / 2.0);
            assert_relative_eq!(c.top, bbox.cy - bbox.height / 2.0);
            assert_relative_eq!(c.bottom, bbox.cy + bbox.height / 2.0);
            assert_relative_eq!(c.right - c.left, bbox.width, epsilon = 1e-3);
            assert_relative_eq!(c.bottom - c.top, bbox.height, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_from_corners_inverse() {
        let bbox = BoundingBox::from_corners(80.0, 40.0, 120.0, 60.0);
        assert_eq!(bbox, BoundingBox::new(100.0, 50.0, 40.0, 20.0));
    }

    #[test]
    fn test_iou() {
        let a = BoundingBox::new(10.0, 10.0, 20.0, 20.0);
        let b = BoundingBox::new(20.0, 10.0, 20.0, 20.0);
        // 交集 10x20, 并集 600
        assert_relative_eq!(a.iou(&b), 200.0 / 600.0);
        assert_relative_eq!(a.iou(&a), 1.0);

        let far = BoundingBox::new(500.0, 500.0, 5.0, 5.0);
        assert_eq!(a.iou(&far), 0.0);

        let empty = BoundingBox::default();
        assert_eq!(empty.iou(&empty), 0.0);
    }
}

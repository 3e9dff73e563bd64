use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in pixels, anchored at its top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BBox {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    pub fn union(&self, other: &BBox) -> BBox {
        let x1 = self.x.min(other.x);
        let y1 = self.y.min(other.y);
        let x2 = self.right().max(other.right());
        let y2 = self.bottom().max(other.bottom());
        BBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
        }
    }

    pub fn contains(&self, other: &BBox) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }
}

/// User-selected rectangle in global desktop coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub top: i32,
    pub left: i32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn as_bbox(&self) -> BBox {
        BBox::new(self.left, self.top, self.width as i32, self.height as i32)
    }

    /// Lifts a bbox measured inside the captured image into global space.
    pub fn to_global(&self, local: &BBox) -> BBox {
        BBox::new(
            self.left + local.x,
            self.top + local.y,
            local.width,
            local.height,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorSpec {
    pub index: usize,
    pub width: u32,
    pub height: u32,
    pub origin_x: i32,
    pub origin_y: i32,
}

impl MonitorSpec {
    pub fn bounds(&self) -> BBox {
        BBox::new(
            self.origin_x,
            self.origin_y,
            self.width as i32,
            self.height as i32,
        )
    }

    pub fn label(&self) -> String {
        format!("Monitor {}: {}x{}", self.index + 1, self.width, self.height)
    }
}

/// Monitor list enumerated once per session by the display collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Monitors {
    specs: Vec<MonitorSpec>,
}

impl Monitors {
    pub fn new(specs: Vec<MonitorSpec>) -> Self {
        Self { specs }
    }

    pub fn get(&self, index: usize) -> Option<&MonitorSpec> {
        self.specs.iter().find(|spec| spec.index == index)
    }

    /// First monitor whose bounds contain the region's top-left corner.
    pub fn containing(&self, region: &Region) -> Option<&MonitorSpec> {
        self.specs.iter().find(|spec| {
            let bounds = spec.bounds();
            region.left >= bounds.x
                && region.left < bounds.right()
                && region.top >= bounds.y
                && region.top < bounds.bottom()
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &MonitorSpec> {
        self.specs.iter()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

/// Maps a rectangle from `src` monitor space onto `dst` monitor space.
///
/// Each axis is scaled independently by the ratio of monitor resolutions and
/// re-anchored at the destination origin. The result is then translated (never
/// rescaled) so it lies inside the destination bounds. A rectangle larger than
/// the destination is pinned to its origin and cut to the monitor extent.
pub fn map_rect(rect: &BBox, src: &MonitorSpec, dst: &MonitorSpec) -> BBox {
    let scale_x = dst.width as f64 / src.width.max(1) as f64;
    let scale_y = dst.height as f64 / src.height.max(1) as f64;

    let x = (rect.x - src.origin_x) as f64 * scale_x + dst.origin_x as f64;
    let y = (rect.y - src.origin_y) as f64 * scale_y + dst.origin_y as f64;
    let width = (rect.width.max(0) as f64 * scale_x).round() as i64;
    let height = (rect.height.max(0) as f64 * scale_y).round() as i64;

    let (x, width) = clamp_axis(x.round() as i64, width, dst.origin_x, dst.width);
    let (y, height) = clamp_axis(y.round() as i64, height, dst.origin_y, dst.height);
    BBox::new(x, y, width, height)
}

pub fn map_region(region: &Region, src: &MonitorSpec, dst: &MonitorSpec) -> BBox {
    map_rect(&region.as_bbox(), src, dst)
}

fn clamp_axis(pos: i64, len: i64, origin: i32, extent: u32) -> (i32, i32) {
    let extent = extent as i64;
    let origin = origin as i64;
    let len = len.min(extent);
    let pos = pos.clamp(origin, origin + extent - len);
    (pos as i32, len as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(index: usize, width: u32, height: u32, origin_x: i32, origin_y: i32) -> MonitorSpec {
        MonitorSpec {
            index,
            width,
            height,
            origin_x,
            origin_y,
        }
    }

    #[test]
    fn region_scales_to_higher_resolution_monitor() {
        let src = monitor(0, 1920, 1080, 0, 0);
        let dst = monitor(1, 3840, 2160, 0, 0);
        let region = Region {
            top: 100,
            left: 100,
            width: 200,
            height: 50,
        };
        assert_eq!(
            map_region(&region, &src, &dst),
            BBox::new(200, 200, 400, 100)
        );
    }

    #[test]
    fn identical_monitors_leave_rect_untouched() {
        let spec = monitor(0, 2560, 1440, -2560, 0);
        let rect = BBox::new(-2000, 300, 640, 120);
        assert_eq!(map_rect(&rect, &spec, &spec), rect);
    }

    #[test]
    fn origin_offsets_are_rebased() {
        let src = monitor(0, 1920, 1080, 1920, 0);
        let dst = monitor(1, 1920, 1080, 0, 200);
        let rect = BBox::new(2020, 50, 100, 40);
        assert_eq!(map_rect(&rect, &src, &dst), BBox::new(100, 250, 100, 40));
    }

    #[test]
    fn overflowing_rect_is_translated_back_inside() {
        let src = monitor(0, 1920, 1080, 0, 0);
        let dst = monitor(1, 1280, 720, 0, 0);
        let rect = BBox::new(1800, 1000, 300, 150);
        let mapped = map_rect(&rect, &src, &dst);
        assert_eq!(mapped.width, 200);
        assert_eq!(mapped.height, 100);
        assert_eq!(mapped.right(), 1280);
        assert_eq!(mapped.bottom(), 720);
    }

    #[test]
    fn mapped_rects_always_fit_destination() {
        let src = monitor(0, 1920, 1080, 0, 0);
        let destinations = [
            monitor(1, 3840, 2160, 1920, 0),
            monitor(2, 1280, 1024, -1280, -200),
            monitor(3, 800, 600, 0, 1080),
        ];
        let rects = [
            BBox::new(0, 0, 1920, 1080),
            BBox::new(-500, -500, 100, 100),
            BBox::new(1900, 1070, 400, 400),
            BBox::new(5000, 200, 10, 10),
            BBox::new(10, 10, 4000, 3000),
        ];
        for dst in &destinations {
            for rect in &rects {
                let mapped = map_rect(rect, &src, dst);
                assert!(
                    dst.bounds().contains(&mapped),
                    "{:?} escaped {:?}",
                    mapped,
                    dst
                );
            }
        }
    }

    #[test]
    fn local_bbox_lifts_into_global_space() {
        let region = Region {
            top: 40,
            left: 1930,
            width: 300,
            height: 200,
        };
        assert_eq!(
            region.to_global(&BBox::new(5, 6, 7, 8)),
            BBox::new(1935, 46, 7, 8)
        );
    }

    #[test]
    fn containing_monitor_is_found_by_origin() {
        let monitors = Monitors::new(vec![
            monitor(0, 1920, 1080, 0, 0),
            monitor(1, 2560, 1440, 1920, 0),
        ]);
        let region = Region {
            top: 10,
            left: 2000,
            width: 10,
            height: 10,
        };
        assert_eq!(monitors.containing(&region).map(|m| m.index), Some(1));
    }
}

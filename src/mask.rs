//! Exclusion-zone mask engine.
//!
//! Operator-declared polygons are rasterized into a single-channel mask that matches the
//! camera resolution. A pixel value of 0 marks the active detection area. Nonzero values
//! are priority-encoded gray levels: with `n` zones, zone `i` (0-indexed, declaration
//! order) is painted with `255` when `n == 1`, otherwise `255 - i * (154 / (n - 1))`
//! truncated toward zero. Zones are painted in declaration order, so where zones overlap
//! the later-declared zone owns the pixel.
//!
//! The mask is built once per camera and is read-only afterwards.

use anyhow::{anyhow, Result};
use image::{GrayImage, Luma};
use std::path::Path;

/// Gray-level span between the first and the last zone.
const LEVEL_SPAN: f32 = 154.0;
const TOP_LEVEL: f32 = 255.0;

/// Pixel coordinate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned box in image pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BoundingBox {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2, self.y + self.height / 2)
    }

    /// Corners inset by one pixel from each edge.
    pub fn inset_corners(&self) -> [Point; 4] {
        let right = self.x + self.width - 1;
        let bottom = self.y + self.height - 1;
        [
            Point::new(self.x + 1, self.y + 1),
            Point::new(right, self.y + 1),
            Point::new(self.x + 1, bottom),
            Point::new(right, bottom),
        ]
    }

    /// Clip the box origin into the image and shrink the extent to fit.
    ///
    /// Returns `None` when the clipped box has no area.
    pub fn clip_to(&self, width: u32, height: u32) -> Option<Self> {
        let cols = i32::try_from(width).ok()?;
        let rows = i32::try_from(height).ok()?;
        if cols <= 0 || rows <= 0 {
            return None;
        }
        let x = self.x.clamp(0, cols - 1);
        let y = self.y.clamp(0, rows - 1);
        let clipped = Self {
            x,
            y,
            width: self.width.min(cols - x),
            height: self.height.min(rows - y),
        };
        if clipped.width <= 0 || clipped.height <= 0 {
            return None;
        }
        Some(clipped)
    }
}

/// Closed polygon of pixel coordinates, clipped to the camera resolution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExclusionZone {
    points: Vec<Point>,
}

impl ExclusionZone {
    /// Build a zone from raw operator points.
    ///
    /// Points are clamped to `[0, width-1] x [0, height-1]`. Fewer than three points
    /// yields `None`. The polygon is closed by repeating the first point when needed.
    pub fn new(points: impl IntoIterator<Item = Point>, width: u32, height: u32) -> Option<Self> {
        let max_x = i32::try_from(width).unwrap_or(i32::MAX).saturating_sub(1).max(0);
        let max_y = i32::try_from(height).unwrap_or(i32::MAX).saturating_sub(1).max(0);
        let mut points: Vec<Point> = points
            .into_iter()
            .map(|p| Point::new(p.x.clamp(0, max_x), p.y.clamp(0, max_y)))
            .collect();
        if points.len() < 3 {
            return None;
        }
        if points.first() != points.last() {
            points.push(points[0]);
        }
        Some(Self { points })
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }
}

/// Gray level assigned to zone `index` out of `count` zones.
pub fn zone_level(index: usize, count: usize) -> u8 {
    if count <= 1 {
        return TOP_LEVEL as u8;
    }
    let step = LEVEL_SPAN / (count - 1) as f32;
    (TOP_LEVEL - index as f32 * step) as u8
}

/// Priority-encoded exclusion raster.
#[derive(Clone, Debug)]
pub struct ExclusionMask {
    raster: GrayImage,
}

impl ExclusionMask {
    /// Rasterize `zones` in declaration order. No zones yields an all-zero mask.
    pub fn build(width: u32, height: u32, zones: &[ExclusionZone]) -> Self {
        let mut raster = GrayImage::new(width, height);
        for (index, zone) in zones.iter().enumerate() {
            fill_polygon(&mut raster, zone.points(), zone_level(index, zones.len()));
        }
        Self { raster }
    }

    /// Mask with no exclusion zones.
    pub fn empty(width: u32, height: u32) -> Self {
        Self::build(width, height, &[])
    }

    pub fn width(&self) -> u32 {
        self.raster.width()
    }

    pub fn height(&self) -> u32 {
        self.raster.height()
    }

    /// Raster value at `point`; 0 for anything outside the raster.
    pub fn level_at(&self, point: Point) -> u8 {
        if point.x < 0 || point.y < 0 {
            return 0;
        }
        let (x, y) = (point.x as u32, point.y as u32);
        if x >= self.raster.width() || y >= self.raster.height() {
            return 0;
        }
        self.raster.get_pixel(x, y).0[0]
    }

    /// True only when the box center and all four inset corners share one nonzero level.
    ///
    /// A box whose center lies in the active area, or that straddles a zone boundary,
    /// still counts as a detection.
    pub fn should_exclude(&self, bbox: &BoundingBox) -> bool {
        let center_level = self.level_at(bbox.center());
        if center_level == 0 {
            return false;
        }
        bbox.inset_corners()
            .iter()
            .all(|corner| self.level_at(*corner) == center_level)
    }

    /// Number of pixels carrying a nonzero level.
    pub fn excluded_pixels(&self) -> usize {
        self.raster.pixels().filter(|p| p.0[0] != 0).count()
    }

    pub fn save_png(&self, path: &Path) -> Result<()> {
        self.raster
            .save(path)
            .map_err(|e| anyhow!("failed to write mask {}: {}", path.display(), e))
    }
}

/// Scanline fill plus 8-connected outline, so boundary pixels belong to the polygon.
fn fill_polygon(raster: &mut GrayImage, points: &[Point], level: u8) {
    if points.len() < 3 || raster.width() == 0 || raster.height() == 0 {
        return;
    }
    let edges: Vec<(Point, Point)> = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .take(points.len())
        .map(|(a, b)| (*a, *b))
        .filter(|(a, b)| a != b)
        .collect();

    let min_y = points.iter().map(|p| p.y).min().unwrap_or(0).max(0);
    let max_y = points
        .iter()
        .map(|p| p.y)
        .max()
        .unwrap_or(0)
        .min(raster.height() as i32 - 1);

    let mut crossings: Vec<f64> = Vec::new();
    for y in min_y..=max_y {
        crossings.clear();
        let yf = y as f64;
        for (a, b) in &edges {
            if a.y == b.y {
                continue;
            }
            let (lo, hi) = if a.y < b.y { (a, b) } else { (b, a) };
            if y < lo.y || y >= hi.y {
                continue;
            }
            let t = (yf - lo.y as f64) / (hi.y - lo.y) as f64;
            crossings.push(lo.x as f64 + t * (hi.x - lo.x) as f64);
        }
        crossings.sort_by(|a, b| a.total_cmp(b));
        for pair in crossings.chunks_exact(2) {
            let start = pair[0].ceil() as i32;
            let end = pair[1].floor() as i32;
            for x in start..=end {
                put(raster, x, y, level);
            }
        }
    }

    for (a, b) in &edges {
        draw_line(raster, *a, *b, level);
    }
}

fn draw_line(raster: &mut GrayImage, from: Point, to: Point, level: u8) {
    let dx = (to.x - from.x).abs();
    let dy = -(to.y - from.y).abs();
    let sx = if from.x < to.x { 1 } else { -1 };
    let sy = if from.y < to.y { 1 } else { -1 };
    let mut err = dx + dy;
    let (mut x, mut y) = (from.x, from.y);
    loop {
        put(raster, x, y, level);
        if x == to.x && y == to.y {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

fn put(raster: &mut GrayImage, x: i32, y: i32, level: u8) {
    if x < 0 || y < 0 || x as u32 >= raster.width() || y as u32 >= raster.height() {
        return;
    }
    raster.put_pixel(x as u32, y as u32, Luma([level]));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect_zone(x0: i32, y0: i32, x1: i32, y1: i32, w: u32, h: u32) -> ExclusionZone {
        ExclusionZone::new(
            [
                Point::new(x0, y0),
                Point::new(x1, y0),
                Point::new(x1, y1),
                Point::new(x0, y1),
            ],
            w,
            h,
        )
        .expect("rect zone")
    }

    #[test]
    fn no_zones_yields_all_zero_mask() {
        let mask = ExclusionMask::build(64, 48, &[]);
        assert_eq!(mask.width(), 64);
        assert_eq!(mask.height(), 48);
        assert_eq!(mask.excluded_pixels(), 0);
    }

    #[test]
    fn zone_levels_follow_declaration_priority() {
        assert_eq!(zone_level(0, 1), 255);
        assert_eq!(zone_level(0, 2), 255);
        assert_eq!(zone_level(1, 2), 101);
        assert_eq!(zone_level(0, 3), 255);
        assert_eq!(zone_level(1, 3), 178);
        assert_eq!(zone_level(2, 3), 101);
    }

    #[test]
    fn single_zone_paints_full_level_including_edges() {
        let zone = rect_zone(10, 10, 20, 20, 64, 64);
        let mask = ExclusionMask::build(64, 64, &[zone]);
        assert_eq!(mask.level_at(Point::new(15, 15)), 255);
        assert_eq!(mask.level_at(Point::new(10, 10)), 255);
        assert_eq!(mask.level_at(Point::new(20, 20)), 255);
        assert_eq!(mask.level_at(Point::new(9, 15)), 0);
        assert_eq!(mask.level_at(Point::new(21, 15)), 0);
        assert_eq!(mask.excluded_pixels(), 11 * 11);
    }

    #[test]
    fn later_zone_wins_overlap() {
        let first = rect_zone(0, 0, 30, 30, 64, 64);
        let second = rect_zone(20, 20, 50, 50, 64, 64);
        let mask = ExclusionMask::build(64, 64, &[first, second]);
        assert_eq!(mask.level_at(Point::new(5, 5)), 255);
        assert_eq!(mask.level_at(Point::new(25, 25)), 101);
        assert_eq!(mask.level_at(Point::new(45, 45)), 101);
    }

    #[test]
    fn out_of_bounds_points_classify_as_active() {
        let zone = rect_zone(0, 0, 63, 63, 64, 64);
        let mask = ExclusionMask::build(64, 64, &[zone]);
        assert_eq!(mask.level_at(Point::new(-1, 5)), 0);
        assert_eq!(mask.level_at(Point::new(5, -1)), 0);
        assert_eq!(mask.level_at(Point::new(64, 5)), 0);
        assert_eq!(mask.level_at(Point::new(5, 64)), 0);
        assert_eq!(mask.level_at(Point::new(63, 63)), 255);
    }

    #[test]
    fn zone_points_are_clamped_and_closed() {
        let zone = ExclusionZone::new(
            [Point::new(-5, -5), Point::new(500, 0), Point::new(500, 500)],
            100,
            50,
        )
        .expect("zone");
        assert_eq!(
            zone.points(),
            &[
                Point::new(0, 0),
                Point::new(99, 0),
                Point::new(99, 49),
                Point::new(0, 0)
            ]
        );
        assert!(ExclusionZone::new([Point::new(1, 1), Point::new(2, 2)], 10, 10).is_none());
    }

    #[test]
    fn box_fully_inside_zone_is_excluded() {
        let zone = rect_zone(10, 10, 60, 60, 100, 100);
        let mask = ExclusionMask::build(100, 100, &[zone]);
        assert!(mask.should_exclude(&BoundingBox::new(20, 20, 10, 10)));
    }

    #[test]
    fn box_centered_in_active_area_is_kept() {
        let zone = rect_zone(10, 10, 60, 60, 100, 100);
        let mask = ExclusionMask::build(100, 100, &[zone]);
        assert!(!mask.should_exclude(&BoundingBox::new(70, 70, 10, 10)));
    }

    #[test]
    fn box_straddling_zone_edge_is_kept() {
        let zone = rect_zone(10, 10, 60, 60, 100, 100);
        let mask = ExclusionMask::build(100, 100, &[zone]);
        // center (60, 40) sits on the zone edge, right corners fall outside
        assert!(!mask.should_exclude(&BoundingBox::new(50, 30, 20, 20)));
    }

    #[test]
    fn box_straddling_two_zones_is_kept() {
        let left = rect_zone(0, 0, 49, 99, 100, 100);
        let right = rect_zone(50, 0, 99, 99, 100, 100);
        let mask = ExclusionMask::build(100, 100, &[left, right]);
        assert!(mask.should_exclude(&BoundingBox::new(5, 5, 20, 20)));
        assert!(mask.should_exclude(&BoundingBox::new(60, 5, 20, 20)));
        assert!(!mask.should_exclude(&BoundingBox::new(40, 5, 20, 20)));
    }

    #[test]
    fn clip_shrinks_box_and_rejects_empty() {
        let clipped = BoundingBox::new(90, 40, 30, 30).clip_to(100, 50).expect("clip");
        assert_eq!(clipped, BoundingBox::new(90, 40, 10, 10));
        assert!(BoundingBox::new(10, 10, 0, 5).clip_to(100, 50).is_none());
        assert!(BoundingBox::new(10, 10, 5, -3).clip_to(100, 50).is_none());
        assert_eq!(
            BoundingBox::new(-10, -10, 20, 20).clip_to(100, 50),
            Some(BoundingBox::new(0, 0, 20, 20))
        );
    }

    #[test]
    fn triangle_interior_is_filled() {
        let zone = ExclusionZone::new(
            [Point::new(0, 0), Point::new(40, 0), Point::new(0, 40)],
            64,
            64,
        )
        .expect("triangle");
        let mask = ExclusionMask::build(64, 64, &[zone]);
        assert_eq!(mask.level_at(Point::new(5, 5)), 255);
        assert_eq!(mask.level_at(Point::new(35, 35)), 0);
    }
}

//! Screen geometry and the coordinate normalizer
//!
//! Steps store pointer positions relative to the target's client area as
//! fractions in `[0, 1]`. Replay maps them back onto whatever client rect the
//! window has at that moment, so moving the window never breaks a recording.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Absolute screen point in physical pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        let dx = f64::from(self.x - other.x);
        let dy = f64::from(self.y - other.y);
        (dx * dx + dy * dy).sqrt()
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Screen rectangle. `contains` is half-open: the right and bottom edges
/// belong to the next pixel over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn from_edges(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self::new(left, top, right - left, bottom - top)
    }

    pub fn origin(&self) -> Point {
        Point::new(self.x, self.y)
    }

    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn contains(&self, p: Point) -> bool {
        !self.is_empty() && p.x >= self.x && p.x < self.right() && p.y >= self.y && p.y < self.bottom()
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2, self.y + self.height / 2)
    }

    pub fn translate(&self, dx: i32, dy: i32) -> Rect {
        Rect::new(self.x + dx, self.y + dy, self.width, self.height)
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{} at ({}, {})", self.width, self.height, self.x, self.y)
    }
}

/// Client-relative position, each axis in `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NormPoint {
    pub x: f64,
    pub y: f64,
}

impl NormPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn clamped(&self) -> NormPoint {
        NormPoint::new(clamp_unit(self.x), clamp_unit(self.y))
    }
}

/// Result of [`to_normalized`]. `clamped` is set when the source point lay
/// outside the client rect and had to be pulled onto its edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalized {
    pub point: NormPoint,
    pub clamped: bool,
}

/// Map a screen point into client-relative coordinates.
///
/// Returns `None` when the client rect has no area (minimized windows report
/// an empty client rect).
pub fn to_normalized(p: Point, client: &Rect) -> Option<Normalized> {
    if client.is_empty() {
        return None;
    }
    let nx = f64::from(p.x - client.x) / f64::from(client.width);
    let ny = f64::from(p.y - client.y) / f64::from(client.height);
    let point = NormPoint::new(clamp_unit(nx), clamp_unit(ny));
    Some(Normalized {
        clamped: point.x != nx || point.y != ny,
        point,
    })
}

/// Map client-relative coordinates onto the current client rect.
///
/// Inputs outside `[0, 1]` are clamped first, and the result always lands on a
/// pixel inside `client`.
pub fn to_screen(n: NormPoint, client: &Rect) -> Option<Point> {
    if client.is_empty() {
        return None;
    }
    let n = n.clamped();
    let x = client.x + (n.x * f64::from(client.width)).round() as i32;
    let y = client.y + (n.y * f64::from(client.height)).round() as i32;
    Some(Point::new(
        x.clamp(client.x, client.right() - 1),
        y.clamp(client.y, client.bottom() - 1),
    ))
}

fn clamp_unit(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn center_of_client_maps_to_half() {
        let client = Rect::new(100, 100, 400, 300);
        let n = to_normalized(Point::new(300, 250), &client).unwrap();
        assert_eq!(n.point, NormPoint::new(0.5, 0.5));
        assert!(!n.clamped);
    }

    #[test]
    fn moved_window_shifts_the_screen_point() {
        let moved = Rect::new(300, 300, 400, 300);
        assert_eq!(to_screen(NormPoint::new(0.5, 0.5), &moved), Some(Point::new(500, 450)));
    }

    #[test]
    fn outside_point_is_clamped_and_flagged() {
        let client = Rect::new(0, 0, 200, 100);
        let n = to_normalized(Point::new(250, -10), &client).unwrap();
        assert_eq!(n.point, NormPoint::new(1.0, 0.0));
        assert!(n.clamped);
    }

    #[test]
    fn edge_of_unit_square_stays_inside_the_rect() {
        let client = Rect::new(10, 20, 50, 40);
        assert_eq!(to_screen(NormPoint::new(1.0, 1.0), &client), Some(Point::new(59, 59)));
        assert_eq!(to_screen(NormPoint::new(-3.0, 7.0), &client), Some(Point::new(10, 59)));
    }

    #[test]
    fn empty_client_has_no_mapping() {
        let empty = Rect::new(0, 0, 0, 300);
        assert!(to_normalized(Point::new(0, 0), &empty).is_none());
        assert!(to_screen(NormPoint::new(0.5, 0.5), &empty).is_none());
    }

    #[test]
    fn contains_is_half_open() {
        let r = Rect::new(0, 0, 10, 10);
        assert!(r.contains(Point::new(0, 0)));
        assert!(r.contains(Point::new(9, 9)));
        assert!(!r.contains(Point::new(10, 5)));
        assert!(!r.contains(Point::new(5, -1)));
    }

    fn rect_strategy() -> impl Strategy<Value = Rect> {
        (-4000..4000i32, -4000..4000i32, 1..3000i32, 1..3000i32)
            .prop_map(|(x, y, w, h)| Rect::new(x, y, w, h))
    }

    proptest! {
        #[test]
        fn inside_points_round_trip(
            r in rect_strategy(),
            fx in 0.0..1.0f64,
            fy in 0.0..1.0f64,
        ) {
            let p = Point::new(
                r.x + (fx * f64::from(r.width)) as i32,
                r.y + (fy * f64::from(r.height)) as i32,
            );
            prop_assume!(r.contains(p));
            let n = to_normalized(p, &r).unwrap();
            prop_assert!(!n.clamped);
            prop_assert_eq!(to_screen(n.point, &r), Some(p));
        }

        #[test]
        fn outside_points_clamp_to_unit_square(
            r in rect_strategy(),
            px in -10000..10000i32,
            py in -10000..10000i32,
        ) {
            let p = Point::new(px, py);
            let n = to_normalized(p, &r).unwrap();
            prop_assert!((0.0..=1.0).contains(&n.point.x));
            prop_assert!((0.0..=1.0).contains(&n.point.y));
            if !r.contains(p) {
                let on_right_edge = p.x == r.right() && p.y >= r.y && p.y <= r.bottom();
                let on_bottom_edge = p.y == r.bottom() && p.x >= r.x && p.x <= r.right();
                prop_assert!(n.clamped || on_right_edge || on_bottom_edge);
            }
        }

        #[test]
        fn screen_points_always_land_inside(
            r in rect_strategy(),
            nx in -2.0..3.0f64,
            ny in -2.0..3.0f64,
        ) {
            let p = to_screen(NormPoint::new(nx, ny), &r).unwrap();
            prop_assert!(r.contains(p));
        }
    }
}

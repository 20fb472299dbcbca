//! Hit-test regions for mouse transitions.

use crate::event::{MouseData, Point};
use serde::{Deserialize, Serialize};

/// Which mouse position a hit test reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinateSpace {
    /// Position relative to the receiving object.
    #[default]
    Local,
    /// Position in scene coordinates.
    Scene,
}

impl CoordinateSpace {
    pub fn position(self, mouse: &MouseData) -> Point {
        match self {
            CoordinateSpace::Local => mouse.local_pos,
            CoordinateSpace::Scene => mouse.scene_pos,
        }
    }
}

/// A 2D region. Edges are inside the region.
///
/// Charts write it as a single-key map, `{ rect: { x, y, width, height } }`
/// or `{ polygon: { points: [..] } }`, in JSON and YAML alike.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RegionRepr", into = "RegionRepr")]
pub enum HitRegion {
    Rect {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    },
    /// Closed polygon, filled with the odd-even rule.
    Polygon { points: Vec<Point> },
}

impl HitRegion {
    pub fn rect(x: f64, y: f64, width: f64, height: f64) -> Self {
        HitRegion::Rect {
            x,
            y,
            width,
            height,
        }
    }

    pub fn polygon(points: impl IntoIterator<Item = Point>) -> Self {
        HitRegion::Polygon {
            points: points.into_iter().collect(),
        }
    }

    pub fn contains(&self, p: Point) -> bool {
        match self {
            HitRegion::Rect {
                x,
                y,
                width,
                height,
            } => {
                let (left, right) = ordered(*x, x + width);
                let (top, bottom) = ordered(*y, y + height);
                p.x >= left && p.x <= right && p.y >= top && p.y <= bottom
            }
            HitRegion::Polygon { points } => polygon_contains(points, p),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct RectRepr {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

#[derive(Serialize, Deserialize)]
struct PolygonRepr {
    points: Vec<Point>,
}

// serde_yaml only reads externally tagged enums from `!tag` syntax.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RegionRepr {
    Rect { rect: RectRepr },
    Polygon { polygon: PolygonRepr },
}

impl From<RegionRepr> for HitRegion {
    fn from(repr: RegionRepr) -> Self {
        match repr {
            RegionRepr::Rect { rect } => HitRegion::rect(rect.x, rect.y, rect.width, rect.height),
            RegionRepr::Polygon { polygon } => HitRegion::Polygon {
                points: polygon.points,
            },
        }
    }
}

impl From<HitRegion> for RegionRepr {
    fn from(region: HitRegion) -> Self {
        match region {
            HitRegion::Rect {
                x,
                y,
                width,
                height,
            } => RegionRepr::Rect {
                rect: RectRepr {
                    x,
                    y,
                    width,
                    height,
                },
            },
            HitRegion::Polygon { points } => RegionRepr::Polygon {
                polygon: PolygonRepr { points },
            },
        }
    }
}

fn ordered(a: f64, b: f64) -> (f64, f64) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn polygon_contains(points: &[Point], p: Point) -> bool {
    if points.len() < 3 {
        return false;
    }

    let mut inside = false;
    let mut j = points.len() - 1;
    for i in 0..points.len() {
        let (a, b) = (points[i], points[j]);
        if on_segment(a, b, p) {
            return true;
        }
        if (a.y > p.y) != (b.y > p.y) {
            let cross_x = a.x + (p.y - a.y) * (b.x - a.x) / (b.y - a.y);
            if p.x < cross_x {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

fn on_segment(a: Point, b: Point, p: Point) -> bool {
    let cross = (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x);
    if cross.abs() > 1e-9 {
        return false;
    }
    p.x >= a.x.min(b.x) && p.x <= a.x.max(b.x) && p.y >= a.y.min(b.y) && p.y <= a.y.max(b.y)
}

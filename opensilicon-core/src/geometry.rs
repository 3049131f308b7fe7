use serde::{Deserialize, Serialize};

/// A coordinate in design-grid units.
pub type Coord = i64;

/// A 2D point in layout coordinates (design-grid units).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: Coord,
    pub y: Coord,
}

impl Point {
    pub fn new(x: Coord, y: Coord) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Point) -> f64 {
        let dx = (self.x - other.x) as f64;
        let dy = (self.y - other.y) as f64;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn translate(&self, dx: Coord, dy: Coord) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }
}

/// An axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BBox {
    pub min: Point,
    pub max: Point,
}

impl BBox {
    pub fn new(min: Point, max: Point) -> Self {
        Self {
            min: Point::new(min.x.min(max.x), min.y.min(max.y)),
            max: Point::new(min.x.max(max.x), min.y.max(max.y)),
        }
    }

    pub fn from_coords(x1: Coord, y1: Coord, x2: Coord, y2: Coord) -> Self {
        Self::new(Point::new(x1, y1), Point::new(x2, y2))
    }

    pub fn from_points(points: &[Point]) -> Option<Self> {
        let first = points.first()?;
        let mut bb = BBox {
            min: *first,
            max: *first,
        };
        for p in &points[1..] {
            bb.min.x = bb.min.x.min(p.x);
            bb.min.y = bb.min.y.min(p.y);
            bb.max.x = bb.max.x.max(p.x);
            bb.max.y = bb.max.y.max(p.y);
        }
        Some(bb)
    }

    pub fn width(&self) -> Coord {
        self.max.x - self.min.x
    }

    pub fn height(&self) -> Coord {
        self.max.y - self.min.y
    }

    pub fn area(&self) -> i128 {
        self.width() as i128 * self.height() as i128
    }

    pub fn center(&self) -> Point {
        Point::new(
            (self.min.x + self.max.x) / 2,
            (self.min.y + self.max.y) / 2,
        )
    }

    pub fn contains_point(&self, p: &Point) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y
    }

    pub fn contains(&self, other: &BBox) -> bool {
        self.contains_point(&other.min) && self.contains_point(&other.max)
    }

    /// True when the boxes overlap or touch.
    pub fn intersects(&self, other: &BBox) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
    }

    pub fn intersection(&self, other: &BBox) -> Option<BBox> {
        if !self.intersects(other) {
            return None;
        }
        Some(BBox {
            min: Point::new(self.min.x.max(other.min.x), self.min.y.max(other.min.y)),
            max: Point::new(self.max.x.min(other.max.x), self.max.y.min(other.max.y)),
        })
    }

    pub fn union(&self, other: &BBox) -> Self {
        Self {
            min: Point::new(self.min.x.min(other.min.x), self.min.y.min(other.min.y)),
            max: Point::new(self.max.x.max(other.max.x), self.max.y.max(other.max.y)),
        }
    }

    /// Grow (or shrink, for negative `d`) the box on all sides.
    pub fn expand(&self, d: Coord) -> Self {
        Self {
            min: Point::new(self.min.x - d, self.min.y - d),
            max: Point::new(self.max.x + d, self.max.y + d),
        }
    }

    /// Counter-clockwise corner ring starting at the lower-left corner.
    pub fn corners(&self) -> [Point; 4] {
        [
            self.min,
            Point::new(self.max.x, self.min.y),
            self.max,
            Point::new(self.min.x, self.max.y),
        ]
    }
}

/// A rectangle defined by lower-left and upper-right corners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub layer_id: crate::LayerId,
    pub lower_left: Point,
    pub upper_right: Point,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net: Option<String>,
}

impl Rect {
    pub fn new(layer_id: crate::LayerId, x1: Coord, y1: Coord, x2: Coord, y2: Coord) -> Self {
        Self {
            layer_id,
            lower_left: Point::new(x1.min(x2), y1.min(y2)),
            upper_right: Point::new(x1.max(x2), y1.max(y2)),
            net: None,
        }
    }

    pub fn with_net(mut self, net: &str) -> Self {
        self.net = Some(net.to_string());
        self
    }

    pub fn bbox(&self) -> BBox {
        BBox::new(self.lower_left, self.upper_right)
    }

    pub fn width(&self) -> Coord {
        self.upper_right.x - self.lower_left.x
    }

    pub fn height(&self) -> Coord {
        self.upper_right.y - self.lower_left.y
    }

    pub fn area(&self) -> i128 {
        self.bbox().area()
    }

    pub fn contains_point(&self, p: &Point) -> bool {
        self.bbox().contains_point(p)
    }
}

/// A polygon defined by a list of vertices (either winding, not closed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub layer_id: crate::LayerId,
    pub vertices: Vec<Point>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net: Option<String>,
}

impl Polygon {
    pub fn new(layer_id: crate::LayerId, vertices: Vec<Point>) -> Self {
        Self {
            layer_id,
            vertices,
            net: None,
        }
    }

    pub fn with_net(mut self, net: &str) -> Self {
        self.net = Some(net.to_string());
        self
    }

    pub fn bbox(&self) -> Option<BBox> {
        BBox::from_points(&self.vertices)
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn area(&self) -> f64 {
        (ring_signed_area2(&self.vertices) as f64 / 2.0).abs()
    }

    pub fn is_clockwise(&self) -> bool {
        ring_signed_area2(&self.vertices) < 0
    }
}

/// A path (wire) defined by a centerline and width. Ends are flush with the
/// end vertices and bends are mitered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Path {
    pub layer_id: crate::LayerId,
    pub points: Vec<Point>,
    pub width: Coord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net: Option<String>,
}

impl Path {
    pub fn new(layer_id: crate::LayerId, points: Vec<Point>, width: Coord) -> Self {
        Self {
            layer_id,
            points,
            width,
            net: None,
        }
    }

    pub fn with_net(mut self, net: &str) -> Self {
        self.net = Some(net.to_string());
        self
    }

    pub fn bbox(&self) -> Option<BBox> {
        BBox::from_points(&self.outline())
    }

    pub fn length(&self) -> f64 {
        self.points
            .windows(2)
            .map(|w| w[0].distance_to(&w[1]))
            .sum()
    }

    /// Boundary polygon of the wire, counter-clockwise, snapped to the grid.
    pub fn outline(&self) -> Vec<Point> {
        let pts = dedup_consecutive(&self.points);
        if pts.len() < 2 || self.width <= 0 {
            return Vec::new();
        }
        let half = self.width as f64 / 2.0;
        let dirs: Vec<(f64, f64)> = pts
            .windows(2)
            .map(|w| {
                let dx = (w[1].x - w[0].x) as f64;
                let dy = (w[1].y - w[0].y) as f64;
                let len = (dx * dx + dy * dy).sqrt();
                (dx / len, dy / len)
            })
            .collect();

        // Offset of vertex i towards the left (+1) or right (-1) side.
        let side_point = |i: usize, sign: f64| -> Point {
            let p = pts[i];
            let (px, py) = (p.x as f64, p.y as f64);
            let (ox, oy) = if i == 0 {
                let (dx, dy) = dirs[0];
                (-dy * half * sign, dx * half * sign)
            } else if i == pts.len() - 1 {
                let (dx, dy) = dirs[i - 1];
                (-dy * half * sign, dx * half * sign)
            } else {
                let (ax, ay) = dirs[i - 1];
                let (bx, by) = dirs[i];
                let (nx, ny) = (-ay - by, ax + bx);
                let cos_half = ((1.0 + ax * bx + ay * by) / 2.0).sqrt();
                let nlen = (nx * nx + ny * ny).sqrt();
                if nlen < 1e-12 || cos_half < 1e-6 {
                    (-ay * half * sign, ax * half * sign)
                } else {
                    let miter = half / cos_half;
                    (nx / nlen * miter * sign, ny / nlen * miter * sign)
                }
            };
            Point::new((px + ox).round() as Coord, (py + oy).round() as Coord)
        };

        let mut ring: Vec<Point> = (0..pts.len()).map(|i| side_point(i, -1.0)).collect();
        ring.extend((0..pts.len()).rev().map(|i| side_point(i, 1.0)));
        simplify_ring(&ring)
    }
}

/// A geometric primitive in the layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GeomPrimitive {
    Rect(Rect),
    Polygon(Polygon),
    Path(Path),
}

impl GeomPrimitive {
    pub fn bbox(&self) -> Option<BBox> {
        match self {
            GeomPrimitive::Rect(r) => Some(r.bbox()),
            GeomPrimitive::Polygon(p) => p.bbox(),
            GeomPrimitive::Path(p) => p.bbox(),
        }
    }

    pub fn layer_id(&self) -> crate::LayerId {
        match self {
            GeomPrimitive::Rect(r) => r.layer_id,
            GeomPrimitive::Polygon(p) => p.layer_id,
            GeomPrimitive::Path(p) => p.layer_id,
        }
    }

    pub fn net(&self) -> Option<&str> {
        match self {
            GeomPrimitive::Rect(r) => r.net.as_deref(),
            GeomPrimitive::Polygon(p) => p.net.as_deref(),
            GeomPrimitive::Path(p) => p.net.as_deref(),
        }
    }

    /// Boundary ring of the primitive with duplicate and collinear vertices removed.
    pub fn outline(&self) -> Vec<Point> {
        match self {
            GeomPrimitive::Rect(r) => r.bbox().corners().to_vec(),
            GeomPrimitive::Polygon(p) => simplify_ring(&p.vertices),
            GeomPrimitive::Path(p) => p.outline(),
        }
    }
}

/// Twice the signed area of a ring; positive for counter-clockwise winding.
pub fn ring_signed_area2(ring: &[Point]) -> i128 {
    let n = ring.len();
    if n < 3 {
        return 0;
    }
    (0..n)
        .map(|i| {
            let a = ring[i];
            let b = ring[(i + 1) % n];
            a.x as i128 * b.y as i128 - b.x as i128 * a.y as i128
        })
        .sum()
}

fn dedup_consecutive(points: &[Point]) -> Vec<Point> {
    let mut out: Vec<Point> = Vec::with_capacity(points.len());
    for p in points {
        if out.last() != Some(p) {
            out.push(*p);
        }
    }
    out
}

/// Remove repeated vertices, the closing vertex, and collinear vertices.
pub fn simplify_ring(ring: &[Point]) -> Vec<Point> {
    let mut pts = dedup_consecutive(ring);
    while pts.len() > 1 && pts.first() == pts.last() {
        pts.pop();
    }
    loop {
        let n = pts.len();
        if n < 3 {
            return Vec::new();
        }
        let collinear = (0..n).find(|&i| {
            let a = pts[(i + n - 1) % n];
            let b = pts[i];
            let c = pts[(i + 1) % n];
            let cross = (b.x - a.x) as i128 * (c.y - b.y) as i128
                - (b.y - a.y) as i128 * (c.x - b.x) as i128;
            cross == 0
        });
        match collinear {
            Some(i) => {
                pts.remove(i);
            }
            None => return pts,
        }
    }
}

//! Edge-local test geometry: boundary spans, test strips and corner sectors.

use opensilicon_core::kernel::{Piece, Vec2};
use opensilicon_core::{Point, ShapeSet};

use crate::user_rule::Side;
use crate::walker::EdgeView;

/// Depth of the strip used to find abutting or covering material.
pub(crate) const SAMPLE_DEPTH: f64 = 0.5;
/// Spans shorter than this are dropped.
pub(crate) const MIN_SPAN: f64 = 0.5;
const SECTOR_STEP_DEG: f64 = 15.0;
const EPS: f64 = 1e-6;

/// A parameter interval along an edge, measured from its start.
pub(crate) type Span = (f64, f64);

#[derive(Debug, Clone, Copy)]
pub(crate) struct EdgeFrame {
    pub origin: Vec2,
    pub dir: Vec2,
    pub len: f64,
}

impl EdgeFrame {
    pub fn new(edge: &EdgeView) -> Self {
        let origin = Vec2::from(edge.start);
        let d = Vec2::from(edge.end) - origin;
        Self {
            origin,
            dir: d.normalized(),
            len: d.length(),
        }
    }

    pub fn normal(&self, side: Side) -> Vec2 {
        side_normal(self.dir, side)
    }

    pub fn at(&self, t: f64) -> Vec2 {
        self.origin + self.dir * t
    }

    pub fn full(&self) -> Span {
        (0.0, self.len)
    }

    pub fn strip(&self, span: Span, depth: f64, side: Side) -> Option<Piece> {
        let n = self.normal(side) * depth;
        let (a, b) = (self.at(span.0), self.at(span.1));
        Piece::new(vec![a, b, b + n, a + n])
    }

    fn project(&self, piece: &Piece) -> Span {
        piece
            .points()
            .iter()
            .map(|p| (*p - self.origin).dot(self.dir))
            .fold((f64::MAX, f64::MIN), |(lo, hi), t| (lo.min(t), hi.max(t)))
    }

    /// Parts of `span` whose strip of `depth` on `side` is covered by `material`.
    pub fn covered(&self, span: Span, depth: f64, side: Side, material: &ShapeSet) -> Vec<Span> {
        let Some(strip) = self.strip(span, depth, side) else {
            return Vec::new();
        };
        let mut found = Vec::new();
        for piece in material.pieces() {
            let Some(hit) = strip.intersect(piece) else {
                continue;
            };
            let (lo, hi) = self.project(&hit);
            let (lo, hi) = (lo.max(span.0), hi.min(span.1));
            if hi - lo > EPS && hit.area() >= 0.5 * (hi - lo) * depth {
                found.push((lo, hi));
            }
        }
        merge(found)
    }

    pub fn endpoints(&self, span: Span) -> Vec<Point> {
        vec![self.at(span.0).to_point(), self.at(span.1).to_point()]
    }
}

fn side_normal(dir: Vec2, side: Side) -> Vec2 {
    match side {
        Side::Inside => dir.perp_left(),
        Side::Outside => dir.perp_right(),
    }
}

fn side_angle(interior: f64, side: Side) -> f64 {
    match side {
        Side::Inside => interior,
        Side::Outside => 360.0 - interior,
    }
}

fn keep(spans: Vec<Span>) -> Vec<Span> {
    spans.into_iter().filter(|s| s.1 - s.0 >= MIN_SPAN).collect()
}

/// Sort and join overlapping or touching spans.
pub(crate) fn merge(mut spans: Vec<Span>) -> Vec<Span> {
    spans.sort_by(|a, b| a.0.total_cmp(&b.0));
    let mut out: Vec<Span> = Vec::with_capacity(spans.len());
    for s in spans {
        match out.last_mut() {
            Some(last) if s.0 <= last.1 + EPS => last.1 = last.1.max(s.1),
            _ => out.push(s),
        }
    }
    out
}

pub(crate) fn subtract_spans(spans: &[Span], cut: &[Span]) -> Vec<Span> {
    let mut out = Vec::new();
    for &(mut lo, hi) in spans {
        for &(c0, c1) in cut {
            if c1 <= lo || c0 >= hi {
                continue;
            }
            if c0 > lo {
                out.push((lo, c0));
            }
            lo = lo.max(c1);
            if lo >= hi {
                break;
            }
        }
        if lo < hi {
            out.push((lo, hi));
        }
    }
    keep(out)
}

pub(crate) fn intersect_spans(spans: &[Span], with: &[Span]) -> Vec<Span> {
    let mut out = Vec::new();
    for &(a0, a1) in spans {
        for &(b0, b1) in with {
            let (lo, hi) = (a0.max(b0), a1.min(b1));
            if hi > lo {
                out.push((lo, hi));
            }
        }
    }
    keep(merge(out))
}

/// Strip of `depth` over `span` on `side`, trimmed by the neighboring edge's
/// half-plane at an end vertex whose angle on that side is below 180 degrees.
pub(crate) fn test_region(edge: &EdgeView, frame: &EdgeFrame, span: Span, depth: f64, side: Side) -> Option<Piece> {
    let mut piece = frame.strip(span, depth, side)?;
    if span.0 <= EPS && side_angle(edge.start_angle, side) < 180.0 - EPS {
        let prev_dir = (Vec2::from(edge.start) - Vec2::from(edge.prev)).normalized();
        piece = piece.clip(Vec2::from(edge.start), side_normal(prev_dir, side))?;
    }
    if span.1 >= frame.len - EPS && side_angle(edge.end_angle, side) < 180.0 - EPS {
        let next_dir = (Vec2::from(edge.next) - Vec2::from(edge.end)).normalized();
        piece = piece.clip(Vec2::from(edge.end), side_normal(next_dir, side))?;
    }
    Some(piece)
}

/// Inscribed circular sector at `center`, starting along `from` and sweeping
/// counter-clockwise by `sweep_deg`.
pub(crate) fn sector(center: Vec2, from: Vec2, sweep_deg: f64, radius: f64) -> Option<Piece> {
    if sweep_deg <= EPS || radius <= 0.0 {
        return None;
    }
    let steps = (sweep_deg / SECTOR_STEP_DEG).ceil().max(1.0) as usize;
    let from = from.normalized();
    let mut pts = Vec::with_capacity(steps + 2);
    pts.push(center);
    for k in 0..=steps {
        let a = (sweep_deg * k as f64 / steps as f64).to_radians();
        pts.push(center + from.rotated(a) * radius);
    }
    Piece::new(pts)
}

/// Outward sector at the convex corner where `edge` starts.
pub(crate) fn convex_sector(edge: &EdgeView, radius: f64) -> Option<Piece> {
    let prev_dir = (Vec2::from(edge.start) - Vec2::from(edge.prev)).normalized();
    sector(
        Vec2::from(edge.start),
        prev_dir.perp_right(),
        180.0 - edge.start_angle,
        radius,
    )
}

/// Inward sector at the concave corner where `edge` starts.
pub(crate) fn concave_sector(edge: &EdgeView, radius: f64) -> Option<Piece> {
    sector(
        Vec2::from(edge.start),
        edge.inward(),
        edge.start_angle - 180.0,
        radius,
    )
}

pub(crate) fn piece_points(piece: &Piece) -> Vec<Point> {
    piece.points().iter().map(|p| p.to_point()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::walker::{Boundary, EdgeCursor, DEFAULT_CORNER_ANGLE};

    fn edges(ring: &[Point]) -> Vec<EdgeView> {
        EdgeCursor::new(ring, Boundary::Outer, DEFAULT_CORNER_ANGLE)
            .unwrap()
            .collect()
    }

    #[test]
    fn test_span_arithmetic() {
        assert_eq!(merge(vec![(4.0, 6.0), (0.0, 2.0), (2.0, 3.0)]), vec![(0.0, 3.0), (4.0, 6.0)]);
        assert_eq!(subtract_spans(&[(0.0, 10.0)], &[(2.0, 4.0), (9.8, 12.0)]), vec![(0.0, 2.0), (4.0, 9.8)]);
        assert_eq!(intersect_spans(&[(0.0, 10.0)], &[(5.0, 5.2), (6.0, 20.0)]), vec![(6.0, 10.0)]);
    }

    #[test]
    fn test_covered_finds_abutting_material() {
        let ring = [Point::new(0, 0), Point::new(10, 0), Point::new(10, 10), Point::new(0, 10)];
        let e = edges(&ring);
        let right = EdgeFrame::new(&e[1]);
        let neighbor = ShapeSet::from_pieces(vec![Piece::rect(10.0, 4.0, 20.0, 20.0).unwrap()]);
        let spans = right.covered(right.full(), SAMPLE_DEPTH, Side::Outside, &neighbor);
        assert_eq!(spans.len(), 1);
        assert!((spans[0].0 - 4.0).abs() < 1e-9 && (spans[0].1 - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_region_clipped_at_acute_vertex() {
        let tri = [Point::new(0, 0), Point::new(100, 0), Point::new(50, 20)];
        let e = edges(&tri);
        let f = EdgeFrame::new(&e[0]);
        let region = test_region(&e[0], &f, f.full(), 10.0, Side::Inside).unwrap();
        assert!(region.area() < 1000.0);
        assert!(region.points().iter().all(|p| p.y >= -1e-9 && p.y <= 10.0 + 1e-9));
    }

    #[test]
    fn test_corner_sectors_open_away_from_neighbors() {
        let l = [
            Point::new(0, 0),
            Point::new(20, 0),
            Point::new(20, 5),
            Point::new(5, 5),
            Point::new(5, 20),
            Point::new(0, 20),
        ];
        let e = edges(&l);
        let outer = convex_sector(&e[1], 4.0).unwrap();
        assert!(outer.contains(Vec2::new(21.0, -1.0)));
        assert!((outer.area() - 4.0 * 4.0 * std::f64::consts::FRAC_PI_4).abs() < 0.5);
        let inner = concave_sector(&e[3], 4.0).unwrap();
        assert!(inner.contains(Vec2::new(4.0, 4.0)));
        assert!(!inner.contains(Vec2::new(6.0, 6.0)));
    }
}

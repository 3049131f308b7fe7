//! Geometry kernel.
//!
//! Shapes are held as sets of convex pieces in floating point. Polygons enter
//! the kernel through [`Kernel::zoids`], a horizontal trapezoid decomposition,
//! and every derived set (intersection, difference, bloat) stays a list of
//! convex pieces. Sets may contain overlapping pieces; [`Kernel::normalize`]
//! produces an overlap-free equivalent when exact area is needed.

use std::ops::{Add, Mul, Neg, Sub};

use thiserror::Error;

use crate::geometry::{BBox, Point};

/// Pieces with less area than this are treated as empty.
pub const AREA_EPS: f64 = 1e-3;

const LEN_EPS: f64 = 1e-9;

/// Default ceiling on the number of pieces a single operation may produce.
pub const DEFAULT_MAX_PIECES: usize = 250_000;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum KernelError {
    #[error("shape set would need {pieces} pieces, limit is {limit}")]
    TooComplex { pieces: usize, limit: usize },

    #[error("degenerate polygon with {0} usable vertices")]
    Degenerate(usize),
}

/// A point or vector in kernel space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn dot(self, other: Vec2) -> f64 {
        self.x * other.x + self.y * other.y
    }

    pub fn cross(self, other: Vec2) -> f64 {
        self.x * other.y - self.y * other.x
    }

    pub fn length(self) -> f64 {
        self.dot(self).sqrt()
    }

    pub fn normalized(self) -> Vec2 {
        let len = self.length();
        if len < LEN_EPS {
            self
        } else {
            Vec2::new(self.x / len, self.y / len)
        }
    }

    /// Rotated +90 degrees.
    pub fn perp_left(self) -> Vec2 {
        Vec2::new(-self.y, self.x)
    }

    /// Rotated -90 degrees.
    pub fn perp_right(self) -> Vec2 {
        Vec2::new(self.y, -self.x)
    }

    pub fn rotated(self, radians: f64) -> Vec2 {
        let (s, c) = radians.sin_cos();
        Vec2::new(self.x * c - self.y * s, self.x * s + self.y * c)
    }

    /// Snap to the nearest grid point.
    pub fn to_point(self) -> Point {
        Point::new(self.x.round() as i64, self.y.round() as i64)
    }
}

impl From<Point> for Vec2 {
    fn from(p: Point) -> Self {
        Vec2::new(p.x as f64, p.y as f64)
    }
}

impl Add for Vec2 {
    type Output = Vec2;
    fn add(self, o: Vec2) -> Vec2 {
        Vec2::new(self.x + o.x, self.y + o.y)
    }
}

impl Sub for Vec2 {
    type Output = Vec2;
    fn sub(self, o: Vec2) -> Vec2 {
        Vec2::new(self.x - o.x, self.y - o.y)
    }
}

impl Mul<f64> for Vec2 {
    type Output = Vec2;
    fn mul(self, k: f64) -> Vec2 {
        Vec2::new(self.x * k, self.y * k)
    }
}

impl Neg for Vec2 {
    type Output = Vec2;
    fn neg(self) -> Vec2 {
        Vec2::new(-self.x, -self.y)
    }
}

/// Axis-aligned extent of kernel geometry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extent {
    pub min: Vec2,
    pub max: Vec2,
}

impl Extent {
    pub fn from_points(points: &[Vec2]) -> Option<Self> {
        let first = *points.first()?;
        let mut ext = Extent {
            min: first,
            max: first,
        };
        for p in &points[1..] {
            ext.min.x = ext.min.x.min(p.x);
            ext.min.y = ext.min.y.min(p.y);
            ext.max.x = ext.max.x.max(p.x);
            ext.max.y = ext.max.y.max(p.y);
        }
        Some(ext)
    }

    /// True when the extents overlap or touch.
    pub fn overlaps(&self, other: &Extent) -> bool {
        self.min.x <= other.max.x + LEN_EPS
            && self.max.x >= other.min.x - LEN_EPS
            && self.min.y <= other.max.y + LEN_EPS
            && self.max.y >= other.min.y - LEN_EPS
    }

    pub fn union(&self, other: &Extent) -> Extent {
        Extent {
            min: Vec2::new(self.min.x.min(other.min.x), self.min.y.min(other.min.y)),
            max: Vec2::new(self.max.x.max(other.max.x), self.max.y.max(other.max.y)),
        }
    }

    pub fn expand(&self, d: f64) -> Extent {
        Extent {
            min: Vec2::new(self.min.x - d, self.min.y - d),
            max: Vec2::new(self.max.x + d, self.max.y + d),
        }
    }

    /// Smallest grid box enclosing the extent.
    pub fn to_bbox(&self) -> BBox {
        BBox::from_coords(
            self.min.x.floor() as i64,
            self.min.y.floor() as i64,
            self.max.x.ceil() as i64,
            self.max.y.ceil() as i64,
        )
    }
}

impl From<BBox> for Extent {
    fn from(bb: BBox) -> Self {
        Extent {
            min: bb.min.into(),
            max: bb.max.into(),
        }
    }
}

/// A convex polygon with counter-clockwise vertices and non-trivial area.
#[derive(Debug, Clone, PartialEq)]
pub struct Piece {
    pts: Vec<Vec2>,
    ext: Extent,
}

impl Piece {
    /// Build a piece from the vertices of a convex polygon in either winding.
    /// Returns `None` for slivers below [`AREA_EPS`].
    pub fn new(points: Vec<Vec2>) -> Option<Piece> {
        let mut pts = cleanup(points);
        if pts.len() < 3 {
            return None;
        }
        let area2 = signed_area2(&pts);
        if area2.abs() / 2.0 < AREA_EPS {
            return None;
        }
        if area2 < 0.0 {
            pts.reverse();
        }
        let ext = Extent::from_points(&pts)?;
        Some(Piece { pts, ext })
    }

    pub fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Option<Piece> {
        Piece::new(vec![
            Vec2::new(x0, y0),
            Vec2::new(x1, y0),
            Vec2::new(x1, y1),
            Vec2::new(x0, y1),
        ])
    }

    pub fn from_bbox(bb: &BBox) -> Option<Piece> {
        Piece::new(bb.corners().iter().map(|p| Vec2::from(*p)).collect())
    }

    pub fn points(&self) -> &[Vec2] {
        &self.pts
    }

    pub fn extent(&self) -> Extent {
        self.ext
    }

    pub fn area(&self) -> f64 {
        signed_area2(&self.pts) / 2.0
    }

    pub fn contains(&self, v: Vec2) -> bool {
        self.edges()
            .all(|(a, b)| (v - a).dot((b - a).perp_left()) >= -LEN_EPS)
    }

    fn edges(&self) -> impl Iterator<Item = (Vec2, Vec2)> + '_ {
        let n = self.pts.len();
        (0..n).map(move |i| (self.pts[i], self.pts[(i + 1) % n]))
    }

    /// Keep the part of the piece on the side of the line through `p` that
    /// `n` points to.
    pub fn clip(&self, p: Vec2, n: Vec2) -> Option<Piece> {
        Piece::new(clip_points(&self.pts, p, n))
    }

    pub fn intersect(&self, other: &Piece) -> Option<Piece> {
        if !self.ext.overlaps(&other.ext) {
            return None;
        }
        let mut pts = self.pts.clone();
        for (a, b) in other.edges() {
            pts = clip_points(&pts, a, (b - a).perp_left());
            if pts.len() < 3 {
                return None;
            }
        }
        Piece::new(pts)
    }

    /// Disjoint convex pieces covering `self` minus `other`.
    pub fn subtract(&self, other: &Piece) -> Vec<Piece> {
        if !self.ext.overlaps(&other.ext) {
            return vec![self.clone()];
        }
        let mut out = Vec::new();
        let mut rest = self.pts.clone();
        for (a, b) in other.edges() {
            let n = (b - a).perp_left();
            if let Some(outside) = Piece::new(clip_points(&rest, a, -n)) {
                out.push(outside);
            }
            rest = clip_points(&rest, a, n);
            if rest.len() < 3 {
                break;
            }
        }
        out
    }

    /// Mitered offset of every edge by `d` (outward when positive).
    pub fn offset(&self, d: f64) -> Option<Piece> {
        if d.abs() < LEN_EPS {
            return Some(self.clone());
        }
        if d < 0.0 {
            let mut pts = self.pts.clone();
            for (a, b) in self.edges() {
                let dir = (b - a).normalized();
                let inward = dir.perp_left();
                pts = clip_points(&pts, a + inward * (-d), inward);
                if pts.len() < 3 {
                    return None;
                }
            }
            return Piece::new(pts);
        }
        let lines: Vec<(Vec2, Vec2)> = self
            .edges()
            .map(|(a, b)| {
                let dir = (b - a).normalized();
                (a + dir.perp_right() * d, dir)
            })
            .collect();
        let k = lines.len();
        let pts = (0..k)
            .map(|i| {
                let (p1, u1) = lines[(i + k - 1) % k];
                let (p2, u2) = lines[i];
                let den = u1.cross(u2);
                if den.abs() < 1e-12 {
                    p2
                } else {
                    let t = (p2 - p1).cross(u2) / den;
                    p1 + u1 * t
                }
            })
            .collect();
        Piece::new(pts)
    }
}

fn signed_area2(pts: &[Vec2]) -> f64 {
    let n = pts.len();
    (0..n).map(|i| pts[i].cross(pts[(i + 1) % n])).sum()
}

fn cleanup(points: Vec<Vec2>) -> Vec<Vec2> {
    let mut pts: Vec<Vec2> = Vec::with_capacity(points.len());
    for p in points {
        if pts.last().map_or(true, |q: &Vec2| (p - *q).length() > LEN_EPS) {
            pts.push(p);
        }
    }
    while pts.len() > 1 && (pts[0] - pts[pts.len() - 1]).length() <= LEN_EPS {
        pts.pop();
    }
    let mut i = 0;
    while pts.len() >= 3 && i < pts.len() {
        let n = pts.len();
        let a = pts[(i + n - 1) % n];
        let b = pts[i];
        let c = pts[(i + 1) % n];
        let u = b - a;
        let v = c - b;
        if u.cross(v).abs() <= 1e-9 * u.length().max(1.0) * v.length().max(1.0) {
            pts.remove(i);
            i = i.saturating_sub(1);
        } else {
            i += 1;
        }
    }
    pts
}

fn clip_points(pts: &[Vec2], p: Vec2, n: Vec2) -> Vec<Vec2> {
    let len = pts.len();
    let mut out = Vec::with_capacity(len + 1);
    for i in 0..len {
        let a = pts[i];
        let b = pts[(i + 1) % len];
        let da = (a - p).dot(n);
        let db = (b - p).dot(n);
        if da >= 0.0 {
            out.push(a);
        }
        if (da >= 0.0) != (db >= 0.0) {
            let t = da / (da - db);
            out.push(a + (b - a) * t);
        }
    }
    out
}

/// A set of convex pieces, possibly overlapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShapeSet {
    pieces: Vec<Piece>,
}

impl ShapeSet {
    pub fn new() -> Self {
        Self { pieces: Vec::new() }
    }

    pub fn from_pieces(pieces: Vec<Piece>) -> Self {
        Self { pieces }
    }

    pub fn from_bbox(bb: &BBox) -> Self {
        Self {
            pieces: Piece::from_bbox(bb).into_iter().collect(),
        }
    }

    pub fn push(&mut self, piece: Piece) {
        self.pieces.push(piece);
    }

    pub fn extend(&mut self, other: ShapeSet) {
        self.pieces.extend(other.pieces);
    }

    pub fn pieces(&self) -> &[Piece] {
        &self.pieces
    }

    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    pub fn extent(&self) -> Option<Extent> {
        let mut iter = self.pieces.iter();
        let first = iter.next()?.extent();
        Some(iter.fold(first, |acc, p| acc.union(&p.extent())))
    }
}

/// How [`Kernel::bloat`] treats the interior of the shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BloatMode {
    /// The grown (or shrunk) shape itself.
    Area,
    /// Only the band swept between the original and the offset boundary.
    Edge,
}

/// Shape-set operations with a ceiling on the size of intermediate results.
#[derive(Debug, Clone, Copy)]
pub struct Kernel {
    max_pieces: usize,
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PIECES)
    }
}

impl Kernel {
    pub fn new(max_pieces: usize) -> Self {
        Self {
            max_pieces: max_pieces.max(1),
        }
    }

    pub fn max_pieces(&self) -> usize {
        self.max_pieces
    }

    fn check(&self, pieces: usize) -> Result<(), KernelError> {
        if pieces > self.max_pieces {
            return Err(KernelError::TooComplex {
                pieces,
                limit: self.max_pieces,
            });
        }
        Ok(())
    }

    /// Decompose one or more rings (outer boundaries and holes, even-odd
    /// filled) into horizontal trapezoids.
    pub fn zoids(&self, rings: &[&[Point]]) -> Result<ShapeSet, KernelError> {
        struct Edge {
            lo: Vec2,
            hi: Vec2,
        }
        impl Edge {
            fn x_at(&self, y: f64) -> f64 {
                self.lo.x + (self.hi.x - self.lo.x) * (y - self.lo.y) / (self.hi.y - self.lo.y)
            }
        }

        let mut edges = Vec::new();
        let mut ys = Vec::new();
        for ring in rings {
            let n = ring.len();
            if n < 3 {
                if n > 0 {
                    return Err(KernelError::Degenerate(n));
                }
                continue;
            }
            for i in 0..n {
                let a = ring[i];
                let b = ring[(i + 1) % n];
                ys.push(a.y);
                if a.y == b.y {
                    continue;
                }
                let (lo, hi) = if a.y < b.y { (a, b) } else { (b, a) };
                edges.push(Edge {
                    lo: lo.into(),
                    hi: hi.into(),
                });
            }
        }
        ys.sort_unstable();
        ys.dedup();

        let mut out = ShapeSet::new();
        for w in ys.windows(2) {
            let (y0, y1) = (w[0] as f64, w[1] as f64);
            let mut active: Vec<(f64, f64)> = edges
                .iter()
                .filter(|e| e.lo.y <= y0 && e.hi.y >= y1)
                .map(|e| (e.x_at(y0), e.x_at(y1)))
                .collect();
            active.sort_by(|a, b| (a.0 + a.1).total_cmp(&(b.0 + b.1)));
            for pair in active.chunks_exact(2) {
                let (l, r) = (pair[0], pair[1]);
                if let Some(piece) = Piece::new(vec![
                    Vec2::new(l.0, y0),
                    Vec2::new(r.0, y0),
                    Vec2::new(r.1, y1),
                    Vec2::new(l.1, y1),
                ]) {
                    out.push(piece);
                }
            }
            self.check(out.len())?;
        }
        Ok(out)
    }

    pub fn union(&self, a: &ShapeSet, b: &ShapeSet) -> Result<ShapeSet, KernelError> {
        self.check(a.len() + b.len())?;
        let mut out = a.clone();
        out.extend(b.clone());
        Ok(out)
    }

    pub fn intersect(&self, a: &ShapeSet, b: &ShapeSet) -> Result<ShapeSet, KernelError> {
        let mut out = ShapeSet::new();
        for p in a.pieces() {
            for q in b.pieces() {
                if let Some(r) = p.intersect(q) {
                    out.push(r);
                }
            }
            self.check(out.len())?;
        }
        Ok(out)
    }

    pub fn subtract(&self, a: &ShapeSet, b: &ShapeSet) -> Result<ShapeSet, KernelError> {
        let mut cur: Vec<Piece> = a.pieces.clone();
        for q in b.pieces() {
            if cur.is_empty() {
                break;
            }
            let mut next = Vec::with_capacity(cur.len());
            for p in &cur {
                next.extend(p.subtract(q));
            }
            self.check(next.len())?;
            cur = next;
        }
        Ok(ShapeSet::from_pieces(cur))
    }

    /// An overlap-free set covering the same area.
    pub fn normalize(&self, s: &ShapeSet) -> Result<ShapeSet, KernelError> {
        let mut out = ShapeSet::new();
        for p in s.pieces() {
            let fresh = self.subtract(&ShapeSet::from_pieces(vec![p.clone()]), &out)?;
            out.extend(fresh);
            self.check(out.len())?;
        }
        Ok(out)
    }

    pub fn area(&self, s: &ShapeSet) -> Result<f64, KernelError> {
        Ok(self.normalize(s)?.pieces().iter().map(Piece::area).sum())
    }

    /// True when `region` lies within `material` up to [`AREA_EPS`].
    pub fn covers(&self, material: &ShapeSet, region: &ShapeSet) -> Result<bool, KernelError> {
        let rest = self.subtract(region, material)?;
        Ok(rest.pieces().iter().map(Piece::area).sum::<f64>() < AREA_EPS)
    }

    /// True when the sets share area.
    pub fn overlaps(&self, a: &ShapeSet, b: &ShapeSet) -> bool {
        a.pieces()
            .iter()
            .any(|p| b.pieces().iter().any(|q| p.intersect(q).is_some()))
    }

    /// Grow (positive `d`) or shrink (negative `d`) a set by mitered offset.
    pub fn bloat(&self, s: &ShapeSet, d: f64, mode: BloatMode) -> Result<ShapeSet, KernelError> {
        let grown = if d >= 0.0 {
            let pieces: Vec<Piece> = s.pieces().iter().filter_map(|p| p.offset(d)).collect();
            self.check(pieces.len())?;
            ShapeSet::from_pieces(pieces)
        } else {
            self.erode(s, -d)?
        };
        match mode {
            BloatMode::Area => Ok(grown),
            BloatMode::Edge if d >= 0.0 => self.subtract(&grown, s),
            BloatMode::Edge => self.subtract(s, &grown),
        }
    }

    fn erode(&self, s: &ShapeSet, d: f64) -> Result<ShapeSet, KernelError> {
        let Some(ext) = s.extent() else {
            return Ok(ShapeSet::new());
        };
        let window = ext.expand(2.0 * d + 1.0);
        let frame = Piece::rect(window.min.x, window.min.y, window.max.x, window.max.y)
            .map(|p| ShapeSet::from_pieces(vec![p]))
            .unwrap_or_default();
        let outside = self.subtract(&frame, s)?;
        let grown = self.bloat(&outside, d, BloatMode::Area)?;
        self.subtract(s, &grown)
    }

    /// Groups of piece indices whose pieces overlap or abut.
    pub fn connected_groups(&self, s: &ShapeSet) -> Vec<Vec<usize>> {
        let n = s.len();
        let mut parent: Vec<usize> = (0..n).collect();
        fn find(parent: &mut [usize], mut i: usize) -> usize {
            while parent[i] != i {
                parent[i] = parent[parent[i]];
                i = parent[i];
            }
            i
        }
        let grown: Vec<Option<Piece>> = s.pieces().iter().map(|p| p.offset(0.5)).collect();
        for i in 0..n {
            for j in (i + 1)..n {
                let touching = match &grown[i] {
                    Some(g) => g.intersect(&s.pieces()[j]).is_some(),
                    None => false,
                };
                if touching {
                    let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                    if ri != rj {
                        parent[rj] = ri;
                    }
                }
            }
        }
        let mut groups: Vec<Vec<usize>> = Vec::new();
        let mut slot = vec![usize::MAX; n];
        for i in 0..n {
            let r = find(&mut parent, i);
            if slot[r] == usize::MAX {
                slot[r] = groups.len();
                groups.push(Vec::new());
            }
            groups[slot[r]].push(i);
        }
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x0: i64, y0: i64, x1: i64, y1: i64) -> Vec<Point> {
        BBox::from_coords(x0, y0, x1, y1).corners().to_vec()
    }

    #[test]
    fn test_zoids_of_l_shape_cover_its_area() {
        let kernel = Kernel::default();
        let ring = vec![
            Point::new(0, 0),
            Point::new(20, 0),
            Point::new(20, 5),
            Point::new(5, 5),
            Point::new(5, 20),
            Point::new(0, 20),
        ];
        let zoids = kernel.zoids(&[&ring]).unwrap();
        assert_eq!(zoids.len(), 2);
        assert!((kernel.area(&zoids).unwrap() - 175.0).abs() < 1e-9);
    }

    #[test]
    fn test_zoids_with_hole() {
        let kernel = Kernel::default();
        let outer = square(0, 0, 30, 30);
        let hole = square(10, 10, 20, 20);
        let zoids = kernel.zoids(&[&outer, &hole]).unwrap();
        assert!((kernel.area(&zoids).unwrap() - 800.0).abs() < 1e-9);
    }

    #[test]
    fn test_subtract_and_cover() {
        let kernel = Kernel::default();
        let a = kernel.zoids(&[&square(0, 0, 10, 10)]).unwrap();
        let b = kernel.zoids(&[&square(5, 0, 15, 10)]).unwrap();
        let diff = kernel.subtract(&a, &b).unwrap();
        assert!((kernel.area(&diff).unwrap() - 50.0).abs() < 1e-9);
        let both = kernel.union(&a, &b).unwrap();
        assert!((kernel.area(&both).unwrap() - 150.0).abs() < 1e-9);
        let region = ShapeSet::from_bbox(&BBox::from_coords(2, 2, 12, 8));
        assert!(kernel.covers(&both, &region).unwrap());
        assert!(!kernel.covers(&a, &region).unwrap());
    }

    #[test]
    fn test_bloat_and_erode_rectangle() {
        let kernel = Kernel::default();
        let s = kernel.zoids(&[&square(0, 0, 10, 4)]).unwrap();
        let grown = kernel.bloat(&s, 2.0, BloatMode::Area).unwrap();
        assert!((kernel.area(&grown).unwrap() - 14.0 * 8.0).abs() < 1e-6);
        let shrunk = kernel.bloat(&s, -1.0, BloatMode::Area).unwrap();
        assert!((kernel.area(&shrunk).unwrap() - 8.0 * 2.0).abs() < 1e-6);
        let gone = kernel.bloat(&s, -2.5, BloatMode::Area).unwrap();
        assert!(kernel.area(&gone).unwrap() < AREA_EPS);
        let band = kernel.bloat(&s, 1.0, BloatMode::Edge).unwrap();
        assert!((kernel.area(&band).unwrap() - (12.0 * 6.0 - 40.0)).abs() < 1e-6);
    }

    #[test]
    fn test_piece_limit_is_reported() {
        let kernel = Kernel::new(1);
        let a = kernel.zoids(&[&square(0, 0, 10, 10)]).unwrap();
        let b = ShapeSet::from_bbox(&BBox::from_coords(3, 3, 6, 6));
        let err = kernel.subtract(&a, &b).unwrap_err();
        assert!(matches!(err, KernelError::TooComplex { limit: 1, .. }));
    }

    #[test]
    fn test_connected_groups() {
        let kernel = Kernel::default();
        let mut s = ShapeSet::from_bbox(&BBox::from_coords(0, 0, 10, 10));
        s.extend(ShapeSet::from_bbox(&BBox::from_coords(10, 0, 20, 10)));
        s.extend(ShapeSet::from_bbox(&BBox::from_coords(40, 0, 50, 10)));
        let groups = kernel.connected_groups(&s);
        assert_eq!(groups, vec![vec![0, 1], vec![2]]);
    }
}

//! Boundary walker: edges in order, corner classification and orientation codes.

use std::fmt;

use opensilicon_core::geometry::ring_signed_area2;
use opensilicon_core::kernel::Vec2;
use opensilicon_core::{BBox, Coord, Point};

use crate::error::ParseError;

pub const DEFAULT_CORNER_ANGLE: u32 = 140;
pub const MIN_CORNER_ANGLE: u32 = 91;
pub const MAX_CORNER_ANGLE: u32 = 179;

const DIR_EPS: f64 = 1e-9;

/// Which side of a ring the material lies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    /// Material inside the ring; walked counter-clockwise.
    Outer,
    /// Material outside the ring; walked clockwise.
    Hole,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CornerKind {
    Convex,
    Concave,
    Straight,
}

/// Direction an edge faces, by its outward normal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Orientation {
    Left,
    Bottom,
    Right,
    Top,
    DiagLowerLeft,
    DiagLowerRight,
    DiagUpperRight,
    DiagUpperLeft,
}

impl Orientation {
    pub fn from_outward(n: Vec2) -> Orientation {
        if n.x.abs() < DIR_EPS {
            if n.y < 0.0 {
                Orientation::Bottom
            } else {
                Orientation::Top
            }
        } else if n.y.abs() < DIR_EPS {
            if n.x < 0.0 {
                Orientation::Left
            } else {
                Orientation::Right
            }
        } else {
            match (n.x > 0.0, n.y > 0.0) {
                (false, false) => Orientation::DiagLowerLeft,
                (true, false) => Orientation::DiagLowerRight,
                (true, true) => Orientation::DiagUpperRight,
                (false, true) => Orientation::DiagUpperLeft,
            }
        }
    }

    pub fn is_manhattan(self) -> bool {
        matches!(
            self,
            Orientation::Left | Orientation::Bottom | Orientation::Right | Orientation::Top
        )
    }
}

/// Set of orientations used to select edges: letters `L B R T` and `D` for
/// any diagonal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrientMask(u8);

impl OrientMask {
    const LETTERS: [(char, u8); 5] = [('L', 1), ('B', 2), ('R', 4), ('T', 8), ('D', 16)];

    pub fn all() -> Self {
        Self(31)
    }

    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let mut bits = 0;
        for c in text.chars() {
            let (_, bit) = Self::LETTERS
                .iter()
                .find(|(l, _)| l.eq_ignore_ascii_case(&c))
                .ok_or_else(|| ParseError::Syntax {
                    line: 0,
                    message: format!("bad orientation letter '{c}' in '{text}'"),
                })?;
            bits |= bit;
        }
        if bits == 0 {
            return Err(ParseError::Syntax {
                line: 0,
                message: "empty orientation mask".to_string(),
            });
        }
        Ok(Self(bits))
    }

    pub fn contains(&self, o: Orientation) -> bool {
        let bit = match o {
            Orientation::Left => 1,
            Orientation::Bottom => 2,
            Orientation::Right => 4,
            Orientation::Top => 8,
            _ => 16,
        };
        self.0 & bit != 0
    }
}

impl fmt::Display for OrientMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (letter, bit) in Self::LETTERS {
            if self.0 & bit != 0 {
                write!(f, "{letter}")?;
            }
        }
        Ok(())
    }
}

/// Wire geometry needed to decide which corner tests may be skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireInfo {
    pub width: Coord,
    pub ends: [Point; 2],
}

/// One boundary edge with its flanking vertices.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeView {
    pub index: usize,
    pub prev: Point,
    pub start: Point,
    pub end: Point,
    pub next: Point,
    pub orientation: Orientation,
    /// Interior angle at `start`, in degrees, measured through the material.
    pub start_angle: f64,
    pub end_angle: f64,
    pub start_corner: CornerKind,
    pub end_corner: CornerKind,
}

impl EdgeView {
    pub fn length(&self) -> f64 {
        self.start.distance_to(&self.end)
    }

    /// Unit direction of travel.
    pub fn dir(&self) -> Vec2 {
        (Vec2::from(self.end) - Vec2::from(self.start)).normalized()
    }

    /// Unit normal pointing away from the material.
    pub fn outward(&self) -> Vec2 {
        self.dir().perp_right()
    }

    pub fn inward(&self) -> Vec2 {
        self.dir().perp_left()
    }

    pub fn is_manhattan(&self) -> bool {
        self.orientation.is_manhattan()
    }

    pub fn bbox(&self) -> BBox {
        BBox::new(self.start, self.end)
    }
}

/// Edge-test results carried between consecutive edges so a corner test can
/// be skipped when either adjacent edge already failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CornerCarry {
    prev_failed: bool,
    first_failed: bool,
    pub tested: usize,
    pub failed: usize,
}

impl CornerCarry {
    /// Record edge `index`; returns true when the corner at the edge start
    /// should still be tested.
    pub fn record(&mut self, index: usize, failed: bool) -> bool {
        if index == 0 {
            self.first_failed = failed;
        }
        let test_corner = index > 0 && !self.prev_failed && !failed;
        self.prev_failed = failed;
        self.tested += 1;
        if failed {
            self.failed += 1;
        }
        test_corner
    }

    /// Whether the closing corner (last edge into first) should be tested.
    pub fn closing_corner(&self) -> bool {
        !self.prev_failed && !self.first_failed
    }
}

/// Per-object traversal state. A fresh cursor is made for every object.
#[derive(Debug, Clone)]
pub struct EdgeCursor {
    ring: Vec<Point>,
    clockwise: bool,
    pass: usize,
    corner_angle: f64,
    wire: Option<WireInfo>,
    candidates: Vec<BBox>,
    last: bool,
}

impl EdgeCursor {
    /// `None` when the ring has fewer than three distinct vertices.
    pub fn new(ring: &[Point], boundary: Boundary, corner_angle: u32) -> Option<EdgeCursor> {
        let mut ring = opensilicon_core::geometry::simplify_ring(ring);
        if ring.len() < 3 {
            return None;
        }
        let area2 = ring_signed_area2(&ring);
        let clockwise = boundary == Boundary::Hole;
        if (area2 < 0) != clockwise {
            ring.reverse();
        }
        Some(EdgeCursor {
            ring,
            clockwise,
            pass: 0,
            corner_angle: corner_angle.clamp(MIN_CORNER_ANGLE, MAX_CORNER_ANGLE) as f64,
            wire: None,
            candidates: Vec::new(),
            last: false,
        })
    }

    pub fn with_wire(mut self, wire: Option<WireInfo>) -> Self {
        self.wire = wire;
        self
    }

    pub fn ring(&self) -> &[Point] {
        &self.ring
    }

    pub fn edge_count(&self) -> usize {
        self.ring.len()
    }

    pub fn is_clockwise(&self) -> bool {
        self.clockwise
    }

    /// Edges produced so far.
    pub fn pass(&self) -> usize {
        self.pass
    }

    /// True once the final edge has been produced.
    pub fn is_last(&self) -> bool {
        self.last
    }

    pub fn push_candidate(&mut self, bbox: BBox) {
        self.candidates.push(bbox);
    }

    pub fn take_candidates(&mut self) -> Vec<BBox> {
        std::mem::take(&mut self.candidates)
    }

    /// Interior angle at vertex `i`, in degrees within (0, 360).
    pub fn interior_angle(&self, i: usize) -> f64 {
        let n = self.ring.len();
        let a = Vec2::from(self.ring[(i + n - 1) % n]);
        let b = Vec2::from(self.ring[i]);
        let c = Vec2::from(self.ring[(i + 1) % n]);
        let (u, v) = (b - a, c - b);
        let turn = u.cross(v).atan2(u.dot(v)).to_degrees();
        180.0 - turn
    }

    pub fn classify(&self, angle: f64) -> CornerKind {
        if angle < self.corner_angle {
            CornerKind::Convex
        } else if angle > 360.0 - self.corner_angle {
            CornerKind::Concave
        } else {
            CornerKind::Straight
        }
    }

    /// Wires of at least `dimension` width need no width test along their
    /// sides; only the end caps are tested.
    pub fn can_skip(&self, edge: &EdgeView, dimension: Coord) -> bool {
        let Some(wire) = self.wire else {
            return false;
        };
        if wire.width < dimension {
            return false;
        }
        let mid = (Vec2::from(edge.start) + Vec2::from(edge.end)) * 0.5;
        wire.ends
            .iter()
            .all(|e| (mid - Vec2::from(*e)).length() > 1.0)
    }
}

impl Iterator for EdgeCursor {
    type Item = EdgeView;

    fn next(&mut self) -> Option<EdgeView> {
        let n = self.ring.len();
        if self.pass >= n {
            return None;
        }
        let i = self.pass;
        self.pass += 1;
        self.last = self.pass == n;
        let j = (i + 1) % n;
        let start_angle = self.interior_angle(i);
        let end_angle = self.interior_angle(j);
        let start = self.ring[i];
        let end = self.ring[j];
        let dir = (Vec2::from(end) - Vec2::from(start)).normalized();
        Some(EdgeView {
            index: i,
            prev: self.ring[(i + n - 1) % n],
            start,
            end,
            next: self.ring[(j + 1) % n],
            orientation: Orientation::from_outward(dir.perp_right()),
            start_angle,
            end_angle,
            start_corner: self.classify(start_angle),
            end_corner: self.classify(end_angle),
        })
    }
}

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geometry::{BBox, GeomPrimitive, Point};
use crate::LayerId;

/// Unique cell identifier.
pub type CellId = Uuid;

/// Rotation of a placed instance, counter-clockwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    R0,
    R90,
    R180,
    R270,
}

/// A Manhattan transformation for placing subcell instances.
///
/// Applied as mirror about X (optional), then rotation, then translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Transform {
    /// Translation offset.
    pub offset: Point,
    #[serde(default)]
    pub rotation: Rotation,
    /// Mirror about X axis.
    #[serde(default)]
    pub mirror_x: bool,
}

impl Transform {
    pub fn translate(x: i64, y: i64) -> Self {
        Self {
            offset: Point::new(x, y),
            ..Default::default()
        }
    }

    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn mirrored(mut self) -> Self {
        self.mirror_x = true;
        self
    }

    pub fn apply(&self, point: &Point) -> Point {
        self.to_affine().apply(point)
    }

    pub fn to_affine(&self) -> Affine {
        let (c, s) = match self.rotation {
            Rotation::R0 => (1, 0),
            Rotation::R90 => (0, 1),
            Rotation::R180 => (-1, 0),
            Rotation::R270 => (0, -1),
        };
        let m = if self.mirror_x { -1 } else { 1 };
        Affine {
            a: c,
            b: -s * m,
            c: s,
            d: c * m,
            tx: self.offset.x,
            ty: self.offset.y,
        }
    }
}

/// Integer 2x3 matrix; composition of instance transforms down a hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Affine {
    a: i64,
    b: i64,
    c: i64,
    d: i64,
    tx: i64,
    ty: i64,
}

impl Default for Affine {
    fn default() -> Self {
        Self::identity()
    }
}

impl Affine {
    pub fn identity() -> Self {
        Self {
            a: 1,
            b: 0,
            c: 0,
            d: 1,
            tx: 0,
            ty: 0,
        }
    }

    pub fn apply(&self, p: &Point) -> Point {
        Point::new(
            self.a * p.x + self.b * p.y + self.tx,
            self.c * p.x + self.d * p.y + self.ty,
        )
    }

    /// `self` applied after `inner`.
    pub fn compose(&self, inner: &Affine) -> Affine {
        Affine {
            a: self.a * inner.a + self.b * inner.c,
            b: self.a * inner.b + self.b * inner.d,
            c: self.c * inner.a + self.d * inner.c,
            d: self.c * inner.b + self.d * inner.d,
            tx: self.a * inner.tx + self.b * inner.ty + self.tx,
            ty: self.c * inner.tx + self.d * inner.ty + self.ty,
        }
    }

    /// True when the transform reverses winding.
    pub fn is_mirroring(&self) -> bool {
        self.a * self.d - self.b * self.c < 0
    }

    pub fn apply_primitive(&self, geom: &GeomPrimitive) -> GeomPrimitive {
        match geom {
            GeomPrimitive::Rect(r) => {
                let p = self.apply(&r.lower_left);
                let q = self.apply(&r.upper_right);
                let mut out = crate::geometry::Rect::new(r.layer_id, p.x, p.y, q.x, q.y);
                out.net = r.net.clone();
                GeomPrimitive::Rect(out)
            }
            GeomPrimitive::Polygon(poly) => {
                let mut out = poly.clone();
                out.vertices = poly.vertices.iter().map(|v| self.apply(v)).collect();
                GeomPrimitive::Polygon(out)
            }
            GeomPrimitive::Path(path) => {
                let mut out = path.clone();
                out.points = path.points.iter().map(|v| self.apply(v)).collect();
                GeomPrimitive::Path(out)
            }
        }
    }
}

/// A reference to a subcell placed within a parent cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellInstance {
    pub id: Uuid,
    pub cell_id: CellId,
    pub instance_name: String,
    #[serde(default)]
    pub transform: Transform,
}

impl CellInstance {
    pub fn new(cell_id: CellId, instance_name: &str, transform: Transform) -> Self {
        Self {
            id: Uuid::new_v4(),
            cell_id,
            instance_name: instance_name.to_string(),
            transform,
        }
    }
}

/// A layout cell containing geometric primitives and subcell references.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cell {
    pub id: CellId,
    pub name: String,
    #[serde(default)]
    pub geometries: Vec<GeomPrimitive>,
    #[serde(default)]
    pub instances: Vec<CellInstance>,
    #[serde(skip)]
    pub modified: bool,
}

impl Cell {
    pub fn new(name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            geometries: Vec::new(),
            instances: Vec::new(),
            modified: false,
        }
    }

    pub fn add_geometry(&mut self, geom: GeomPrimitive) {
        self.geometries.push(geom);
        self.modified = true;
    }

    pub fn remove_geometry(&mut self, index: usize) -> Option<GeomPrimitive> {
        if index < self.geometries.len() {
            self.modified = true;
            Some(self.geometries.remove(index))
        } else {
            None
        }
    }

    pub fn add_instance(&mut self, instance: CellInstance) {
        self.instances.push(instance);
        self.modified = true;
    }

    /// Compute the bounding box of all geometry in this cell (not including subcells).
    pub fn local_bbox(&self) -> Option<BBox> {
        self.geometries
            .iter()
            .filter_map(|g| g.bbox())
            .reduce(|acc, bb| acc.union(&bb))
    }

    /// Get all geometries on a specific layer.
    pub fn geometries_on_layer(&self, layer_id: LayerId) -> Vec<&GeomPrimitive> {
        self.geometries
            .iter()
            .filter(|g| g.layer_id() == layer_id)
            .collect()
    }

    pub fn geometry_count(&self) -> usize {
        self.geometries.len()
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rect;

    #[test]
    fn test_cell_add_geometry() {
        let mut cell = Cell::new("test_cell");
        cell.add_geometry(GeomPrimitive::Rect(Rect::new(0, 0, 0, 100, 50)));
        assert_eq!(cell.geometry_count(), 1);
        assert!(cell.modified);
    }

    #[test]
    fn test_cell_bbox() {
        let mut cell = Cell::new("test_cell");
        cell.add_geometry(GeomPrimitive::Rect(Rect::new(0, 0, 0, 100, 50)));
        cell.add_geometry(GeomPrimitive::Rect(Rect::new(1, 50, 25, 200, 75)));
        assert_eq!(cell.local_bbox(), Some(BBox::from_coords(0, 0, 200, 75)));
    }

    #[test]
    fn test_transform_translate() {
        let t = Transform::translate(10, 20);
        assert_eq!(t.apply(&Point::new(5, 5)), Point::new(15, 25));
    }

    #[test]
    fn test_rotation_and_mirror() {
        let r90 = Transform::default().with_rotation(Rotation::R90);
        assert_eq!(r90.apply(&Point::new(10, 0)), Point::new(0, 10));
        let mx = Transform::default().mirrored();
        assert_eq!(mx.apply(&Point::new(3, 4)), Point::new(3, -4));
        assert!(mx.to_affine().is_mirroring());
        // mirror first, then rotate
        let both = Transform::translate(1, 1)
            .with_rotation(Rotation::R90)
            .mirrored();
        assert_eq!(both.apply(&Point::new(3, 4)), Point::new(5, 4));
    }

    #[test]
    fn test_affine_compose() {
        let outer = Transform::translate(100, 0).to_affine();
        let inner = Transform::default().with_rotation(Rotation::R180).to_affine();
        let full = outer.compose(&inner);
        assert_eq!(full.apply(&Point::new(5, 5)), Point::new(95, -5));
    }
}

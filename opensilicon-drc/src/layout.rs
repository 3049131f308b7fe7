//! Flattened view of a cell: objects per layer with spatial lookup and
//! same-layer connectivity.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use opensilicon_core::geometry::simplify_ring;
use opensilicon_core::spatial::{SpatialEntry, SpatialIndex};
use opensilicon_core::{
    BBox, BloatMode, CellId, GeomPrimitive, Kernel, KernelError, LayoutDatabase, ShapeSet,
};

use crate::error::DrcError;
use crate::layer_expr::MaterialSource;
use crate::walker::WireInfo;

/// One primitive of the checked cell, in top-cell coordinates.
#[derive(Debug, Clone)]
pub struct FlatObject {
    /// Position in the flattened cell; stable across partitions.
    pub index: usize,
    pub layer: String,
    pub geom: GeomPrimitive,
    pub outline: Vec<opensilicon_core::Point>,
    pub bbox: BBox,
    pub net: Option<String>,
    pub wire: Option<WireInfo>,
    /// Instance names from the checked cell down to the owning cell.
    pub instance_path: Vec<String>,
    pieces: ShapeSet,
}

impl FlatObject {
    pub fn pieces(&self) -> &ShapeSet {
        &self.pieces
    }

    pub fn is_top_level(&self) -> bool {
        self.instance_path.is_empty()
    }

    pub fn is_manhattan(&self) -> bool {
        let n = self.outline.len();
        (0..n).all(|i| {
            let (a, b) = (self.outline[i], self.outline[(i + 1) % n]);
            a.x == b.x || a.y == b.y
        })
    }
}

/// Layer name for a layer id, falling back to `L<id>` for ids missing from the stack.
pub fn layer_name(db: &LayoutDatabase, id: opensilicon_core::LayerId) -> String {
    db.layer_stack
        .name_of(id)
        .map(str::to_string)
        .unwrap_or_else(|| format!("L{id}"))
}

/// Flatten `cell_id` into checkable objects. Primitives without area are skipped.
pub fn flatten_objects(
    db: &LayoutDatabase,
    cell_id: &CellId,
    kernel: &Kernel,
) -> Result<Vec<FlatObject>, DrcError> {
    let flat = db.flatten(cell_id)?;
    let mut objects = Vec::with_capacity(flat.len());
    for (index, item) in flat.into_iter().enumerate() {
        let outline = simplify_ring(&item.geom.outline());
        let Some(bbox) = BBox::from_points(&outline) else {
            log::warn!("skipping primitive {index} without area");
            continue;
        };
        let pieces = kernel.zoids(&[&outline])?;
        if pieces.is_empty() {
            log::warn!("skipping degenerate primitive {index}");
            continue;
        }
        let wire = match &item.geom {
            GeomPrimitive::Path(p) => match (p.points.first(), p.points.last()) {
                (Some(first), Some(last)) => Some(WireInfo {
                    width: p.width,
                    ends: [*first, *last],
                }),
                _ => None,
            },
            _ => None,
        };
        objects.push(FlatObject {
            index,
            layer: layer_name(db, item.geom.layer_id()),
            net: item.geom.net().map(str::to_string),
            outline,
            bbox,
            wire,
            instance_path: item.instance_path,
            geom: item.geom,
            pieces,
        });
    }
    Ok(objects)
}

struct LayerObjects {
    members: Vec<usize>,
    index: SpatialIndex,
}

/// Objects grouped by layer for neighborhood queries.
pub struct FlatLayout {
    kernel: Kernel,
    objects: Vec<FlatObject>,
    layers: HashMap<String, LayerObjects>,
    positions: HashMap<usize, usize>,
    known: HashSet<String>,
    groups: RefCell<HashMap<String, Rc<Vec<Vec<usize>>>>>,
}

impl FlatLayout {
    /// `known_layers` are names that resolve even when they hold no objects.
    pub fn new<I, S>(kernel: Kernel, objects: Vec<FlatObject>, known_layers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut members: HashMap<String, Vec<usize>> = HashMap::new();
        for (pos, obj) in objects.iter().enumerate() {
            members.entry(obj.layer.clone()).or_default().push(pos);
        }
        let mut known: HashSet<String> = known_layers.into_iter().map(Into::into).collect();
        let layers = members
            .into_iter()
            .map(|(name, members)| {
                let entries = members
                    .iter()
                    .map(|&pos| SpatialEntry {
                        index: pos,
                        bbox: objects[pos].bbox,
                    })
                    .collect();
                known.insert(name.clone());
                (
                    name,
                    LayerObjects {
                        members,
                        index: SpatialIndex::build(entries),
                    },
                )
            })
            .collect();
        let positions = objects.iter().enumerate().map(|(pos, o)| (o.index, pos)).collect();
        Self {
            kernel,
            objects,
            layers,
            positions,
            known,
            groups: RefCell::new(HashMap::new()),
        }
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub fn objects(&self) -> &[FlatObject] {
        &self.objects
    }

    pub fn object(&self, pos: usize) -> &FlatObject {
        &self.objects[pos]
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn has_layer(&self, layer: &str) -> bool {
        self.known.contains(layer)
    }

    /// Positions of objects on `layer`, in flattening order.
    pub fn layer_objects(&self, layer: &str) -> &[usize] {
        self.layers
            .get(layer)
            .map(|l| l.members.as_slice())
            .unwrap_or(&[])
    }

    /// Positions of objects on `layer` whose bbox touches `window`.
    pub fn neighbors(&self, layer: &str, window: &BBox) -> Vec<usize> {
        self.layers
            .get(layer)
            .map(|l| l.index.query_area(window))
            .unwrap_or_default()
    }

    /// Positions of objects on any layer whose bbox touches `window`, ascending.
    pub fn touching(&self, window: &BBox) -> Vec<usize> {
        let mut out: Vec<usize> = self
            .layers
            .values()
            .flat_map(|l| l.index.query_area(window))
            .collect();
        out.sort_unstable();
        out
    }

    /// Union of the objects on `layer` near `window` that satisfy `keep`.
    pub fn material_where(
        &self,
        layer: &str,
        window: &BBox,
        keep: impl Fn(&FlatObject) -> bool,
    ) -> Result<ShapeSet, KernelError> {
        let mut out = ShapeSet::new();
        for pos in self.neighbors(layer, window) {
            let obj = &self.objects[pos];
            if keep(obj) {
                out = self.kernel.union(&out, obj.pieces())?;
            }
        }
        Ok(out)
    }

    /// Connected components of `layer`; abutting or overlapping objects join.
    /// Each group lists object positions in ascending order.
    pub fn groups(&self, layer: &str) -> Result<Rc<Vec<Vec<usize>>>, KernelError> {
        if let Some(cached) = self.groups.borrow().get(layer) {
            return Ok(Rc::clone(cached));
        }
        let members = self.layer_objects(layer);
        let slot: HashMap<usize, usize> =
            members.iter().enumerate().map(|(i, &pos)| (pos, i)).collect();
        let mut parent: Vec<usize> = (0..members.len()).collect();
        fn find(parent: &mut [usize], mut i: usize) -> usize {
            while parent[i] != i {
                parent[i] = parent[parent[i]];
                i = parent[i];
            }
            i
        }
        for (i, &pos) in members.iter().enumerate() {
            let obj = &self.objects[pos];
            let grown = self.kernel.bloat(obj.pieces(), 0.5, BloatMode::Area)?;
            for other in self.neighbors(layer, &obj.bbox.expand(1)) {
                let j = slot[&other];
                if j <= i || find(&mut parent, i) == find(&mut parent, j) {
                    continue;
                }
                if self.kernel.overlaps(&grown, self.objects[other].pieces()) {
                    let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                    parent[ri.max(rj)] = ri.min(rj);
                }
            }
        }
        let mut by_root: HashMap<usize, Vec<usize>> = HashMap::new();
        for (i, &pos) in members.iter().enumerate() {
            by_root.entry(find(&mut parent, i)).or_default().push(pos);
        }
        let mut groups: Vec<Vec<usize>> = by_root.into_values().collect();
        for g in &mut groups {
            g.sort_unstable();
        }
        groups.sort_unstable_by_key(|g| g[0]);
        let groups = Rc::new(groups);
        self.groups
            .borrow_mut()
            .insert(layer.to_string(), Rc::clone(&groups));
        Ok(groups)
    }

    /// Positions of the group containing `obj`.
    pub fn group_of(&self, obj: &FlatObject) -> Result<Vec<usize>, KernelError> {
        let Some(pos) = self.position_of(obj.index) else {
            return Ok(Vec::new());
        };
        let groups = self.groups(&obj.layer)?;
        Ok(groups
            .iter()
            .find(|g| g.binary_search(&pos).is_ok())
            .cloned()
            .unwrap_or_else(|| vec![pos]))
    }

    /// Position of the object with flattened index `index`.
    pub fn position_of(&self, index: usize) -> Option<usize> {
        self.positions.get(&index).copied()
    }
}

impl MaterialSource for FlatLayout {
    fn material(&self, layer: &str, window: &BBox) -> Result<Option<ShapeSet>, KernelError> {
        if !self.has_layer(layer) {
            return Ok(None);
        }
        self.material_where(layer, window, |_| true).map(Some)
    }

    fn kernel(&self) -> &Kernel {
        &self.kernel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opensilicon_core::{Cell, CellInstance, Layer, Path, Point, Rect, Transform};

    fn db_with(rects: &[(u32, i64, i64, i64, i64)]) -> (LayoutDatabase, CellId) {
        let mut db = LayoutDatabase::new("t");
        db.layer_stack.add_layer(Layer::new(1, "M1", 68, 20));
        db.layer_stack.add_layer(Layer::new(2, "M2", 69, 20));
        let mut cell = Cell::new("top");
        for &(layer, x0, y0, x1, y1) in rects {
            cell.add_geometry(GeomPrimitive::Rect(Rect::new(layer, x0, y0, x1, y1)));
        }
        let id = db.add_cell(cell);
        (db, id)
    }

    fn layout(db: &LayoutDatabase, id: &CellId) -> FlatLayout {
        let kernel = Kernel::default();
        let objects = flatten_objects(db, id, &kernel).unwrap();
        let names: Vec<String> = db.layer_stack.all_layers().iter().map(|l| l.name.clone()).collect();
        FlatLayout::new(kernel, objects, names)
    }

    #[test]
    fn test_layers_and_neighbors() {
        let (db, id) = db_with(&[(1, 0, 0, 10, 10), (1, 50, 0, 60, 10), (3, 0, 0, 5, 5)]);
        let flat = layout(&db, &id);
        assert_eq!(flat.layer_objects("M1").len(), 2);
        assert_eq!(flat.layer_objects("L3").len(), 1);
        assert!(flat.has_layer("M2"));
        assert!(!flat.has_layer("POLY"));
        assert_eq!(flat.neighbors("M1", &BBox::from_coords(8, 0, 12, 4)), vec![0]);
        assert_eq!(flat.touching(&BBox::from_coords(4, 4, 12, 8)), vec![0, 2]);
        let empty = flat.material("M2", &BBox::from_coords(0, 0, 10, 10)).unwrap();
        assert!(empty.unwrap().is_empty());
        assert!(flat.material("POLY", &BBox::from_coords(0, 0, 1, 1)).unwrap().is_none());
    }

    #[test]
    fn test_groups_join_abutting_objects() {
        let (db, id) = db_with(&[
            (1, 0, 0, 10, 10),
            (1, 40, 0, 50, 10),
            (1, 10, 0, 20, 10),
            (1, 20, 5, 25, 6),
        ]);
        let flat = layout(&db, &id);
        let groups = flat.groups("M1").unwrap();
        assert_eq!(*groups, vec![vec![0, 2, 3], vec![1]]);
        assert_eq!(flat.group_of(flat.object(3)).unwrap(), vec![0, 2, 3]);
    }

    #[test]
    fn test_instances_and_wires_are_flattened() {
        let mut db = LayoutDatabase::new("t");
        db.layer_stack.add_layer(Layer::new(1, "M1", 68, 20));
        let mut leaf = Cell::new("leaf");
        leaf.add_geometry(GeomPrimitive::Path(Path::new(
            1,
            vec![Point::new(0, 0), Point::new(100, 0)],
            10,
        )));
        let mut top = Cell::new("top");
        top.add_instance(CellInstance::new(leaf.id, "w0", Transform::translate(0, 50)));
        let top_id = db.add_cell(top);
        db.add_cell(leaf);
        let flat = layout(&db, &top_id);
        let wire = flat.object(0);
        assert_eq!(wire.bbox, BBox::from_coords(0, 45, 100, 55));
        assert_eq!(wire.instance_path, vec!["w0".to_string()]);
        assert!(!wire.is_top_level());
        assert_eq!(wire.wire.unwrap().ends, [Point::new(0, 50), Point::new(100, 50)]);
        assert!(wire.is_manhattan());
    }
}

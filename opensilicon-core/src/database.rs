use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::cell::{Affine, Cell, CellId};
use crate::geometry::GeomPrimitive;
use crate::layer::LayerStack;

#[derive(Error, Debug)]
pub enum LayoutError {
    #[error("cell not found: {0}")]
    CellNotFound(String),

    #[error("instance hierarchy contains a cycle through cell {0}")]
    CyclicHierarchy(String),

    #[error("layout JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A primitive brought into the coordinate space of the cell being flattened.
#[derive(Debug, Clone)]
pub struct FlatGeometry {
    pub geom: GeomPrimitive,
    /// Instance names from the flattened cell down to the owning cell; empty for
    /// geometry of the cell itself.
    pub instance_path: Vec<String>,
    /// Cell that owns the primitive.
    pub cell_id: CellId,
}

/// The central layout database that holds all cells and the technology layer stack.
#[derive(Debug, Serialize, Deserialize)]
pub struct LayoutDatabase {
    /// Database identifier.
    pub id: Uuid,
    /// Project name.
    pub name: String,
    /// Technology layers.
    #[serde(default)]
    pub layer_stack: LayerStack,
    /// All cells indexed by ID.
    cells: HashMap<CellId, Cell>,
    /// Top-level cell (entry point for hierarchy).
    pub top_cell: Option<CellId>,
}

impl LayoutDatabase {
    pub fn new(name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            layer_stack: LayerStack::new(),
            cells: HashMap::new(),
            top_cell: None,
        }
    }

    // ── Cell management ──────────────────────────────────────────────

    pub fn add_cell(&mut self, cell: Cell) -> CellId {
        let id = cell.id;
        self.cells.insert(id, cell);
        if self.top_cell.is_none() {
            self.top_cell = Some(id);
        }
        id
    }

    pub fn get_cell(&self, id: &CellId) -> Option<&Cell> {
        self.cells.get(id)
    }

    pub fn get_cell_mut(&mut self, id: &CellId) -> Option<&mut Cell> {
        self.cells.get_mut(id)
    }

    pub fn remove_cell(&mut self, id: &CellId) -> Option<Cell> {
        if self.top_cell == Some(*id) {
            self.top_cell = None;
        }
        self.cells.remove(id)
    }

    pub fn find_cell_by_name(&self, name: &str) -> Option<&Cell> {
        self.cells.values().find(|c| c.name == name)
    }

    /// Cell names in sorted order.
    pub fn cell_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.cells.values().map(|c| c.name.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn all_cells(&self) -> impl Iterator<Item = &Cell> {
        self.cells.values()
    }

    // ── Hierarchy ────────────────────────────────────────────────────

    /// Every primitive of `cell_id` and its subcells, transformed into the
    /// coordinates of `cell_id`.
    pub fn flatten(&self, cell_id: &CellId) -> Result<Vec<FlatGeometry>, LayoutError> {
        let mut out = Vec::new();
        let mut stack = Vec::new();
        let mut path = Vec::new();
        self.flatten_into(cell_id, &Affine::identity(), &mut stack, &mut path, &mut out)?;
        log::debug!("flattened cell {} into {} primitives", cell_id, out.len());
        Ok(out)
    }

    fn flatten_into(
        &self,
        cell_id: &CellId,
        xform: &Affine,
        stack: &mut Vec<CellId>,
        path: &mut Vec<String>,
        out: &mut Vec<FlatGeometry>,
    ) -> Result<(), LayoutError> {
        let cell = self
            .cells
            .get(cell_id)
            .ok_or_else(|| LayoutError::CellNotFound(cell_id.to_string()))?;
        if stack.contains(cell_id) {
            return Err(LayoutError::CyclicHierarchy(cell.name.clone()));
        }
        stack.push(*cell_id);
        for geom in &cell.geometries {
            out.push(FlatGeometry {
                geom: xform.apply_primitive(geom),
                instance_path: path.clone(),
                cell_id: *cell_id,
            });
        }
        for inst in &cell.instances {
            let inner = xform.compose(&inst.transform.to_affine());
            path.push(inst.instance_name.clone());
            self.flatten_into(&inst.cell_id, &inner, stack, path, out)?;
            path.pop();
        }
        stack.pop();
        Ok(())
    }

    // ── Serialization ────────────────────────────────────────────────

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, LayoutError> {
        Ok(serde_json::from_str(json)?)
    }
}

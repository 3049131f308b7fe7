//! # OpenSilicon Core
//!
//! Core layout database with hierarchical cell management, integer-grid geometric
//! primitives, spatial indexing (R-tree), and the convex-piece geometry kernel used
//! by the rule checker.

pub mod cell;
pub mod database;
pub mod geometry;
pub mod kernel;
pub mod layer;
pub mod spatial;

pub use cell::{Cell, CellId, CellInstance, Rotation, Transform};
pub use database::{FlatGeometry, LayoutDatabase, LayoutError};
pub use geometry::{BBox, Coord, GeomPrimitive, Path, Point, Polygon, Rect};
pub use kernel::{BloatMode, Kernel, KernelError, ShapeSet};
pub use layer::{Layer, LayerId, LayerStack};

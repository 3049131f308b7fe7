use opensilicon_core::{BBox, GeomPrimitive, Point};
use serde::{Deserialize, Serialize};

use crate::layout::FlatObject;
use crate::rule::{Rule, RuleId, RuleType};

/// What kind of failure a violation reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    Width,
    Space,
    EdgeLength,
    Corner,
    Overlap,
    Area,
    HoleTooSmall,
    HoleWidth,
    Connectivity,
    Enclosure,
    EndOfLine,
    User,
}

impl ErrorCode {
    pub fn name(self) -> &'static str {
        match self {
            ErrorCode::Width => "width",
            ErrorCode::Space => "space",
            ErrorCode::EdgeLength => "edge-length",
            ErrorCode::Corner => "corner",
            ErrorCode::Overlap => "overlap",
            ErrorCode::Area => "area",
            ErrorCode::HoleTooSmall => "hole-too-small",
            ErrorCode::HoleWidth => "hole-width",
            ErrorCode::Connectivity => "connectivity",
            ErrorCode::Enclosure => "enclosure",
            ErrorCode::EndOfLine => "end-of-line",
            ErrorCode::User => "user",
        }
    }

    pub fn from_name(s: &str) -> Option<ErrorCode> {
        use ErrorCode::*;
        [
            Width,
            Space,
            EdgeLength,
            Corner,
            Overlap,
            Area,
            HoleTooSmall,
            HoleWidth,
            Connectivity,
            Enclosure,
            EndOfLine,
            User,
        ]
        .into_iter()
        .find(|c| c.name() == s)
    }
}

/// The part of an object a violation refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeRef {
    Edge(usize),
    Vertex(usize),
    /// Every edge of the object failed the same test.
    AllEdges,
    Object,
}

/// A single rule failure on one object, in top-cell coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub rule: RuleId,
    pub rule_type: RuleType,
    /// Flattened index of the failing object.
    pub object: usize,
    region: Vec<Point>,
    pub edge: EdgeRef,
    pub code: ErrorCode,
    pub note: Option<String>,
}

impl Violation {
    /// Regions with more points are replaced by their bounding box.
    pub const MAX_REGION_POINTS: usize = 5;

    pub fn new(
        rule: RuleId,
        rule_type: RuleType,
        object: usize,
        region: Vec<Point>,
        edge: EdgeRef,
        code: ErrorCode,
    ) -> Self {
        let region = if region.len() > Self::MAX_REGION_POINTS {
            BBox::from_points(&region)
                .map(|bb| bb.corners().to_vec())
                .unwrap_or_default()
        } else {
            region
        };
        Self {
            rule,
            rule_type,
            object,
            region,
            edge,
            code,
            note: None,
        }
    }

    pub fn from_bbox(
        rule: RuleId,
        rule_type: RuleType,
        object: usize,
        bbox: &BBox,
        edge: EdgeRef,
        code: ErrorCode,
    ) -> Self {
        Self::new(rule, rule_type, object, bbox.corners().to_vec(), edge, code)
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn region(&self) -> &[Point] {
        &self.region
    }

    pub fn bbox(&self) -> Option<BBox> {
        BBox::from_points(&self.region)
    }

    /// One-line human readable summary.
    pub fn message(&self, rule: &Rule) -> String {
        let what = match self.edge {
            EdgeRef::Edge(i) => format!("edge {i}"),
            EdgeRef::Vertex(i) => format!("corner {i}"),
            EdgeRef::AllEdges => "every edge".to_string(),
            EdgeRef::Object => "object".to_string(),
        };
        let mut msg = format!("{} {} on {} ({})", rule.rule_type(), rule.dimension, what, self.code.name());
        if let Some(note) = &self.note {
            msg.push_str(": ");
            msg.push_str(note);
        }
        msg
    }
}

/// A violation with everything needed to show it outside the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationReport {
    pub rule: RuleId,
    pub rule_type: RuleType,
    pub layer: String,
    pub message: String,
    pub region: Vec<Point>,
    pub bbox: BBox,
    pub edge: EdgeRef,
    pub code: ErrorCode,
    pub object: GeomPrimitive,
    pub object_index: usize,
    pub instance_path: Vec<String>,
    pub description: Option<String>,
}

impl ViolationReport {
    pub fn new(v: &Violation, rule: &Rule, object: &FlatObject) -> Self {
        Self {
            rule: v.rule,
            rule_type: v.rule_type,
            layer: rule.layer.clone(),
            message: v.message(rule),
            region: v.region.clone(),
            bbox: v.bbox().unwrap_or(object.bbox),
            edge: v.edge,
            code: v.code,
            object: object.geom.clone(),
            object_index: object.index,
            instance_path: object.instance_path.clone(),
            description: rule.description.clone(),
        }
    }
}

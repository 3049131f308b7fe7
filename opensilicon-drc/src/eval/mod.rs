//! Per-rule evaluation on flattened objects.
//!
//! Each rule type maps to one test function, chosen once per rule through
//! [`select`]. Edge-based tests share [`walk_edges`], which walks the object
//! outline, clips every edge to the spans that are real boundary of the merged
//! layer material, and threads corner state from one edge to the next.

mod area;
mod edge;
mod overlap;
mod round;
mod space;
mod user;
mod width;

pub use round::{disk_eval, donut_eval, ShapeFault};

use std::collections::HashSet;

use opensilicon_core::{BBox, Kernel, ShapeSet};

use crate::error::EvalError;
use crate::layout::{FlatLayout, FlatObject};
use crate::registry::RuleSet;
use crate::rule::{Rule, RuleId, RuleType};
use crate::user_rule::Side;
use crate::violation::{EdgeRef, Violation};
use crate::walker::{Boundary, CornerCarry, EdgeCursor, EdgeView};

use edge::{intersect_spans, subtract_spans, EdgeFrame, Span, SAMPLE_DEPTH};

/// Everything a test needs besides the object and the rule.
pub struct EvalContext<'a> {
    /// Objects near the ones under check.
    pub layout: &'a FlatLayout,
    /// The whole checked cell. Group-level rules read connectivity here.
    pub whole: &'a FlatLayout,
    /// Flattened indices under check; `None` checks everything.
    pub selected: Option<&'a HashSet<usize>>,
    pub rules: &'a RuleSet,
    pub corner_angle: u32,
}

impl<'a> EvalContext<'a> {
    pub fn new(layout: &'a FlatLayout, rules: &'a RuleSet, corner_angle: u32) -> Self {
        Self {
            layout,
            whole: layout,
            selected: None,
            rules,
            corner_angle,
        }
    }

    /// Evaluate a part of `whole`, checking only `selected` objects.
    pub fn within(mut self, whole: &'a FlatLayout, selected: &'a HashSet<usize>) -> Self {
        self.whole = whole;
        self.selected = Some(selected);
        self
    }

    pub fn kernel(&self) -> &Kernel {
        self.layout.kernel()
    }

    pub fn is_selected(&self, index: usize) -> bool {
        self.selected.map_or(true, |s| s.contains(&index))
    }
}

/// Common signature of the per-type tests. Violations are appended to the
/// output vector.
pub type TestFn =
    fn(&EvalContext<'_>, &FlatObject, RuleId, &Rule, &mut Vec<Violation>) -> Result<(), EvalError>;

pub fn select(rule_type: RuleType) -> TestFn {
    match rule_type {
        RuleType::NoRule | RuleType::Exist => no_test,
        RuleType::Connected => area::connected,
        RuleType::NoHoles => area::no_holes,
        RuleType::MinArea | RuleType::MaxArea => area::area_bound,
        RuleType::Overlap
        | RuleType::IfOverlap
        | RuleType::NoOverlap
        | RuleType::AnyOverlap
        | RuleType::PartOverlap
        | RuleType::AnyNoOverlap => overlap::overlap_family,
        RuleType::MinOverlap | RuleType::MinNoOverlap => overlap::min_overlap,
        RuleType::MinEdgeLength => width::min_edge_length,
        RuleType::MinWidth => width::min_width,
        RuleType::MaxWidth => width::max_width,
        RuleType::MinSpace | RuleType::MinSpaceTo => space::min_space,
        RuleType::MinSpaceFrom => space::min_space_from,
        RuleType::UserDefined => user::user_defined,
    }
}

/// Run one rule on one object.
pub fn evaluate(
    ctx: &EvalContext<'_>,
    obj: &FlatObject,
    id: RuleId,
    rule: &Rule,
) -> Result<Vec<Violation>, EvalError> {
    let mut out = Vec::new();
    select(rule.rule_type())(ctx, obj, id, rule, &mut out)?;
    Ok(out)
}

fn no_test(
    _: &EvalContext<'_>,
    _: &FlatObject,
    _: RuleId,
    _: &Rule,
    _: &mut Vec<Violation>,
) -> Result<(), EvalError> {
    Ok(())
}

/// The object's material, restricted to the rule's region when it has one.
pub(crate) fn source_material(
    ctx: &EvalContext<'_>,
    obj: &FlatObject,
    rule: &Rule,
    window: &BBox,
) -> Result<ShapeSet, EvalError> {
    match &rule.region {
        Some(region) => {
            let region = region.resolve(ctx.layout, window)?;
            Ok(ctx.kernel().intersect(obj.pieces(), &region)?)
        }
        None => Ok(obj.pieces().clone()),
    }
}

/// Which parts of each edge take part in edge tests.
pub(crate) struct EdgeScope {
    others: ShapeSet,
    filters: Vec<(Side, ShapeSet)>,
}

impl EdgeScope {
    pub fn new(
        ctx: &EvalContext<'_>,
        obj: &FlatObject,
        rule: &Rule,
        window: &BBox,
    ) -> Result<Self, EvalError> {
        let others = ctx
            .layout
            .material_where(&obj.layer, window, |o| o.index != obj.index)?;
        let mut scope = Self {
            others,
            filters: Vec::new(),
        };
        for (side, expr) in [
            (Side::Inside, &rule.region),
            (Side::Inside, &rule.inside),
            (Side::Outside, &rule.outside),
        ] {
            if let Some(expr) = expr {
                scope.require(side, expr.resolve(ctx.layout, window)?);
            }
        }
        Ok(scope)
    }

    /// Keep only spans whose strip on `side` lies in `material`.
    pub fn require(&mut self, side: Side, material: ShapeSet) {
        self.filters.push((side, material));
    }

    pub fn spans(&self, frame: &EdgeFrame) -> Vec<Span> {
        let abutted = frame.covered(frame.full(), SAMPLE_DEPTH, Side::Outside, &self.others);
        let mut spans = subtract_spans(&[frame.full()], &abutted);
        for (side, material) in &self.filters {
            if spans.is_empty() {
                break;
            }
            let kept = frame.covered(frame.full(), SAMPLE_DEPTH, *side, material);
            spans = intersect_spans(&spans, &kept);
        }
        spans
    }
}

/// One edge as seen by an [`EdgeTest`].
pub(crate) struct EdgeCase<'e> {
    pub edge: &'e EdgeView,
    pub frame: EdgeFrame,
    pub spans: Vec<Span>,
    pub can_skip: bool,
}

pub(crate) trait EdgeTest {
    /// Violations for one edge; empty when the edge passes.
    fn edge(&mut self, case: &EdgeCase<'_>) -> Result<Vec<Violation>, EvalError>;

    /// Test the corner where `edge` starts.
    fn corner(&mut self, _edge: &EdgeView) -> Result<Option<Violation>, EvalError> {
        Ok(None)
    }
}

/// Walk the outline of `obj`, running `test` on every edge and every corner
/// whose two edges both passed and both reach the corner.
pub(crate) fn walk_edges(
    ctx: &EvalContext<'_>,
    obj: &FlatObject,
    id: RuleId,
    rule: &Rule,
    scope: &EdgeScope,
    test: &mut dyn EdgeTest,
    out: &mut Vec<Violation>,
) -> Result<(), EvalError> {
    let Some(cursor) = EdgeCursor::new(&obj.outline, Boundary::Outer, ctx.corner_angle) else {
        return Ok(());
    };
    let mut cursor = cursor.with_wire(obj.wire);
    let n = cursor.edge_count();
    let mut carry = CornerCarry::default();
    let mut found = Vec::new();
    let mut corners = Vec::new();
    let mut first: Option<(EdgeView, bool)> = None;
    let mut prev_reaches_end = false;

    while let Some(edge) = cursor.next() {
        let frame = EdgeFrame::new(&edge);
        let spans = scope.spans(&frame);
        let reaches_start = spans.first().is_some_and(|s| s.0 <= 1e-6);
        let reaches_end = spans.last().is_some_and(|s| s.1 >= frame.len - 1e-6);
        let can_skip = cursor.can_skip(&edge, rule.edge_dimension(edge.is_manhattan()));
        let hits = if spans.is_empty() {
            Vec::new()
        } else {
            test.edge(&EdgeCase {
                edge: &edge,
                frame,
                spans,
                can_skip,
            })?
        };
        if carry.record(edge.index, !hits.is_empty()) && prev_reaches_end && reaches_start {
            corners.extend(test.corner(&edge)?);
        }
        if edge.index == 0 {
            first = Some((edge, reaches_start));
        }
        if cursor.is_last() && carry.closing_corner() && reaches_end {
            if let Some((first_edge, true)) = &first {
                corners.extend(test.corner(first_edge)?);
            }
        }
        prev_reaches_end = reaches_end;
        found.extend(hits);
    }

    if n > 0 && carry.failed == n {
        if let Some(v) = found.first() {
            out.push(Violation::from_bbox(
                id,
                rule.rule_type(),
                obj.index,
                &obj.bbox,
                EdgeRef::AllEdges,
                v.code,
            ));
        }
    } else {
        out.extend(found);
    }
    out.extend(corners);
    Ok(())
}

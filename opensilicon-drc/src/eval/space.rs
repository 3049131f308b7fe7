use opensilicon_core::kernel::{Piece, AREA_EPS};
use opensilicon_core::{BBox, Coord, ShapeSet};

use super::edge::{convex_sector, piece_points, test_region, Span};
use super::{walk_edges, EdgeCase, EdgeScope, EdgeTest, EvalContext};
use crate::error::{EvalError, SetupError};
use crate::layout::FlatObject;
use crate::rule::{Rule, RuleId, RuleType};
use crate::user_rule::Side;
use crate::violation::{EdgeRef, ErrorCode, Violation};
use crate::walker::{CornerKind, EdgeView};

struct SpaceTest<'a> {
    ctx: &'a EvalContext<'a>,
    obj: &'a FlatObject,
    id: RuleId,
    rule: &'a Rule,
    /// Material held at the primary distance.
    near: ShapeSet,
    /// Same-net material held at the same-net distance.
    same_net: Option<ShapeSet>,
}

impl SpaceTest<'_> {
    fn distance(&self, edge: &EdgeView, span: Span) -> Coord {
        self.distance_along(edge.is_manhattan(), span.1 - span.0)
    }

    fn distance_along(&self, manhattan: bool, length: f64) -> Coord {
        if !manhattan && self.rule.diagonal != 0 {
            return self.rule.diagonal;
        }
        self.rule
            .table
            .as_ref()
            .and_then(|t| t.lookup(length))
            .unwrap_or(self.rule.dimension)
    }

    /// The larger distance of the two edges meeting where `edge` starts.
    fn corner_distance(&self, edge: &EdgeView) -> Coord {
        let prev_manhattan = edge.prev.x == edge.start.x || edge.prev.y == edge.start.y;
        let before = self.distance_along(prev_manhattan, edge.prev.distance_to(&edge.start));
        before.max(self.distance(edge, (0.0, edge.length())))
    }

    fn intrudes(&self, region: &Piece, material: &ShapeSet) -> Result<bool, EvalError> {
        let shape = ShapeSet::from_pieces(vec![region.clone()]);
        let hit = self.ctx.kernel().intersect(&shape, material)?;
        Ok(!hit.is_empty())
    }

    fn violation(&self, region: Vec<opensilicon_core::Point>, edge: EdgeRef, code: ErrorCode) -> Violation {
        Violation::new(self.id, self.rule.rule_type(), self.obj.index, region, edge, code)
    }
}

impl EdgeTest for SpaceTest<'_> {
    fn edge(&mut self, case: &EdgeCase<'_>) -> Result<Vec<Violation>, EvalError> {
        let mut out = Vec::new();
        let at = EdgeRef::Edge(case.edge.index);
        for &span in &case.spans {
            let d = self.distance(case.edge, span);
            if d > 0 {
                if let Some(region) = test_region(case.edge, &case.frame, span, d as f64, Side::Outside) {
                    if self.intrudes(&region, &self.near)? {
                        out.push(self.violation(piece_points(&region), at, ErrorCode::Space));
                        continue;
                    }
                }
            }
            let Some(same) = &self.same_net else {
                continue;
            };
            let s = self.rule.same_net as f64;
            if let Some(region) = test_region(case.edge, &case.frame, span, s, Side::Outside) {
                if self.intrudes(&region, same)? {
                    out.push(
                        self.violation(piece_points(&region), at, ErrorCode::Space)
                            .with_note("same net"),
                    );
                }
            }
        }
        Ok(out)
    }

    fn corner(&mut self, edge: &EdgeView) -> Result<Option<Violation>, EvalError> {
        if edge.start_corner != CornerKind::Convex {
            return Ok(None);
        }
        let d = self.corner_distance(edge);
        if d <= 0 {
            return Ok(None);
        }
        let Some(sector) = convex_sector(edge, d as f64) else {
            return Ok(None);
        };
        let shape = ShapeSet::from_pieces(vec![sector]);
        let hit = self.ctx.kernel().intersect(&shape, &self.near)?;
        let Some(ext) = hit.extent() else {
            return Ok(None);
        };
        Ok(Some(self.violation(
            ext.to_bbox().corners().to_vec(),
            EdgeRef::Vertex(edge.index),
            ErrorCode::Corner,
        )))
    }
}

/// MinSpace against the object's own layer, MinSpaceTo against the target.
pub(super) fn min_space(
    ctx: &EvalContext<'_>,
    obj: &FlatObject,
    id: RuleId,
    rule: &Rule,
    out: &mut Vec<Violation>,
) -> Result<(), EvalError> {
    if let Some(table) = &rule.table {
        table.check()?;
    }
    if rule.reach() <= 0 {
        return Ok(());
    }
    let window = obj.bbox.expand(rule.reach() + 1);
    let scope = EdgeScope::new(ctx, obj, rule, &window)?;
    let (near, same_net) = match rule.rule_type() {
        RuleType::MinSpaceTo => {
            let target = rule
                .target
                .as_ref()
                .ok_or(SetupError::MissingTarget(rule.rule_type()))?;
            (target.resolve(ctx.layout, &window)?, None)
        }
        _ => match (&obj.net, rule.same_net) {
            (Some(net), s) if s > 0 => {
                let others = ctx
                    .layout
                    .material_where(&obj.layer, &window, |o| o.net.as_ref() != Some(net))?;
                let same = ctx
                    .layout
                    .material_where(&obj.layer, &window, |o| o.net.as_ref() == Some(net))?;
                (others, Some(same))
            }
            _ => (ctx.layout.material_where(&obj.layer, &window, |_| true)?, None),
        },
    };
    let mut test = SpaceTest {
        ctx,
        obj,
        id,
        rule,
        near,
        same_net,
    };
    walk_edges(ctx, obj, id, rule, &scope, &mut test, out)
}

struct EnclosureTest<'a> {
    ctx: &'a EvalContext<'a>,
    obj: &'a FlatObject,
    id: RuleId,
    rule: &'a Rule,
    target: ShapeSet,
}

impl EnclosureTest<'_> {
    /// Covered and uncovered area of `band` against the target.
    fn coverage(&self, band: &Piece) -> Result<(f64, f64), EvalError> {
        let shape = ShapeSet::from_pieces(vec![band.clone()]);
        let covered = self
            .ctx
            .kernel()
            .area(&self.ctx.kernel().intersect(&shape, &self.target)?)?;
        Ok((covered, band.area() - covered))
    }
}

impl EdgeTest for EnclosureTest<'_> {
    fn edge(&mut self, case: &EdgeCase<'_>) -> Result<Vec<Violation>, EvalError> {
        let mut out = Vec::new();
        let at = EdgeRef::Edge(case.edge.index);
        let d = self.rule.edge_dimension(case.edge.is_manhattan());
        for &span in &case.spans {
            if d > 0 {
                if let Some(band) = test_region(case.edge, &case.frame, span, d as f64, Side::Outside) {
                    let (covered, open) = self.coverage(&band)?;
                    if covered > AREA_EPS && open > AREA_EPS {
                        out.push(
                            Violation::new(
                                self.id,
                                self.rule.rule_type(),
                                self.obj.index,
                                piece_points(&band),
                                at,
                                ErrorCode::Enclosure,
                            )
                            .with_note("partly covered"),
                        );
                        continue;
                    }
                }
            }
            if self.rule.enclosed > 0 {
                let e = self.rule.enclosed as f64;
                if let Some(band) = test_region(case.edge, &case.frame, span, e, Side::Outside) {
                    let (_, open) = self.coverage(&band)?;
                    if open > AREA_EPS {
                        out.push(
                            Violation::new(
                                self.id,
                                self.rule.rule_type(),
                                self.obj.index,
                                piece_points(&band),
                                at,
                                ErrorCode::Enclosure,
                            )
                            .with_note(format!("not enclosed by {}", self.rule.enclosed)),
                        );
                    }
                }
            }
        }
        Ok(out)
    }
}

pub(super) fn min_space_from(
    ctx: &EvalContext<'_>,
    obj: &FlatObject,
    id: RuleId,
    rule: &Rule,
    out: &mut Vec<Violation>,
) -> Result<(), EvalError> {
    let target_expr = rule
        .target
        .as_ref()
        .ok_or(SetupError::MissingTarget(rule.rule_type()))?;
    let window = obj.bbox.expand(rule.reach() + 1);
    let target = target_expr.resolve(ctx.layout, &window)?;
    if let Some((a, b)) = rule.opposite {
        if obj.is_manhattan() {
            return end_of_line(ctx, obj, id, rule, &target, (a, b), out);
        }
    }
    let scope = EdgeScope::new(ctx, obj, rule, &window)?;
    let mut test = EnclosureTest {
        ctx,
        obj,
        id,
        rule,
        target,
    };
    walk_edges(ctx, obj, id, rule, &scope, &mut test, out)
}

/// Each pair of opposite sides needs one side enclosed by `a` and the other by `b`.
fn end_of_line(
    ctx: &EvalContext<'_>,
    obj: &FlatObject,
    id: RuleId,
    rule: &Rule,
    target: &ShapeSet,
    (a, b): (Coord, Coord),
    out: &mut Vec<Violation>,
) -> Result<(), EvalError> {
    let bb = obj.bbox;
    let margin = |side: usize, m: Coord| -> Result<bool, EvalError> {
        if m <= 0 {
            return Ok(true);
        }
        let band = match side {
            0 => BBox::from_coords(bb.min.x - m, bb.min.y, bb.min.x, bb.max.y),
            1 => BBox::from_coords(bb.max.x, bb.min.y, bb.max.x + m, bb.max.y),
            2 => BBox::from_coords(bb.min.x, bb.min.y - m, bb.max.x, bb.min.y),
            _ => BBox::from_coords(bb.min.x, bb.max.y, bb.max.x, bb.max.y + m),
        };
        Ok(ctx.kernel().covers(target, &ShapeSet::from_bbox(&band))?)
    };
    for (lo, hi, name) in [(0, 1, "left/right"), (2, 3, "bottom/top")] {
        let ok = (margin(lo, a)? && margin(hi, b)?) || (margin(lo, b)? && margin(hi, a)?);
        if !ok {
            out.push(
                Violation::from_bbox(id, rule.rule_type(), obj.index, &bb, EdgeRef::Object, ErrorCode::EndOfLine)
                    .with_note(format!("{name} enclosure below {a}/{b}")),
            );
        }
    }
    Ok(())
}

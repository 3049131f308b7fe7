use opensilicon_core::kernel::AREA_EPS;
use opensilicon_core::{BloatMode, ShapeSet};

use super::edge::{concave_sector, piece_points, test_region};
use super::{source_material, walk_edges, EdgeCase, EdgeScope, EdgeTest, EvalContext};
use crate::error::EvalError;
use crate::layout::FlatObject;
use crate::rule::{Rule, RuleId};
use crate::user_rule::Side;
use crate::violation::{EdgeRef, ErrorCode, Violation};
use crate::walker::{CornerKind, EdgeView};

struct MinWidthTest<'a> {
    ctx: &'a EvalContext<'a>,
    obj: &'a FlatObject,
    id: RuleId,
    rule: &'a Rule,
    material: ShapeSet,
}

impl EdgeTest for MinWidthTest<'_> {
    fn edge(&mut self, case: &EdgeCase<'_>) -> Result<Vec<Violation>, EvalError> {
        if case.can_skip {
            return Ok(Vec::new());
        }
        let depth = self.rule.edge_dimension(case.edge.is_manhattan()) as f64;
        let mut out = Vec::new();
        for &span in &case.spans {
            let Some(region) = test_region(case.edge, &case.frame, span, depth, Side::Inside) else {
                continue;
            };
            let shape = ShapeSet::from_pieces(vec![region.clone()]);
            if !self.ctx.kernel().covers(&self.material, &shape)? {
                out.push(Violation::new(
                    self.id,
                    self.rule.rule_type(),
                    self.obj.index,
                    piece_points(&region),
                    EdgeRef::Edge(case.edge.index),
                    ErrorCode::Width,
                ));
            }
        }
        Ok(out)
    }

    fn corner(&mut self, edge: &EdgeView) -> Result<Option<Violation>, EvalError> {
        if edge.start_corner != CornerKind::Concave {
            return Ok(None);
        }
        let Some(sector) = concave_sector(edge, self.rule.dimension as f64) else {
            return Ok(None);
        };
        let shape = ShapeSet::from_pieces(vec![sector.clone()]);
        if self.ctx.kernel().covers(&self.material, &shape)? {
            return Ok(None);
        }
        Ok(Some(Violation::new(
            self.id,
            self.rule.rule_type(),
            self.obj.index,
            piece_points(&sector),
            EdgeRef::Vertex(edge.index),
            ErrorCode::Corner,
        )))
    }
}

pub(super) fn min_width(
    ctx: &EvalContext<'_>,
    obj: &FlatObject,
    id: RuleId,
    rule: &Rule,
    out: &mut Vec<Violation>,
) -> Result<(), EvalError> {
    if rule.reach() <= 0 {
        return Ok(());
    }
    let window = obj.bbox.expand(rule.reach() + 1);
    let scope = EdgeScope::new(ctx, obj, rule, &window)?;
    let material = ctx.layout.material_where(&obj.layer, &window, |_| true)?;
    let mut test = MinWidthTest {
        ctx,
        obj,
        id,
        rule,
        material,
    };
    walk_edges(ctx, obj, id, rule, &scope, &mut test, out)
}

/// Fails where eroding the merged layer material by half the bound leaves
/// area inside the object.
pub(super) fn max_width(
    ctx: &EvalContext<'_>,
    obj: &FlatObject,
    id: RuleId,
    rule: &Rule,
    out: &mut Vec<Violation>,
) -> Result<(), EvalError> {
    if rule.dimension <= 0 {
        return Ok(());
    }
    let kernel = ctx.kernel();
    let window = obj.bbox.expand(rule.dimension + 1);
    let own = source_material(ctx, obj, rule, &window)?;
    if own.is_empty() {
        return Ok(());
    }
    let material = ctx.layout.material_where(&obj.layer, &window, |_| true)?;
    let core = kernel.bloat(&material, -(rule.dimension as f64) / 2.0, BloatMode::Area)?;
    let residue = kernel.intersect(&core, &own)?;
    if kernel.area(&residue)? <= AREA_EPS {
        return Ok(());
    }
    if let Some(ext) = residue.extent() {
        out.push(
            Violation::from_bbox(
                id,
                rule.rule_type(),
                obj.index,
                &ext.expand(rule.dimension as f64 / 2.0).to_bbox(),
                EdgeRef::Object,
                ErrorCode::Width,
            )
            .with_note(format!("wider than {}", rule.dimension)),
        );
    }
    Ok(())
}

struct EdgeLengthTest<'a> {
    obj: &'a FlatObject,
    id: RuleId,
    rule: &'a Rule,
}

impl EdgeTest for EdgeLengthTest<'_> {
    fn edge(&mut self, case: &EdgeCase<'_>) -> Result<Vec<Violation>, EvalError> {
        let bound = self.rule.edge_dimension(case.edge.is_manhattan()) as f64;
        Ok(case
            .spans
            .iter()
            .filter(|s| s.1 - s.0 < bound - 1e-6)
            .map(|&s| {
                Violation::new(
                    self.id,
                    self.rule.rule_type(),
                    self.obj.index,
                    case.frame.endpoints(s),
                    EdgeRef::Edge(case.edge.index),
                    ErrorCode::EdgeLength,
                )
                .with_note(format!("length {:.1}", s.1 - s.0))
            })
            .collect())
    }
}

pub(super) fn min_edge_length(
    ctx: &EvalContext<'_>,
    obj: &FlatObject,
    id: RuleId,
    rule: &Rule,
    out: &mut Vec<Violation>,
) -> Result<(), EvalError> {
    if rule.dimension <= 0 {
        return Ok(());
    }
    let window = obj.bbox.expand(1);
    let scope = EdgeScope::new(ctx, obj, rule, &window)?;
    walk_edges(ctx, obj, id, rule, &scope, &mut EdgeLengthTest { obj, id, rule }, out)
}

#[cfg(test)]
mod tests {
    use crate::eval::tests::{check, fixture::Fixture};
    use crate::violation::{EdgeRef, ErrorCode};

    #[test]
    fn test_min_width_boundary() {
        let layout = Fixture::new().rect(1, 0, 0, 12, 100).build();
        assert!(check(&layout, "M1", "MinWidth 12").is_empty());
        let layout = Fixture::new().rect(1, 0, 0, 11, 100).build();
        let v = check(&layout, "M1", "MinWidth 12");
        assert_eq!(v.len(), 2);
        assert!(v.iter().all(|v| v.code == ErrorCode::Width));
    }

    #[test]
    fn test_narrow_neck_is_edge_local() {
        // Two 20x20 pads joined by a 4-wide neck.
        let layout = Fixture::new()
            .polygon(
                1,
                &[
                    (0, 0),
                    (20, 0),
                    (20, 8),
                    (40, 8),
                    (40, 0),
                    (60, 0),
                    (60, 20),
                    (40, 20),
                    (40, 12),
                    (20, 12),
                    (20, 20),
                    (0, 20),
                ],
            )
            .build();
        let v = check(&layout, "M1", "MinWidth 10");
        assert!(!v.is_empty());
        assert!(v.iter().all(|v| v.edge != EdgeRef::AllEdges));
        for viol in &v {
            let bb = viol.bbox().unwrap();
            assert!(bb.min.x >= 10 && bb.max.x <= 50, "{viol:?}");
        }
    }

    #[test]
    fn test_concave_corner_width() {
        // An L with arms exactly at the bound, inner corner included.
        let layout = Fixture::new()
            .polygon(1, &[(0, 0), (30, 0), (30, 10), (10, 10), (10, 30), (0, 30)])
            .build();
        assert!(check(&layout, "M1", "MinWidth 10").is_empty());
    }

    #[test]
    fn test_max_width() {
        let layout = Fixture::new().rect(1, 0, 0, 20, 100).rect(1, 100, 0, 121, 100).build();
        let v = check(&layout, "M1", "MaxWidth 20");
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].object, 1);
        assert_eq!(v[0].edge, EdgeRef::Object);
    }

    #[test]
    fn test_min_edge_length() {
        let layout = Fixture::new()
            .polygon(1, &[(0, 0), (40, 0), (40, 3), (43, 3), (43, 40), (0, 40)])
            .build();
        let v = check(&layout, "M1", "MinEdgeLength 5");
        assert_eq!(v.len(), 2);
        assert!(v.iter().all(|v| v.code == ErrorCode::EdgeLength));
    }
}

//! Tests on whole connected groups: area bounds, holes and connectivity.

use opensilicon_core::kernel::{Extent, AREA_EPS};
use opensilicon_core::{BBox, ShapeSet};

use super::overlap::narrow_residue;
use super::EvalContext;
use crate::error::EvalError;
use crate::layout::FlatObject;
use crate::rule::{Rule, RuleId, RuleType};
use crate::violation::{EdgeRef, ErrorCode, Violation};

/// The merged material of the group `obj` belongs to, or `None` when `obj`
/// is not the group's representative. Groups are read from the whole cell;
/// the representative is the lowest member under check.
fn group_material(
    ctx: &EvalContext<'_>,
    obj: &FlatObject,
) -> Result<Option<(ShapeSet, BBox)>, EvalError> {
    let whole = ctx.whole;
    let group = whole.group_of(obj)?;
    let representative = group
        .iter()
        .map(|&pos| whole.object(pos).index)
        .find(|&index| ctx.is_selected(index));
    if representative != Some(obj.index) {
        return Ok(None);
    }
    let mut material = ShapeSet::new();
    let mut bbox = obj.bbox;
    for &pos in &group {
        let member = whole.object(pos);
        material = ctx.kernel().union(&material, member.pieces())?;
        bbox = bbox.union(&member.bbox);
    }
    Ok(Some((material, bbox)))
}

pub(super) fn area_bound(
    ctx: &EvalContext<'_>,
    obj: &FlatObject,
    id: RuleId,
    rule: &Rule,
    out: &mut Vec<Violation>,
) -> Result<(), EvalError> {
    let Some((mut material, bbox)) = group_material(ctx, obj)? else {
        return Ok(());
    };
    if let Some(region) = &rule.region {
        let region = region.resolve(ctx.whole, &bbox)?;
        material = ctx.kernel().intersect(&material, &region)?;
    }
    let area = ctx.kernel().area(&material)?;
    if area <= AREA_EPS {
        return Ok(());
    }
    let bound = rule.dimension as f64;
    let fails = match rule.rule_type() {
        RuleType::MinArea => area < bound - AREA_EPS,
        _ => area > bound + AREA_EPS,
    };
    if fails {
        out.push(
            Violation::from_bbox(id, rule.rule_type(), obj.index, &bbox, EdgeRef::Object, ErrorCode::Area)
                .with_note(format!("area {area:.0}")),
        );
    }
    Ok(())
}

fn touches_frame(ext: &Extent, frame: &BBox) -> bool {
    let eps = 1e-6;
    ext.min.x <= frame.min.x as f64 + eps
        || ext.min.y <= frame.min.y as f64 + eps
        || ext.max.x >= frame.max.x as f64 - eps
        || ext.max.y >= frame.max.y as f64 - eps
}

/// Holes of the object's group: too small by area (any hole when the bound
/// is 0), or narrower than the hole width.
pub(super) fn no_holes(
    ctx: &EvalContext<'_>,
    obj: &FlatObject,
    id: RuleId,
    rule: &Rule,
    out: &mut Vec<Violation>,
) -> Result<(), EvalError> {
    let Some((material, bbox)) = group_material(ctx, obj)? else {
        return Ok(());
    };
    let kernel = ctx.kernel();
    let frame = bbox.expand(1);
    let outside = kernel.subtract(&ShapeSet::from_bbox(&frame), &material)?;
    for component in kernel.connected_groups(&outside) {
        let hole = ShapeSet::from_pieces(
            component
                .iter()
                .map(|&i| outside.pieces()[i].clone())
                .collect(),
        );
        let Some(ext) = hole.extent() else {
            continue;
        };
        if touches_frame(&ext, &frame) {
            continue;
        }
        let area = kernel.area(&hole)?;
        if rule.dimension == 0 || area < rule.dimension as f64 - AREA_EPS {
            out.push(
                Violation::from_bbox(id, rule.rule_type(), obj.index, &ext.to_bbox(), EdgeRef::Object, ErrorCode::HoleTooSmall)
                    .with_note(format!("hole too small ({area:.0})")),
            );
        } else if rule.hole_width > 0 {
            let residue = narrow_residue(ctx, &hole, rule.hole_width)?;
            if kernel.area(&residue)? > AREA_EPS {
                out.push(
                    Violation::from_bbox(id, rule.rule_type(), obj.index, &ext.to_bbox(), EdgeRef::Object, ErrorCode::HoleWidth)
                        .with_note(format!("hole narrower than {}", rule.hole_width)),
                );
            }
        }
    }
    Ok(())
}

/// Objects outside the largest connected group of their layer in the whole
/// cell fail. Equal sizes go to the group holding the lowest object.
pub(super) fn connected(
    ctx: &EvalContext<'_>,
    obj: &FlatObject,
    id: RuleId,
    rule: &Rule,
    out: &mut Vec<Violation>,
) -> Result<(), EvalError> {
    let groups = ctx.whole.groups(&obj.layer)?;
    if groups.len() < 2 {
        return Ok(());
    }
    let largest = groups
        .iter()
        .max_by(|a, b| a.len().cmp(&b.len()).then(b[0].cmp(&a[0])));
    let Some(pos) = ctx.whole.position_of(obj.index) else {
        return Ok(());
    };
    if largest.is_some_and(|g| g.binary_search(&pos).is_ok()) {
        return Ok(());
    }
    out.push(
        Violation::from_bbox(id, rule.rule_type(), obj.index, &obj.bbox, EdgeRef::Object, ErrorCode::Connectivity)
            .with_note("not connected to the main group"),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use crate::eval::tests::{check, fixture::Fixture};
    use crate::eval::{evaluate, EvalContext};
    use crate::registry::RuleSet;
    use crate::text::parse_rule;
    use crate::violation::ErrorCode;
    use crate::walker::DEFAULT_CORNER_ANGLE;

    #[test]
    fn test_area_reported_by_lowest_selected_member() {
        let layout = Fixture::new()
            .rect(1, 0, 0, 10, 10)
            .rect(1, 10, 0, 20, 10)
            .rect(1, 20, 0, 30, 10)
            .build();
        let mut rules = RuleSet::new();
        let id = rules.link(parse_rule("M1", "MinArea 1000").unwrap());
        let rule = rules.get(id).unwrap();
        let selected: HashSet<usize> = [2].into_iter().collect();
        let ctx = EvalContext::new(&layout, &rules, DEFAULT_CORNER_ANGLE).within(&layout, &selected);

        let mut found = Vec::new();
        for &pos in layout.layer_objects("M1") {
            let obj = layout.object(pos);
            if ctx.is_selected(obj.index) {
                found.extend(evaluate(&ctx, obj, id, rule).unwrap());
            }
        }
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].object, 2);
        let bbox = found[0].bbox().unwrap();
        assert_eq!((bbox.min.x, bbox.max.x), (0, 30));
    }

    #[test]
    fn test_area_uses_connected_group() {
        let layout = Fixture::new()
            .rect(1, 0, 0, 10, 10)
            .rect(1, 10, 0, 20, 10)
            .rect(1, 100, 0, 105, 10)
            .build();
        let v = check(&layout, "M1", "MinArea 150");
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].object, 2);
        assert!(check(&layout, "M1", "MinArea 50").is_empty());
        let v = check(&layout, "M1", "MaxArea 150");
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].object, 0);
    }

    #[test]
    fn test_holes() {
        // A 30x30 ring of four rectangles around a 10x10 hole.
        let ring = Fixture::new()
            .rect(1, 0, 0, 30, 10)
            .rect(1, 0, 20, 30, 30)
            .rect(1, 0, 10, 10, 20)
            .rect(1, 20, 10, 30, 20);
        let layout = ring.build();
        let v = check(&layout, "M1", "NoHoles");
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].code, ErrorCode::HoleTooSmall);
        assert!(check(&layout, "M1", "NoHoles 100").is_empty());
        assert_eq!(check(&layout, "M1", "NoHoles 101").len(), 1);
        assert!(check(&layout, "M1", "NoHoles 50 HoleWidth 10").is_empty());
        let v = check(&layout, "M1", "NoHoles 50 HoleWidth 11");
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].code, ErrorCode::HoleWidth);
    }

    #[test]
    fn test_connected() {
        let layout = Fixture::new()
            .rect(1, 0, 0, 10, 10)
            .rect(1, 10, 0, 20, 10)
            .rect(1, 50, 0, 60, 10)
            .build();
        let v = check(&layout, "M1", "Connected");
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].object, 2);
        assert_eq!(v[0].code, ErrorCode::Connectivity);
    }
}

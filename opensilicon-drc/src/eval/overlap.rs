use opensilicon_core::kernel::AREA_EPS;
use opensilicon_core::{BloatMode, Coord, ShapeSet};

use super::{source_material, EvalContext};
use crate::error::{EvalError, SetupError};
use crate::layout::FlatObject;
use crate::rule::{Rule, RuleId, RuleType};
use crate::violation::{EdgeRef, ErrorCode, Violation};

/// Kept off the exact half-width so shapes exactly `d` wide survive opening.
const SHRINK_SLACK: f64 = 0.01;

/// Parts of `set` narrower than `d`: what a morphological opening by `d / 2`
/// removes.
pub(super) fn narrow_residue(
    ctx: &EvalContext<'_>,
    set: &ShapeSet,
    d: Coord,
) -> Result<ShapeSet, EvalError> {
    let kernel = ctx.kernel();
    let r = d as f64 / 2.0 - SHRINK_SLACK;
    if r <= 0.0 {
        return Ok(ShapeSet::new());
    }
    let core = kernel.bloat(set, -r, BloatMode::Area)?;
    let opened = kernel.bloat(&core, r, BloatMode::Area)?;
    Ok(kernel.subtract(set, &opened)?)
}

fn target(ctx: &EvalContext<'_>, obj: &FlatObject, rule: &Rule) -> Result<ShapeSet, EvalError> {
    let expr = rule
        .target
        .as_ref()
        .ok_or(SetupError::MissingTarget(rule.rule_type()))?;
    expr.resolve(ctx.layout, &obj.bbox.expand(1))
}

pub(super) fn overlap_family(
    ctx: &EvalContext<'_>,
    obj: &FlatObject,
    id: RuleId,
    rule: &Rule,
    out: &mut Vec<Violation>,
) -> Result<(), EvalError> {
    let kernel = ctx.kernel();
    let source = source_material(ctx, obj, rule, &obj.bbox.expand(1))?;
    let source_area = kernel.area(&source)?;
    if source_area <= AREA_EPS {
        return Ok(());
    }
    let target = target(ctx, obj, rule)?;
    let common = kernel.intersect(&source, &target)?;
    let common_area = kernel.area(&common)?;
    let empty = common_area <= AREA_EPS;
    let full = source_area - common_area <= AREA_EPS;
    let fails = match rule.rule_type() {
        RuleType::Overlap => !full,
        RuleType::IfOverlap => !empty && !full,
        RuleType::NoOverlap => !empty,
        RuleType::AnyOverlap => empty,
        RuleType::PartOverlap => empty || full,
        RuleType::AnyNoOverlap => full,
        _ => false,
    };
    if !fails {
        return Ok(());
    }
    let bbox = match common.extent() {
        Some(ext) if !empty => ext.to_bbox(),
        _ => obj.bbox,
    };
    out.push(Violation::from_bbox(
        id,
        rule.rule_type(),
        obj.index,
        &bbox,
        EdgeRef::Object,
        ErrorCode::Overlap,
    ));
    Ok(())
}

/// The overlap with the target (MinOverlap) or the part outside it
/// (MinNoOverlap) must be at least the dimension wide where it exists.
pub(super) fn min_overlap(
    ctx: &EvalContext<'_>,
    obj: &FlatObject,
    id: RuleId,
    rule: &Rule,
    out: &mut Vec<Violation>,
) -> Result<(), EvalError> {
    let kernel = ctx.kernel();
    let source = source_material(ctx, obj, rule, &obj.bbox.expand(1))?;
    let target = target(ctx, obj, rule)?;
    let part = match rule.rule_type() {
        RuleType::MinOverlap => kernel.intersect(&source, &target)?,
        _ => kernel.subtract(&source, &target)?,
    };
    if kernel.area(&part)? <= AREA_EPS {
        return Ok(());
    }
    let residue = narrow_residue(ctx, &part, rule.dimension)?;
    if kernel.area(&residue)? <= AREA_EPS {
        return Ok(());
    }
    if let Some(ext) = residue.extent() {
        out.push(
            Violation::from_bbox(id, rule.rule_type(), obj.index, &ext.to_bbox(), EdgeRef::Object, ErrorCode::Overlap)
                .with_note(format!("narrower than {}", rule.dimension)),
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use opensilicon_core::BBox;

    use crate::eval::tests::{check, fixture::Fixture};

    fn layout() -> crate::layout::FlatLayout {
        // M1 object partly over M2, a second M1 object clear of it.
        Fixture::new()
            .rect(1, 0, 0, 10, 10)
            .rect(1, 100, 0, 110, 10)
            .rect(2, 5, 0, 20, 10)
            .build()
    }

    #[test]
    fn test_overlap_family_predicates() {
        let l = layout();
        let count = |line: &str| check(&l, "M1", line).len();
        assert_eq!(count("Overlap M2"), 2);
        assert_eq!(count("IfOverlap M2"), 1);
        assert_eq!(count("NoOverlap M2"), 1);
        assert_eq!(count("AnyOverlap M2"), 1);
        assert_eq!(count("PartOverlap M2"), 1);
        assert_eq!(count("AnyNoOverlap M2"), 0);
    }

    #[test]
    fn test_overlap_region_is_intersection() {
        let l = layout();
        let v = check(&l, "M1", "NoOverlap M2");
        assert_eq!(v[0].bbox(), Some(BBox::from_coords(5, 0, 10, 10)));
        let v = check(&l, "M2", "NoOverlap M1");
        assert_eq!(v[0].bbox(), Some(BBox::from_coords(5, 0, 10, 10)));
    }

    #[test]
    fn test_min_overlap_width() {
        let l = layout();
        assert!(check(&l, "M1", "MinOverlap M2 5").is_empty());
        assert_eq!(check(&l, "M1", "MinOverlap M2 6").len(), 1);
        assert!(check(&l, "M1", "MinNoOverlap M2 5").is_empty());
        assert_eq!(check(&l, "M1", "MinNoOverlap M2 8").len(), 1);
    }
}

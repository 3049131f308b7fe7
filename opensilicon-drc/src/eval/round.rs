//! Analytic checks for round objects, used before a disk or donut is
//! created so the editor can refuse it up front.

use std::f64::consts::PI;

use opensilicon_core::Coord;
use serde::Serialize;

use crate::registry::RuleSet;
use crate::rule::{Rule, RuleId, RuleType};

/// One rule a proposed round object would break.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShapeFault {
    pub rule: RuleId,
    pub rule_type: RuleType,
    pub message: String,
}

/// Rules on `layer` that can be judged without geometry.
fn plain_rules<'a>(rules: &'a RuleSet, layer: &'a str) -> impl Iterator<Item = (RuleId, &'a Rule)> + 'a {
    rules.rules_for_layer(layer).filter(move |(_, r)| {
        rules.is_active(r) && r.region.is_none() && r.inside.is_none() && r.outside.is_none()
    })
}

fn fault(id: RuleId, rule: &Rule, message: String) -> ShapeFault {
    ShapeFault {
        rule: id,
        rule_type: rule.rule_type(),
        message,
    }
}

/// Width and area faults shared by disks and donuts.
fn body_faults(id: RuleId, rule: &Rule, width: f64, area: f64, what: &str) -> Option<ShapeFault> {
    let d = rule.dimension as f64;
    match rule.rule_type() {
        RuleType::MinWidth if width < d => Some(fault(id, rule, format!("{what} {width} below minimum width {d}"))),
        RuleType::MaxWidth if d > 0.0 && width > d => {
            Some(fault(id, rule, format!("{what} {width} above maximum width {d}")))
        }
        RuleType::MinArea if area < d => Some(fault(id, rule, format!("area {area:.0} below minimum {d}"))),
        RuleType::MaxArea if d > 0.0 && area > d => {
            Some(fault(id, rule, format!("area {area:.0} above maximum {d}")))
        }
        _ => None,
    }
}

/// Faults a solid disk of the given diameter would have on `layer`.
pub fn disk_eval(rules: &RuleSet, layer: &str, diameter: Coord) -> Vec<ShapeFault> {
    let d = diameter as f64;
    let area = PI * d * d / 4.0;
    plain_rules(rules, layer)
        .filter_map(|(id, rule)| body_faults(id, rule, d, area, "diameter"))
        .collect()
}

/// Faults a donut with the given outer and inner diameters would have on
/// `layer`. The ring width is half the difference of the diameters.
pub fn donut_eval(rules: &RuleSet, layer: &str, outer: Coord, inner: Coord) -> Vec<ShapeFault> {
    let (od, id_) = (outer as f64, inner as f64);
    let ring = (od - id_) / 2.0;
    let hole_area = PI * id_ * id_ / 4.0;
    let area = PI * (od * od - id_ * id_) / 4.0;
    let mut out = Vec::new();
    for (id, rule) in plain_rules(rules, layer) {
        let d = rule.dimension as f64;
        match rule.rule_type() {
            RuleType::MinSpace if id_ < d => {
                out.push(fault(id, rule, format!("hole too small: {id_} below spacing {d}")));
            }
            RuleType::NoHoles if rule.dimension == 0 || hole_area < d => {
                out.push(fault(id, rule, format!("hole too small: area {hole_area:.0}")));
            }
            _ => out.extend(body_faults(id, rule, ring, area, "ring width")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::parse_deck;

    fn rules(body: &str) -> RuleSet {
        parse_deck(&format!("Layer M1\n{body}")).unwrap()
    }

    #[test]
    fn test_disk_width_boundary() {
        let set = rules("MinWidth 20\n");
        assert!(disk_eval(&set, "M1", 20).is_empty());
        let f = disk_eval(&set, "M1", 19);
        assert_eq!(f.len(), 1);
        assert_eq!(f[0].rule_type, RuleType::MinWidth);
        assert!(disk_eval(&set, "M2", 1).is_empty());
    }

    #[test]
    fn test_disk_area() {
        let set = rules("MinArea 300\nMaxArea 400\n");
        assert!(disk_eval(&set, "M1", 20).is_empty());
        assert_eq!(disk_eval(&set, "M1", 19)[0].rule_type, RuleType::MinArea);
        assert_eq!(disk_eval(&set, "M1", 23)[0].rule_type, RuleType::MaxArea);
    }

    #[test]
    fn test_donut_hole_and_ring() {
        let set = rules("MinSpace 10\nMinWidth 10\n");
        assert!(donut_eval(&set, "M1", 30, 10).is_empty());

        let f = donut_eval(&set, "M1", 29, 9);
        assert_eq!(f.len(), 1);
        assert_eq!(f[0].rule_type, RuleType::MinSpace);
        assert!(f[0].message.contains("hole too small"));

        let f = donut_eval(&set, "M1", 28, 10);
        assert_eq!(f.len(), 1);
        assert_eq!(f[0].rule_type, RuleType::MinWidth);
    }

    #[test]
    fn test_inhibited_and_region_rules_are_skipped() {
        let set = rules("MinWidth 20 Inhibit\nMinWidth Region M2 20\n");
        assert!(disk_eval(&set, "M1", 5).is_empty());
    }
}

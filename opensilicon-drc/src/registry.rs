//! Rule registry: per-layer ordered rule lists over a stable arena.
//!
//! Rules live in an arena of slots addressed by [`RuleId`]. Unlinking empties
//! the slot and drops the id from its layer's order list, so ids held
//! elsewhere never dangle; they simply stop resolving.

use serde::{Deserialize, Serialize};

use crate::error::SetupError;
use crate::rule::{Rule, RuleId, RuleType, RuleTypeMask};
use crate::user_rule::{UserRule, UserRuleTable};

#[derive(Debug, Clone)]
struct LayerRules {
    layer: String,
    order: Vec<RuleId>,
}

/// What [`RuleSet::link_or_replace`] did with a re-specified rule.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkOutcome {
    Added(RuleId),
    /// The old rule was unlinked and the new one took its list position.
    Replaced { id: RuleId, old: Rule },
}

impl LinkOutcome {
    pub fn id(&self) -> RuleId {
        match self {
            LinkOutcome::Added(id) | LinkOutcome::Replaced { id, .. } => *id,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    slots: Vec<Option<Rule>>,
    layers: Vec<LayerRules>,
    disabled: RuleTypeMask,
    user_rules: UserRuleTable,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Linking ──────────────────────────────────────────────────────

    /// Append a rule to the end of its layer's list.
    pub fn link(&mut self, rule: Rule) -> RuleId {
        let layer = rule.layer.clone();
        let id = self.alloc(rule);
        self.layer_entry(&layer).order.push(id);
        id
    }

    /// Insert a rule at `position` in its layer's list (clamped to the list length).
    pub fn link_at(&mut self, rule: Rule, position: usize) -> RuleId {
        let layer = rule.layer.clone();
        let id = self.alloc(rule);
        let order = &mut self.layer_entry(&layer).order;
        order.insert(position.min(order.len()), id);
        id
    }

    /// Detach a rule. Returns `None` if the id is not linked.
    pub fn unlink(&mut self, id: RuleId) -> Option<Rule> {
        let rule = self.slots.get_mut(id.0)?.take()?;
        if let Some(entry) = self.layers.iter_mut().find(|l| l.layer == rule.layer) {
            entry.order.retain(|r| *r != id);
        }
        Some(rule)
    }

    /// Existing rule for the same (layer, type, target), ignoring regions.
    pub fn find(&self, layer: &str, rule_type: RuleType, target: Option<&str>) -> Option<RuleId> {
        self.rules_for_layer(layer)
            .find(|(_, r)| {
                r.rule_type() == rule_type
                    && r.target.as_ref().map(ToString::to_string).as_deref() == target
            })
            .map(|(id, _)| id)
    }

    /// Rule that `rule` would replace when re-specified.
    ///
    /// A rule without a region replaces a same-slot rule without a region; a
    /// rule with a region replaces a same-slot rule with the identical region.
    pub fn find_replaceable(&self, rule: &Rule) -> Option<RuleId> {
        let region = rule.region.as_ref().map(ToString::to_string);
        self.rules_for_layer(&rule.layer)
            .find(|(_, r)| r.same_slot(rule) && r.region.as_ref().map(ToString::to_string) == region)
            .map(|(id, _)| id)
    }

    /// Link a rule, replacing an existing rule it re-specifies.
    pub fn link_or_replace(&mut self, rule: Rule) -> LinkOutcome {
        if let Some(old_id) = self.find_replaceable(&rule) {
            let position = self.position(old_id).map_or(usize::MAX, |(_, p)| p);
            if let Some(old) = self.unlink(old_id) {
                let id = self.link_at(rule, position);
                log::debug!("replaced {} rule on layer {}", old.rule_type(), old.layer);
                return LinkOutcome::Replaced { id, old };
            }
        }
        if self
            .rules_for_layer(&rule.layer)
            .any(|(_, r)| r.same_slot(&rule))
        {
            log::warn!(
                "layer {} already has a {} rule with a different region; keeping both",
                rule.layer,
                rule.rule_type()
            );
        }
        LinkOutcome::Added(self.link(rule))
    }

    /// Swap the rule behind `id` for `rule`, keeping its list position.
    /// The rule type may not change.
    pub fn replace(&mut self, id: RuleId, rule: Rule) -> Option<(RuleId, Rule)> {
        let current = self.get(id)?;
        if current.rule_type() != rule.rule_type() {
            return None;
        }
        let position = self.position(id)?.1;
        let old = self.unlink(id)?;
        Some((self.link_at(rule, position), old))
    }

    fn alloc(&mut self, rule: Rule) -> RuleId {
        self.slots.push(Some(rule));
        RuleId(self.slots.len() - 1)
    }

    fn layer_entry(&mut self, layer: &str) -> &mut LayerRules {
        let idx = match self.layers.iter().position(|l| l.layer == layer) {
            Some(idx) => idx,
            None => {
                self.layers.push(LayerRules {
                    layer: layer.to_string(),
                    order: Vec::new(),
                });
                self.layers.len() - 1
            }
        };
        &mut self.layers[idx]
    }

    // ── Lookup ───────────────────────────────────────────────────────

    pub fn get(&self, id: RuleId) -> Option<&Rule> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    /// Mutable access for parameter and `inhibited` edits.
    pub fn get_mut(&mut self, id: RuleId) -> Option<&mut Rule> {
        self.slots.get_mut(id.0).and_then(Option::as_mut)
    }

    /// Layer name and list index of a linked rule.
    pub fn position(&self, id: RuleId) -> Option<(&str, usize)> {
        let rule = self.get(id)?;
        let entry = self.layers.iter().find(|l| l.layer == rule.layer)?;
        let idx = entry.order.iter().position(|r| *r == id)?;
        Some((entry.layer.as_str(), idx))
    }

    pub fn rules_for_layer<'a>(
        &'a self,
        layer: &str,
    ) -> impl Iterator<Item = (RuleId, &'a Rule)> + 'a {
        let order: &'a [RuleId] = self
            .layers
            .iter()
            .find(|l| l.layer == layer)
            .map(|l| l.order.as_slice())
            .unwrap_or(&[]);
        order
            .iter()
            .filter_map(move |id| self.get(*id).map(|r| (*id, r)))
    }

    /// Layers with at least one rule, in first-link order.
    pub fn layers(&self) -> impl Iterator<Item = &str> {
        self.layers
            .iter()
            .filter(|l| !l.order.is_empty())
            .map(|l| l.layer.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (RuleId, &Rule)> {
        self.layers
            .iter()
            .flat_map(move |l| l.order.iter())
            .filter_map(move |id| self.get(*id).map(|r| (*id, r)))
    }

    pub fn len(&self) -> usize {
        self.layers.iter().map(|l| l.order.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ── Type disable mask ────────────────────────────────────────────

    pub fn disable(&mut self, t: RuleType) {
        self.disabled.insert(t);
    }

    pub fn enable(&mut self, t: RuleType) {
        self.disabled.remove(t);
    }

    pub fn disabled(&self, t: RuleType) -> bool {
        self.disabled.contains(t)
    }

    /// True when the rule takes part in checks: not inhibited and its type enabled.
    pub fn is_active(&self, rule: &Rule) -> bool {
        !rule.inhibited && !self.disabled(rule.rule_type())
    }

    // ── User rules ───────────────────────────────────────────────────

    pub fn define_user_rule(&mut self, rule: UserRule) -> Result<(), SetupError> {
        self.user_rules.define(rule)
    }

    pub fn user_rules(&self) -> &UserRuleTable {
        &self.user_rules
    }

    pub fn user_rule(&self, name: &str) -> Option<&UserRule> {
        self.user_rules.get(name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterMode {
    /// Only listed names take part.
    Only,
    /// Listed names are excluded.
    #[default]
    Skip,
}

/// Name list restricting which layers or rule types take part in a run.
/// An empty list lets everything through.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameFilter {
    pub mode: FilterMode,
    pub names: Vec<String>,
}

impl NameFilter {
    pub fn new(mode: FilterMode, names: &str) -> Self {
        Self {
            mode,
            names: names
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn allows(&self, name: &str) -> bool {
        if self.names.is_empty() {
            return true;
        }
        let listed = self.names.iter().any(|n| n.eq_ignore_ascii_case(name));
        match self.mode {
            FilterMode::Only => listed,
            FilterMode::Skip => !listed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer_expr::LayerExpr;

    fn width(layer: &str, w: i64) -> Rule {
        Rule::new(RuleType::MinWidth, layer).with_dimension(w)
    }

    #[test]
    fn test_link_unlink_keeps_other_ids_valid() {
        let mut set = RuleSet::new();
        let a = set.link(width("M1", 10));
        let b = set.link(Rule::new(RuleType::MinSpace, "M1").with_dimension(12));
        let c = set.link(width("M2", 14));
        assert_eq!(set.len(), 3);

        let removed = set.unlink(a).unwrap();
        assert_eq!(removed.dimension, 10);
        assert!(set.unlink(a).is_none());
        assert!(set.get(a).is_none());
        assert_eq!(set.get(b).unwrap().dimension, 12);
        assert_eq!(set.position(c), Some(("M2", 0)));
        assert_eq!(set.position(b), Some(("M1", 0)));
    }

    #[test]
    fn test_find_by_type_and_target() {
        let mut set = RuleSet::new();
        let id = set.link(
            Rule::new(RuleType::MinSpaceTo, "M1")
                .with_target(LayerExpr::layer("POLY"))
                .with_dimension(3),
        );
        assert_eq!(set.find("M1", RuleType::MinSpaceTo, Some("POLY")), Some(id));
        assert_eq!(set.find("M1", RuleType::MinSpaceTo, Some("M2")), None);
        assert_eq!(set.find("M1", RuleType::MinWidth, None), None);
    }

    #[test]
    fn test_link_or_replace_keeps_position() {
        let mut set = RuleSet::new();
        set.link(width("M1", 10));
        set.link(Rule::new(RuleType::MinSpace, "M1").with_dimension(12));
        let outcome = set.link_or_replace(width("M1", 11));
        match &outcome {
            LinkOutcome::Replaced { old, .. } => assert_eq!(old.dimension, 10),
            other => panic!("expected replacement, got {other:?}"),
        }
        let ordered: Vec<i64> = set.rules_for_layer("M1").map(|(_, r)| r.dimension).collect();
        assert_eq!(ordered, vec![11, 12]);
    }

    #[test]
    fn test_region_tie_break() {
        let mut set = RuleSet::new();
        set.link(width("M1", 10));
        let region = LayerExpr::layer("CORE");
        let with_region = set.link_or_replace(width("M1", 8).with_region(region.clone()));
        assert!(matches!(with_region, LinkOutcome::Added(_)));
        let same_region = set.link_or_replace(width("M1", 9).with_region(region));
        assert!(matches!(same_region, LinkOutcome::Replaced { .. }));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_replace_rejects_type_change() {
        let mut set = RuleSet::new();
        let id = set.link(width("M1", 10));
        assert!(set
            .replace(id, Rule::new(RuleType::MaxWidth, "M1").with_dimension(10))
            .is_none());
        let (new_id, old) = set.replace(id, width("M1", 20)).unwrap();
        assert_eq!(old.dimension, 10);
        assert_eq!(set.get(new_id).unwrap().dimension, 20);
    }

    #[test]
    fn test_disable_mask_and_inhibit() {
        let mut set = RuleSet::new();
        let id = set.link(width("M1", 10));
        assert!(set.is_active(set.get(id).unwrap()));
        set.disable(RuleType::MinWidth);
        assert!(set.disabled(RuleType::MinWidth));
        assert!(!set.is_active(set.get(id).unwrap()));
        set.enable(RuleType::MinWidth);
        set.get_mut(id).unwrap().inhibited = true;
        assert!(!set.is_active(set.get(id).unwrap()));
    }

    #[test]
    fn test_name_filter() {
        let only = NameFilter::new(FilterMode::Only, "M1, M2");
        assert!(only.allows("m1"));
        assert!(!only.allows("POLY"));
        let skip = NameFilter::new(FilterMode::Skip, "M1");
        assert!(!skip.allows("M1"));
        assert!(skip.allows("M2"));
        assert!(NameFilter::new(FilterMode::Only, "").allows("anything"));
    }
}

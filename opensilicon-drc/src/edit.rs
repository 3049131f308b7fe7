//! Undoable rule edits.
//!
//! Rules are never mutated in place: an edit unlinks the old record and
//! links a new one at the same list position, so every step can be undone by
//! swapping the records back.

use crate::registry::RuleSet;
use crate::rule::{Rule, RuleId};

/// A reversible change to a rule set.
pub trait RuleCommand: std::fmt::Debug + Send {
    fn execute(&mut self, rules: &mut RuleSet);
    fn undo(&mut self, rules: &mut RuleSet);
    /// Human-readable description for the history.
    fn description(&self) -> &str;
}

/// Append a rule to its layer's list.
#[derive(Debug)]
pub struct AddRule {
    rule: Option<Rule>,
    /// Set while the rule is linked.
    id: Option<RuleId>,
}

impl AddRule {
    pub fn new(rule: Rule) -> Self {
        Self {
            rule: Some(rule),
            id: None,
        }
    }

    pub fn id(&self) -> Option<RuleId> {
        self.id
    }
}

impl RuleCommand for AddRule {
    fn execute(&mut self, rules: &mut RuleSet) {
        if let Some(rule) = self.rule.take() {
            self.id = Some(rules.link(rule));
        }
    }

    fn undo(&mut self, rules: &mut RuleSet) {
        if let Some(id) = self.id.take() {
            self.rule = rules.unlink(id);
        }
    }

    fn description(&self) -> &str {
        "Add rule"
    }
}

/// Remove a rule, remembering its position for undo.
#[derive(Debug)]
pub struct RemoveRule {
    id: RuleId,
    removed: Option<(Rule, usize)>,
}

impl RemoveRule {
    pub fn new(id: RuleId) -> Self {
        Self { id, removed: None }
    }
}

impl RuleCommand for RemoveRule {
    fn execute(&mut self, rules: &mut RuleSet) {
        let Some(position) = rules.position(self.id).map(|(_, p)| p) else {
            log::warn!("rule {} is not linked; nothing removed", self.id.index());
            return;
        };
        if let Some(rule) = rules.unlink(self.id) {
            self.removed = Some((rule, position));
        }
    }

    fn undo(&mut self, rules: &mut RuleSet) {
        if let Some((rule, position)) = self.removed.take() {
            self.id = rules.link_at(rule, position);
        }
    }

    fn description(&self) -> &str {
        "Remove rule"
    }
}

/// Swap a rule for an edited copy of the same type.
#[derive(Debug)]
pub struct ReplaceRule {
    id: RuleId,
    /// The record not currently linked: the edit before execute, the
    /// original after.
    other: Option<Rule>,
}

impl ReplaceRule {
    pub fn new(id: RuleId, rule: Rule) -> Self {
        Self {
            id,
            other: Some(rule),
        }
    }

    pub fn id(&self) -> RuleId {
        self.id
    }

    fn swap(&mut self, rules: &mut RuleSet) {
        let Some(rule) = self.other.take() else {
            return;
        };
        match rules.replace(self.id, rule.clone()) {
            Some((id, old)) => {
                self.id = id;
                self.other = Some(old);
            }
            None => {
                log::warn!("cannot replace rule {}: not linked or type differs", self.id.index());
                self.other = Some(rule);
            }
        }
    }
}

impl RuleCommand for ReplaceRule {
    fn execute(&mut self, rules: &mut RuleSet) {
        self.swap(rules);
    }

    fn undo(&mut self, rules: &mut RuleSet) {
        self.swap(rules);
    }

    fn description(&self) -> &str {
        "Edit rule"
    }
}

/// Undo/redo journal of rule edits.
#[derive(Debug, Default)]
pub struct RuleEditHistory {
    undo_stack: Vec<Box<dyn RuleCommand>>,
    redo_stack: Vec<Box<dyn RuleCommand>>,
}

impl RuleEditHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn execute(&mut self, mut command: Box<dyn RuleCommand>, rules: &mut RuleSet) {
        command.execute(rules);
        self.undo_stack.push(command);
        self.redo_stack.clear();
    }

    pub fn undo(&mut self, rules: &mut RuleSet) -> bool {
        if let Some(mut command) = self.undo_stack.pop() {
            command.undo(rules);
            self.redo_stack.push(command);
            true
        } else {
            false
        }
    }

    pub fn redo(&mut self, rules: &mut RuleSet) -> bool {
        if let Some(mut command) = self.redo_stack.pop() {
            command.execute(rules);
            self.undo_stack.push(command);
            true
        } else {
            false
        }
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_description(&self) -> Option<&str> {
        self.undo_stack.last().map(|c| c.description())
    }

    pub fn redo_description(&self) -> Option<&str> {
        self.redo_stack.last().map(|c| c.description())
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::{format_deck, parse_deck, parse_rule};

    const DECK: &str = "Layer M1\n  MinWidth 10\n  MinSpace 12\n  MinArea 100\n";

    fn width_id(rules: &RuleSet) -> RuleId {
        rules.rules_for_layer("M1").next().unwrap().0
    }

    #[test]
    fn test_add_undo_redo() {
        let mut rules = parse_deck(DECK).unwrap();
        let mut history = RuleEditHistory::new();
        let rule = parse_rule("M2", "MinWidth 20").unwrap();
        history.execute(Box::new(AddRule::new(rule)), &mut rules);
        assert_eq!(rules.len(), 4);
        assert_eq!(history.undo_description(), Some("Add rule"));

        assert!(history.undo(&mut rules));
        assert_eq!(rules.len(), 3);
        assert!(history.redo(&mut rules));
        assert_eq!(rules.rules_for_layer("M2").count(), 1);
        assert!(!history.can_redo());
    }

    #[test]
    fn test_remove_restores_position() {
        let mut rules = parse_deck(DECK).unwrap();
        let before = format_deck(&rules);
        let space = rules.rules_for_layer("M1").nth(1).unwrap().0;
        let mut history = RuleEditHistory::new();
        history.execute(Box::new(RemoveRule::new(space)), &mut rules);
        assert_eq!(rules.len(), 2);
        history.undo(&mut rules);
        assert_eq!(format_deck(&rules), before);
        history.redo(&mut rules);
        history.undo(&mut rules);
        assert_eq!(format_deck(&rules), before);
    }

    #[test]
    fn test_replace_swaps_in_place() {
        let mut rules = parse_deck(DECK).unwrap();
        let before = format_deck(&rules);
        let edited = parse_rule("M1", "MinWidth 14").unwrap();
        let mut history = RuleEditHistory::new();
        history.execute(Box::new(ReplaceRule::new(width_id(&rules), edited)), &mut rules);
        assert_eq!(rules.get(width_id(&rules)).unwrap().dimension, 14);
        assert_eq!(rules.len(), 3);

        history.undo(&mut rules);
        assert_eq!(format_deck(&rules), before);
        history.redo(&mut rules);
        assert_eq!(rules.get(width_id(&rules)).unwrap().dimension, 14);
    }

    #[test]
    fn test_replace_rejects_type_change() {
        let mut rules = parse_deck(DECK).unwrap();
        let before = format_deck(&rules);
        let mut cmd = ReplaceRule::new(width_id(&rules), parse_rule("M1", "MaxWidth 14").unwrap());
        cmd.execute(&mut rules);
        assert_eq!(format_deck(&rules), before);
    }
}

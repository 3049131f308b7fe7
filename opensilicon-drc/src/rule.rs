//! In-memory rule model.

use std::fmt;

use opensilicon_core::Coord;
use serde::{Deserialize, Serialize};

use crate::error::SetupError;
use crate::layer_expr::LayerExpr;

/// The closed set of rule types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleType {
    NoRule,
    Connected,
    NoHoles,
    Exist,
    Overlap,
    IfOverlap,
    NoOverlap,
    AnyOverlap,
    PartOverlap,
    AnyNoOverlap,
    MinArea,
    MaxArea,
    MinEdgeLength,
    MinWidth,
    MaxWidth,
    MinSpace,
    MinSpaceTo,
    MinSpaceFrom,
    MinOverlap,
    MinNoOverlap,
    UserDefined,
}

/// Shape of the parameters that follow the rule name in rule text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleBody {
    Empty,
    OptionalArea,
    Target,
    Dimension,
    TargetDimension,
    UserCall,
}

impl RuleType {
    pub const ALL: [RuleType; 21] = [
        RuleType::NoRule,
        RuleType::Connected,
        RuleType::NoHoles,
        RuleType::Exist,
        RuleType::Overlap,
        RuleType::IfOverlap,
        RuleType::NoOverlap,
        RuleType::AnyOverlap,
        RuleType::PartOverlap,
        RuleType::AnyNoOverlap,
        RuleType::MinArea,
        RuleType::MaxArea,
        RuleType::MinEdgeLength,
        RuleType::MinWidth,
        RuleType::MaxWidth,
        RuleType::MinSpace,
        RuleType::MinSpaceTo,
        RuleType::MinSpaceFrom,
        RuleType::MinOverlap,
        RuleType::MinNoOverlap,
        RuleType::UserDefined,
    ];

    pub fn name(self) -> &'static str {
        match self {
            RuleType::NoRule => "NoRule",
            RuleType::Connected => "Connected",
            RuleType::NoHoles => "NoHoles",
            RuleType::Exist => "Exist",
            RuleType::Overlap => "Overlap",
            RuleType::IfOverlap => "IfOverlap",
            RuleType::NoOverlap => "NoOverlap",
            RuleType::AnyOverlap => "AnyOverlap",
            RuleType::PartOverlap => "PartOverlap",
            RuleType::AnyNoOverlap => "AnyNoOverlap",
            RuleType::MinArea => "MinArea",
            RuleType::MaxArea => "MaxArea",
            RuleType::MinEdgeLength => "MinEdgeLength",
            RuleType::MinWidth => "MinWidth",
            RuleType::MaxWidth => "MaxWidth",
            RuleType::MinSpace => "MinSpace",
            RuleType::MinSpaceTo => "MinSpaceTo",
            RuleType::MinSpaceFrom => "MinSpaceFrom",
            RuleType::MinOverlap => "MinOverlap",
            RuleType::MinNoOverlap => "MinNoOverlap",
            RuleType::UserDefined => "UserDefined",
        }
    }

    /// Case-insensitive lookup by name.
    pub fn from_name(name: &str) -> Option<RuleType> {
        RuleType::ALL
            .iter()
            .copied()
            .find(|t| t.name().eq_ignore_ascii_case(name))
    }

    pub fn body(self) -> RuleBody {
        match self {
            RuleType::NoRule | RuleType::Connected | RuleType::Exist => RuleBody::Empty,
            RuleType::NoHoles => RuleBody::OptionalArea,
            RuleType::Overlap
            | RuleType::IfOverlap
            | RuleType::NoOverlap
            | RuleType::AnyOverlap
            | RuleType::PartOverlap
            | RuleType::AnyNoOverlap => RuleBody::Target,
            RuleType::MinArea
            | RuleType::MaxArea
            | RuleType::MinEdgeLength
            | RuleType::MinWidth
            | RuleType::MaxWidth
            | RuleType::MinSpace => RuleBody::Dimension,
            RuleType::MinSpaceTo
            | RuleType::MinSpaceFrom
            | RuleType::MinOverlap
            | RuleType::MinNoOverlap => RuleBody::TargetDimension,
            RuleType::UserDefined => RuleBody::UserCall,
        }
    }

    pub fn needs_target(self) -> bool {
        matches!(self.body(), RuleBody::Target | RuleBody::TargetDimension)
    }

    /// Tested once per connected group of the layer instead of per object.
    pub fn is_group_level(self) -> bool {
        matches!(
            self,
            RuleType::MinArea | RuleType::MaxArea | RuleType::NoHoles | RuleType::Connected
        )
    }

    pub fn is_overlap_family(self) -> bool {
        self.body() == RuleBody::Target
    }

    pub fn is_spacing(self) -> bool {
        matches!(
            self,
            RuleType::MinSpace | RuleType::MinSpaceTo | RuleType::MinSpaceFrom
        )
    }

    /// Bit for this type in a [`RuleTypeMask`].
    pub fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One bit per rule type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleTypeMask(u32);

impl RuleTypeMask {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn insert(&mut self, t: RuleType) {
        self.0 |= t.bit();
    }

    pub fn remove(&mut self, t: RuleType) {
        self.0 &= !t.bit();
    }

    pub fn contains(&self, t: RuleType) -> bool {
        self.0 & t.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }
}

/// Distance-dependent spacing: `(length, spacing)` pairs stored flat as read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpacingTable {
    values: Vec<Coord>,
}

impl SpacingTable {
    pub fn new(values: Vec<Coord>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[Coord] {
        &self.values
    }

    pub fn check(&self) -> Result<(), SetupError> {
        if self.values.is_empty() || self.values.len() % 2 != 0 {
            return Err(SetupError::BadSpacingTable(format!(
                "expected length/spacing pairs, found {} values",
                self.values.len()
            )));
        }
        let lens: Vec<Coord> = self.values.chunks_exact(2).map(|p| p[0]).collect();
        if lens.windows(2).any(|w| w[0] >= w[1]) {
            return Err(SetupError::BadSpacingTable(
                "lengths must be strictly increasing".to_string(),
            ));
        }
        if self.values.iter().any(|v| *v < 0) {
            return Err(SetupError::BadSpacingTable(
                "negative entry".to_string(),
            ));
        }
        Ok(())
    }

    /// Spacing of the entry with the largest length not above `length`.
    pub fn lookup(&self, length: f64) -> Option<Coord> {
        self.values
            .chunks_exact(2)
            .filter(|p| p[0] as f64 <= length + 1e-9)
            .last()
            .map(|p| p[1])
    }

    pub fn max_spacing(&self) -> Coord {
        self.values
            .chunks_exact(2)
            .map(|p| p[1])
            .max()
            .unwrap_or(0)
    }
}

/// Reference from a rule to a named user-defined rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCall {
    pub name: String,
    pub args: Vec<String>,
}

/// A single declared check on one layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    rule_type: RuleType,
    pub layer: String,
    pub region: Option<LayerExpr>,
    pub inside: Option<LayerExpr>,
    pub outside: Option<LayerExpr>,
    pub target: Option<LayerExpr>,
    pub dimension: Coord,
    pub table: Option<SpacingTable>,
    /// Dimension for non-Manhattan edges; 0 means use `dimension`.
    pub diagonal: Coord,
    /// Spacing to same-net material; 0 means no exemption.
    pub same_net: Coord,
    /// Required enclosure by the target; 0 means none.
    pub enclosed: Coord,
    /// End-of-line enclosure on opposite sides.
    pub opposite: Option<(Coord, Coord)>,
    /// Minimum width of surviving holes; 0 means none.
    pub hole_width: Coord,
    pub inhibited: bool,
    pub user: Option<UserCall>,
    pub description: Option<String>,
}

impl Rule {
    pub fn new(rule_type: RuleType, layer: &str) -> Self {
        Self {
            rule_type,
            layer: layer.to_string(),
            region: None,
            inside: None,
            outside: None,
            target: None,
            dimension: 0,
            table: None,
            diagonal: 0,
            same_net: 0,
            enclosed: 0,
            opposite: None,
            hole_width: 0,
            inhibited: false,
            user: None,
            description: None,
        }
    }

    pub fn rule_type(&self) -> RuleType {
        self.rule_type
    }

    pub fn with_dimension(mut self, dimension: Coord) -> Self {
        self.dimension = dimension;
        self
    }

    pub fn with_target(mut self, target: LayerExpr) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_region(mut self, region: LayerExpr) -> Self {
        self.region = Some(region);
        self
    }

    pub fn with_description(mut self, desc: &str) -> Self {
        self.description = Some(desc.to_string());
        self
    }

    pub fn with_user(mut self, name: &str, args: &[&str]) -> Self {
        self.user = Some(UserCall {
            name: name.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        });
        self
    }

    /// Dimension to use for an edge; diagonal edges use the diagonal value when set.
    pub fn edge_dimension(&self, manhattan: bool) -> Coord {
        if !manhattan && self.diagonal != 0 {
            self.diagonal
        } else {
            self.dimension
        }
    }

    /// Largest distance this rule looks away from an object. Group-level
    /// rules read whole groups and reach nothing; their dimension is an area.
    pub fn reach(&self) -> Coord {
        if self.rule_type.is_group_level() {
            return 0;
        }
        let table = self.table.as_ref().map_or(0, SpacingTable::max_spacing);
        [
            self.dimension,
            table,
            self.diagonal,
            self.same_net,
            self.enclosed,
            self.hole_width,
            self.opposite.map_or(0, |(a, b)| a.max(b)),
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }

    /// Static checks that do not need geometry.
    pub fn validate(&self) -> Result<(), SetupError> {
        if self.rule_type.needs_target() && self.target.is_none() {
            return Err(SetupError::MissingTarget(self.rule_type));
        }
        if let Some(table) = &self.table {
            table.check()?;
        }
        if self.rule_type == RuleType::UserDefined && self.user.is_none() {
            return Err(SetupError::UnknownUserRule(String::new()));
        }
        Ok(())
    }

    /// Identity used when a rule is re-specified: same layer, type and target.
    pub fn same_slot(&self, other: &Rule) -> bool {
        self.layer == other.layer
            && self.rule_type == other.rule_type
            && self.target.as_ref().map(ToString::to_string)
                == other.target.as_ref().map(ToString::to_string)
            && self.user.as_ref().map(|u| &u.name) == other.user.as_ref().map(|u| &u.name)
    }
}

/// Stable handle to a rule in a [`crate::RuleSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RuleId(pub(crate) usize);

impl RuleId {
    pub fn index(&self) -> usize {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_type_names_round_trip() {
        for t in RuleType::ALL {
            assert_eq!(RuleType::from_name(t.name()), Some(t));
        }
        assert_eq!(RuleType::from_name("minwidth"), Some(RuleType::MinWidth));
        assert_eq!(RuleType::from_name("Bogus"), None);
    }

    #[test]
    fn test_mask_bits_are_distinct() {
        let mut mask = RuleTypeMask::empty();
        mask.insert(RuleType::MinSpace);
        assert!(mask.contains(RuleType::MinSpace));
        assert!(!mask.contains(RuleType::MinSpaceTo));
        mask.remove(RuleType::MinSpace);
        assert!(mask.is_empty());
    }

    #[test]
    fn test_spacing_table_lookup() {
        let table = SpacingTable::new(vec![0, 10, 100, 14, 500, 20]);
        assert!(table.check().is_ok());
        assert_eq!(table.lookup(50.0), Some(10));
        assert_eq!(table.lookup(100.0), Some(14));
        assert_eq!(table.lookup(1000.0), Some(20));
        assert_eq!(table.max_spacing(), 20);

        let first_len_above = SpacingTable::new(vec![10, 5]);
        assert_eq!(first_len_above.lookup(3.0), None);
    }

    #[test]
    fn test_spacing_table_rejects_bad_input() {
        assert!(SpacingTable::new(vec![0, 10, 100]).check().is_err());
        assert!(SpacingTable::new(vec![100, 10, 50, 12]).check().is_err());
        assert!(SpacingTable::new(vec![]).check().is_err());
    }

    #[test]
    fn test_validate_requires_target() {
        let rule = Rule::new(RuleType::MinSpaceTo, "M1").with_dimension(5);
        assert_eq!(
            rule.validate(),
            Err(SetupError::MissingTarget(RuleType::MinSpaceTo))
        );
        let rule = rule.with_target(LayerExpr::layer("M2"));
        assert!(rule.validate().is_ok());
    }

    #[test]
    fn test_diagonal_dimension_falls_back() {
        let mut rule = Rule::new(RuleType::MinWidth, "M1").with_dimension(10);
        assert_eq!(rule.edge_dimension(false), 10);
        rule.diagonal = 8;
        assert_eq!(rule.edge_dimension(false), 8);
        assert_eq!(rule.edge_dimension(true), 10);
    }

    #[test]
    fn test_group_rules_have_no_reach() {
        let area = Rule::new(RuleType::MinArea, "M1").with_dimension(1_000_000);
        assert_eq!(area.reach(), 0);
        let mut holes = Rule::new(RuleType::NoHoles, "M1").with_dimension(400);
        holes.hole_width = 6;
        assert_eq!(holes.reach(), 0);
        assert_eq!(Rule::new(RuleType::MinSpace, "M1").with_dimension(12).reach(), 12);
    }
}

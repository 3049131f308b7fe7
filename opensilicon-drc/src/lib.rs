//! # OpenSilicon DRC
//!
//! Geometric design rule checking for OpenSilicon layouts.
//! Rules are declared per layer in rule decks; a run flattens the checked
//! cell, walks every object's edges and corners against the rules of its
//! layer, and reports violations with the region, edge and rule involved.

pub mod collector;
pub mod config;
pub mod edit;
pub mod error;
pub mod eval;
pub mod jobs;
pub mod layer_expr;
pub mod layout;
pub mod registry;
pub mod report;
pub mod rule;
pub mod run;
pub mod text;
pub mod user_rule;
pub mod violation;
pub mod walker;

pub use collector::{ErrorCollector, RecordingLevel};
pub use config::DrcConfig;
pub use edit::{AddRule, RemoveRule, ReplaceRule, RuleCommand, RuleEditHistory};
pub use error::{ConfigError, DrcError, EvalError, ParseError, SetupError};
pub use eval::{disk_eval, donut_eval, ShapeFault};
pub use jobs::{BatchCommand, JobHandle, JobTracker};
pub use layer_expr::LayerExpr;
pub use registry::{FilterMode, NameFilter, RuleSet};
pub use rule::{Rule, RuleId, RuleType};
pub use run::{AbortHandle, CheckTarget, DrcRun, RunMode, RunOutcome, RunStatus, StopReason};
pub use text::{format_deck, parse_deck, parse_rule};
pub use user_rule::UserRule;
pub use violation::{EdgeRef, ErrorCode, Violation, ViolationReport};

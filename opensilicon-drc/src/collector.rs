//! Violation collection with recording-level and error-count policy.

use std::collections::HashSet;
use std::fmt;

use opensilicon_core::BBox;
use serde::{Deserialize, Serialize};

use crate::rule::RuleType;
use crate::violation::Violation;

/// How much detail is kept per object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RecordingLevel {
    /// The first violation of each object.
    #[default]
    PerObject,
    /// The first violation of each rule type on each object.
    PerObjectType,
    All,
}

impl RecordingLevel {
    pub fn name(self) -> &'static str {
        match self {
            RecordingLevel::PerObject => "PerObject",
            RecordingLevel::PerObjectType => "PerObjectType",
            RecordingLevel::All => "All",
        }
    }

    pub fn from_name(s: &str) -> Option<RecordingLevel> {
        [
            RecordingLevel::PerObject,
            RecordingLevel::PerObjectType,
            RecordingLevel::All,
        ]
        .into_iter()
        .find(|l| l.name().eq_ignore_ascii_case(s))
    }

    /// Levels are also set by number: 0 per object, 1 per type, 2 all.
    pub fn from_index(i: i64) -> RecordingLevel {
        match i {
            i if i <= 0 => RecordingLevel::PerObject,
            1 => RecordingLevel::PerObjectType,
            _ => RecordingLevel::All,
        }
    }

    pub fn index(self) -> i64 {
        self as i64
    }
}

impl fmt::Display for RecordingLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorState {
    Accumulating,
    Filtered,
    Delivered,
    Discarded,
}

/// Result of offering a violation to the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Recorded,
    /// Dropped by the recording level or because the list is closed.
    Suppressed,
    /// The error ceiling is reached; the run should stop.
    Full,
}

/// Accumulates violations for one run.
#[derive(Debug)]
pub struct ErrorCollector {
    level: RecordingLevel,
    /// 0 means unlimited.
    max_errors: usize,
    state: CollectorState,
    violations: Vec<Violation>,
    seen: HashSet<(usize, Option<RuleType>)>,
    suppressed: usize,
}

impl ErrorCollector {
    pub fn new(level: RecordingLevel, max_errors: usize) -> Self {
        Self {
            level,
            max_errors,
            state: CollectorState::Accumulating,
            violations: Vec::new(),
            seen: HashSet::new(),
            suppressed: 0,
        }
    }

    pub fn level(&self) -> RecordingLevel {
        self.level
    }

    pub fn state(&self) -> CollectorState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.violations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    /// Number of violations dropped by the recording level.
    pub fn suppressed(&self) -> usize {
        self.suppressed
    }

    pub fn is_full(&self) -> bool {
        self.max_errors > 0 && self.violations.len() >= self.max_errors
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    /// True when the recording level still admits a violation of
    /// `rule_type` on `object`. Lets callers skip rules whose results would
    /// be dropped.
    pub fn wants(&self, object: usize, rule_type: RuleType) -> bool {
        match self.level {
            RecordingLevel::All => true,
            RecordingLevel::PerObject => !self.seen.contains(&(object, None)),
            RecordingLevel::PerObjectType => !self.seen.contains(&(object, Some(rule_type))),
        }
    }

    pub fn add(&mut self, v: Violation) -> Admission {
        if self.state != CollectorState::Accumulating {
            log::debug!("violation offered to a {:?} collector", self.state);
            return Admission::Suppressed;
        }
        if self.is_full() {
            return Admission::Full;
        }
        if !self.wants(v.object, v.rule_type) {
            self.suppressed += 1;
            return Admission::Suppressed;
        }
        let key = match self.level {
            RecordingLevel::PerObjectType => (v.object, Some(v.rule_type)),
            _ => (v.object, None),
        };
        self.seen.insert(key);
        self.violations.push(v);
        if self.is_full() {
            Admission::Full
        } else {
            Admission::Recorded
        }
    }

    /// Remove duplicates and, given an area, violations that do not touch
    /// it. Closes the list to further additions.
    pub fn filter(&mut self, area: Option<&BBox>) {
        if self.state != CollectorState::Accumulating {
            return;
        }
        let before = self.violations.len();
        let mut keys = HashSet::with_capacity(before);
        self.violations.retain(|v| {
            let inside = match (area, v.bbox()) {
                (Some(area), Some(bb)) => area.intersects(&bb),
                _ => true,
            };
            inside && keys.insert((v.rule, v.object, v.edge, v.code, v.region().to_vec()))
        });
        if self.violations.len() != before {
            log::debug!("filtered {} violations", before - self.violations.len());
        }
        self.state = CollectorState::Filtered;
    }

    /// Hand the violations to the caller, filtering first if needed.
    pub fn deliver(&mut self) -> Vec<Violation> {
        match self.state {
            CollectorState::Accumulating => self.filter(None),
            CollectorState::Filtered => {}
            _ => return Vec::new(),
        }
        self.state = CollectorState::Delivered;
        std::mem::take(&mut self.violations)
    }

    pub fn discard(&mut self) {
        self.violations.clear();
        self.seen.clear();
        self.state = CollectorState::Discarded;
    }
}

//! Run controller: one DRC pass over a cell or an area of it.
//!
//! A run moves Idle → Initializing → Evaluating → Finalizing → Idle. Every
//! object is checked against the active rules of its layer; violations go
//! through an [`ErrorCollector`]. Abort requests and interactive limits are
//! polled between objects, never in the middle of one.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use opensilicon_core::{BBox, Coord, Kernel, LayoutDatabase};
use serde::Serialize;

use crate::collector::{Admission, ErrorCollector};
use crate::config::DrcConfig;
use crate::error::{DrcError, EvalError};
use crate::eval::{select, EvalContext, TestFn};
use crate::layout::{flatten_objects, FlatLayout, FlatObject};
use crate::registry::RuleSet;
use crate::report::{LogFooter, LogHeader, ReportWriter};
use crate::rule::{Rule, RuleId};
use crate::violation::ViolationReport;

/// Objects between interrupt polls.
pub const POLL_OBJECTS: usize = 64;
/// Longest time between interrupt polls.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Grid edge for gridded runs when no partition size is configured.
pub const DEFAULT_PARTITION: Coord = 10_000;
/// Log footer status of a run stopped by a geometry failure.
pub const FAILED_STATUS: &str = "failed";

/// What a run checks. Without a target the layout's top cell is checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckTarget {
    Cell(String),
    /// Objects of the cell touching the area.
    Region(String, BBox),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum RunMode {
    /// No limits besides the error ceiling. Partitioned when the partition
    /// size is set.
    #[default]
    Batch,
    /// Bounded by object, time and error limits.
    Interactive,
    /// Always partitioned.
    Gridded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Initializing,
    Evaluating,
    Finalizing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    ErrorLimit,
    ObjectLimit,
    TimeLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    Completed,
    StoppedEarly(StopReason),
    Aborted,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Completed => f.write_str("completed"),
            RunStatus::StoppedEarly(StopReason::ErrorLimit) => f.write_str("stopped-early:errors"),
            RunStatus::StoppedEarly(StopReason::ObjectLimit) => f.write_str("stopped-early:objects"),
            RunStatus::StoppedEarly(StopReason::TimeLimit) => f.write_str("stopped-early:time"),
            RunStatus::Aborted => f.write_str("aborted"),
        }
    }
}

/// Cloneable flag for stopping a run from elsewhere.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn abort(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Result of a finished run.
#[derive(Debug, Serialize)]
pub struct RunOutcome {
    pub cell: String,
    pub status: RunStatus,
    pub reports: Vec<ViolationReport>,
    /// Rules skipped because they could not be set up.
    pub setup_errors: Vec<String>,
    pub objects_checked: usize,
    pub elapsed: Duration,
}

/// A rule ready to run: its test chosen once.
struct Prepared<'r> {
    id: RuleId,
    rule: &'r Rule,
    test: TestFn,
}

/// Limits in force for one run.
struct Limits {
    max_objects: usize,
    max_time: Option<Duration>,
}

struct Poller {
    started: Instant,
    last_poll: Instant,
    since_poll: usize,
}

impl Poller {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            started: now,
            last_poll: now,
            since_poll: 0,
        }
    }

    /// True when it is time to look at the abort flag and the clock.
    fn due(&mut self) -> bool {
        self.since_poll += 1;
        if self.since_poll >= POLL_OBJECTS || self.last_poll.elapsed() >= POLL_INTERVAL {
            self.since_poll = 0;
            self.last_poll = Instant::now();
            true
        } else {
            false
        }
    }
}

pub struct DrcRun<'a> {
    db: &'a LayoutDatabase,
    rules: &'a RuleSet,
    config: &'a DrcConfig,
    mode: RunMode,
    target: Option<CheckTarget>,
    kernel: Kernel,
    abort: AbortHandle,
    log: Option<Box<dyn Write + 'a>>,
    source: Option<String>,
    state: RunState,
}

impl<'a> DrcRun<'a> {
    pub fn new(db: &'a LayoutDatabase, rules: &'a RuleSet, config: &'a DrcConfig) -> Self {
        Self {
            db,
            rules,
            config,
            mode: RunMode::Batch,
            target: None,
            kernel: Kernel::default(),
            abort: AbortHandle::default(),
            log: None,
            source: None,
            state: RunState::Idle,
        }
    }

    pub fn mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn target(mut self, target: CheckTarget) -> Self {
        self.target = Some(target);
        self
    }

    pub fn kernel(mut self, kernel: Kernel) -> Self {
        self.kernel = kernel;
        self
    }

    /// Write a violation log to `out` as the run finishes.
    pub fn log_to(mut self, out: impl Write + 'a) -> Self {
        self.log = Some(Box::new(out));
        self
    }

    /// Source description written into the log header.
    pub fn source(mut self, source: &str) -> Self {
        self.source = Some(source.to_string());
        self
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    fn enter(&mut self, state: RunState) {
        log::debug!("DRC run: {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    fn partitioned(&self) -> bool {
        match self.mode {
            RunMode::Gridded => true,
            RunMode::Batch => self.config.partition_size > 0,
            RunMode::Interactive => false,
        }
    }

    fn limits(&self) -> Limits {
        match self.mode {
            RunMode::Interactive => Limits {
                max_objects: self.config.intr_max_objects,
                max_time: (self.config.intr_max_time > 0)
                    .then(|| Duration::from_millis(self.config.intr_max_time)),
            },
            _ => Limits {
                max_objects: 0,
                max_time: None,
            },
        }
    }

    fn max_errors(&self) -> usize {
        match self.mode {
            RunMode::Interactive => self.config.intr_max_errors,
            _ => self.config.max_errors,
        }
    }

    fn resolve_cell(&self) -> Result<(opensilicon_core::CellId, String, Option<BBox>), DrcError> {
        let (name, area) = match &self.target {
            Some(CheckTarget::Cell(name)) => (Some(name.as_str()), None),
            Some(CheckTarget::Region(name, area)) => (Some(name.as_str()), Some(*area)),
            None => (None, None),
        };
        let cell = match name {
            Some(name) => self
                .db
                .find_cell_by_name(name)
                .ok_or_else(|| DrcError::CellNotFound(name.to_string()))?,
            None => {
                let id = self.db.top_cell.ok_or(DrcError::NoTopCell)?;
                self.db
                    .get_cell(&id)
                    .ok_or_else(|| DrcError::CellNotFound(id.to_string()))?
            }
        };
        Ok((cell.id, cell.name.clone(), area))
    }

    /// Active rules per layer, after the type mask and the filters.
    fn prepare(&self, setup_errors: &mut Vec<String>) -> BTreeMap<&'a str, Vec<Prepared<'a>>> {
        let layer_filter = self.config.layer_filter();
        let rule_filter = self.config.rule_filter();
        let rules: &'a RuleSet = self.rules;
        let mut out: BTreeMap<&'a str, Vec<Prepared<'a>>> = BTreeMap::new();
        for layer in rules.layers() {
            if !layer_filter.allows(layer) {
                log::debug!("layer {layer} filtered out");
                continue;
            }
            for (id, rule) in rules.rules_for_layer(layer) {
                if !rules.is_active(rule) || !rule_filter.allows(rule.rule_type().name()) {
                    continue;
                }
                if let Err(e) = rule.validate() {
                    log::warn!("skipping {} rule on {layer}: {e}", rule.rule_type());
                    setup_errors.push(format!("{layer} {}: {e}", rule.rule_type()));
                    continue;
                }
                out.entry(layer).or_default().push(Prepared {
                    id,
                    rule,
                    test: select(rule.rule_type()),
                });
            }
        }
        out
    }

    pub fn run(&mut self) -> Result<RunOutcome, DrcError> {
        let mut poller = Poller::new();
        self.enter(RunState::Initializing);
        let result = self.run_inner(&mut poller);
        self.enter(RunState::Idle);
        result
    }

    fn run_inner(&mut self, poller: &mut Poller) -> Result<RunOutcome, DrcError> {
        let (cell_id, cell_name, area) = self.resolve_cell()?;
        let mut setup_errors = Vec::new();
        let prepared = self.prepare(&mut setup_errors);
        let known: Vec<String> = self
            .db
            .layer_stack
            .all_layers()
            .iter()
            .map(|l| l.name.clone())
            .collect();
        let whole = FlatLayout::new(
            self.kernel,
            flatten_objects(self.db, &cell_id, &self.kernel)?,
            known.iter().cloned(),
        );

        let skip_instances = self.mode == RunMode::Interactive && self.config.intr_skip_instances;
        let selected: HashSet<usize> = whole
            .objects()
            .iter()
            .filter(|o| area.map_or(true, |a| a.intersects(&o.bbox)))
            .filter(|o| !skip_instances || o.is_top_level())
            .filter(|o| prepared.contains_key(o.layer.as_str()))
            .map(|o| o.index)
            .collect();
        log::info!(
            "DRC {} on cell {cell_name}: {} of {} objects, {} rules",
            match self.mode {
                RunMode::Batch => "batch",
                RunMode::Interactive => "interactive",
                RunMode::Gridded => "gridded",
            },
            selected.len(),
            whole.len(),
            prepared.values().map(Vec::len).sum::<usize>()
        );

        let halo = prepared
            .values()
            .flatten()
            .map(|p| p.rule.reach())
            .max()
            .unwrap_or(0)
            + 1;
        let partitions = if self.partitioned() {
            let size = match self.config.partition_size {
                0 => DEFAULT_PARTITION,
                n => n,
            };
            partition(&whole, &selected, area, size, halo)
        } else {
            vec![Partition {
                home: whole
                    .objects()
                    .iter()
                    .map(|o| o.index)
                    .filter(|i| selected.contains(i))
                    .collect(),
                reach: None,
            }]
        };

        self.enter(RunState::Evaluating);
        let mut collector = ErrorCollector::new(self.config.recording_level, self.max_errors());
        let limits = self.limits();
        let mut reported_setup: HashSet<RuleId> = HashSet::new();
        let mut checked = 0usize;
        let mut status = RunStatus::Completed;
        let mut failure = None;

        'batches: for part in partitions {
            let local;
            let layout = match part.reach {
                Some(reach) => {
                    let members = whole
                        .touching(&reach)
                        .into_iter()
                        .map(|pos| whole.object(pos).clone())
                        .collect();
                    local = FlatLayout::new(self.kernel, members, known.iter().cloned());
                    &local
                }
                None => &whole,
            };
            let ctx = EvalContext::new(layout, self.rules, self.config.corner_angle).within(&whole, &selected);
            for idx in part.home {
                let Some(pos) = layout.position_of(idx) else {
                    continue;
                };
                if poller.due() {
                    if self.abort.is_aborted() {
                        status = RunStatus::Aborted;
                        break 'batches;
                    }
                    if limits.max_time.is_some_and(|t| poller.started.elapsed() >= t) {
                        status = RunStatus::StoppedEarly(StopReason::TimeLimit);
                        break 'batches;
                    }
                }
                if limits.max_objects > 0 && checked >= limits.max_objects {
                    status = RunStatus::StoppedEarly(StopReason::ObjectLimit);
                    break 'batches;
                }
                let obj = layout.object(pos);
                checked += 1;
                let Some(rules) = prepared.get(obj.layer.as_str()) else {
                    continue;
                };
                match check_object(&ctx, obj, rules, &mut collector, &mut reported_setup, &mut setup_errors) {
                    Ok(false) => {}
                    Ok(true) => {
                        status = RunStatus::StoppedEarly(StopReason::ErrorLimit);
                        break 'batches;
                    }
                    Err(e) => {
                        log::error!("DRC on cell {cell_name} failed at object {idx}: {e}");
                        failure = Some(e);
                        break 'batches;
                    }
                }
            }
        }
        if self.abort.is_aborted() && status == RunStatus::Completed {
            status = RunStatus::Aborted;
        }

        self.enter(RunState::Finalizing);
        collector.filter(area.as_ref());
        let violations = collector.deliver();
        let reports: Vec<ViolationReport> = violations
            .iter()
            .filter_map(|v| {
                let rule = self.rules.get(v.rule)?;
                let obj = whole.object(whole.position_of(v.object)?);
                Some(ViolationReport::new(v, rule, obj))
            })
            .collect();

        let elapsed = poller.started.elapsed();
        if let Some(out) = self.log.take() {
            let header = LogHeader {
                cell: cell_name.clone(),
                area,
                source: self.source.clone(),
            };
            let mut writer = ReportWriter::new(out, &header)?;
            for r in &reports {
                writer.violation(r)?;
            }
            writer.finish(&LogFooter {
                violations: reports.len(),
                objects: checked,
                status: match &failure {
                    Some(_) => FAILED_STATUS.to_string(),
                    None => status.to_string(),
                },
                elapsed_ms: elapsed.as_millis(),
            })?;
        }
        if let Some(e) = failure {
            return Err(e);
        }
        log::info!(
            "DRC on cell {cell_name} {status}: {} violations, {checked} objects, {} ms",
            reports.len(),
            elapsed.as_millis()
        );
        Ok(RunOutcome {
            cell: cell_name,
            status,
            reports,
            setup_errors,
            objects_checked: checked,
            elapsed,
        })
    }
}

/// Run every rule of the object's layer. Returns true when the error ceiling
/// was reached.
fn check_object(
    ctx: &EvalContext<'_>,
    obj: &FlatObject,
    rules: &[Prepared<'_>],
    collector: &mut ErrorCollector,
    reported_setup: &mut HashSet<RuleId>,
    setup_errors: &mut Vec<String>,
) -> Result<bool, DrcError> {
    for p in rules {
        if !collector.wants(obj.index, p.rule.rule_type()) {
            continue;
        }
        let mut found = Vec::new();
        match (p.test)(ctx, obj, p.id, p.rule, &mut found) {
            Ok(()) => {}
            Err(EvalError::Setup(e)) => {
                if reported_setup.insert(p.id) {
                    log::warn!("{} rule on {}: {e}", p.rule.rule_type(), p.rule.layer);
                    setup_errors.push(format!("{} {}: {e}", p.rule.layer, p.rule.rule_type()));
                }
                continue;
            }
            Err(EvalError::Kernel(e)) => return Err(DrcError::Kernel(e)),
        }
        for v in found {
            if collector.add(v) == Admission::Full {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// Objects checked together. `reach` bounds the objects loaded for them;
/// `None` evaluates against the whole cell.
struct Partition {
    home: Vec<usize>,
    reach: Option<BBox>,
}

/// Split the selected objects into grid cells of `size`. Each one is checked
/// in the cell holding its bbox lower-left corner; a cell's layout holds
/// everything within `halo` of it. Layouts are built when a cell is reached.
fn partition(
    whole: &FlatLayout,
    selected: &HashSet<usize>,
    area: Option<BBox>,
    size: Coord,
    halo: Coord,
) -> Vec<Partition> {
    let size = size.max(1);
    let objects = whole.objects();
    let extent = area.or_else(|| objects.iter().map(|o| o.bbox).reduce(|a, b| a.union(&b)));
    let Some(extent) = extent else {
        return Vec::new();
    };
    let mut cells: BTreeMap<(Coord, Coord), (Vec<usize>, BBox)> = BTreeMap::new();
    for o in objects.iter().filter(|o| selected.contains(&o.index)) {
        let (i, j) = (
            (o.bbox.min.x - extent.min.x).div_euclid(size).max(0),
            (o.bbox.min.y - extent.min.y).div_euclid(size).max(0),
        );
        let (x0, y0) = (extent.min.x + i * size, extent.min.y + j * size);
        let cell = cells
            .entry((i, j))
            .or_insert_with(|| (Vec::new(), BBox::from_coords(x0, y0, x0 + size, y0 + size).expand(halo)));
        cell.0.push(o.index);
        // Home objects may stick out of the cell.
        cell.1 = cell.1.union(&o.bbox.expand(halo));
    }
    log::debug!("partitioned into {} grid cells of {size}", cells.len());
    cells
        .into_values()
        .map(|(home, reach)| Partition {
            home,
            reach: Some(reach),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::RecordingLevel;
    use crate::text::parse_deck;
    use opensilicon_core::{Cell, CellInstance, GeomPrimitive, Layer, Point, Polygon, Rect, Transform};

    fn db(rects: &[(i64, i64, i64, i64)]) -> LayoutDatabase {
        let mut db = LayoutDatabase::new("t");
        db.layer_stack.add_layer(Layer::new(1, "M1", 68, 20));
        let mut top = Cell::new("top");
        for &(x0, y0, x1, y1) in rects {
            top.add_geometry(GeomPrimitive::Rect(Rect::new(1, x0, y0, x1, y1)));
        }
        db.add_cell(top);
        db
    }

    /// `n` 5x5 squares, 20 apart.
    fn squares(n: i64) -> LayoutDatabase {
        let rects: Vec<_> = (0..n).map(|i| (i * 20, 0, i * 20 + 5, 5)).collect();
        db(&rects)
    }

    #[test]
    fn test_uniform_square_reports_once() {
        let db = db(&[(0, 0, 10, 10)]);
        let rules = parse_deck("Layer M1\nMinWidth 12\n").unwrap();
        let cfg = DrcConfig::default();
        let out = DrcRun::new(&db, &rules, &cfg).run().unwrap();
        assert_eq!(out.status, RunStatus::Completed);
        assert_eq!(out.reports.len(), 1);
        assert_eq!(out.reports[0].edge, crate::violation::EdgeRef::AllEdges);
    }

    #[test]
    fn test_interactive_error_limit() {
        let db = squares(10);
        let rules = parse_deck("Layer M1\nMinWidth 12\n").unwrap();
        let mut cfg = DrcConfig::default();
        cfg.recording_level = RecordingLevel::All;
        cfg.intr_max_errors = 3;
        let out = DrcRun::new(&db, &rules, &cfg)
            .mode(RunMode::Interactive)
            .run()
            .unwrap();
        assert_eq!(out.status, RunStatus::StoppedEarly(StopReason::ErrorLimit));
        assert_eq!(out.reports.len(), 3);
    }

    #[test]
    fn test_interactive_object_limit() {
        let db = squares(10);
        let rules = parse_deck("Layer M1\nMinWidth 2\n").unwrap();
        let mut cfg = DrcConfig::default();
        cfg.intr_max_objects = 4;
        let out = DrcRun::new(&db, &rules, &cfg)
            .mode(RunMode::Interactive)
            .run()
            .unwrap();
        assert_eq!(out.status, RunStatus::StoppedEarly(StopReason::ObjectLimit));
        assert_eq!(out.objects_checked, 4);
    }

    #[test]
    fn test_abort_before_run() {
        let db = squares(3);
        let rules = parse_deck("Layer M1\nMinWidth 2\n").unwrap();
        let cfg = DrcConfig::default();
        let mut run = DrcRun::new(&db, &rules, &cfg);
        run.abort_handle().abort();
        let out = run.run().unwrap();
        assert_eq!(out.status, RunStatus::Aborted);
        assert_eq!(run.state(), RunState::Idle);
    }

    #[test]
    fn test_gridded_matches_flat() {
        let db = squares(12);
        let rules = parse_deck("Layer M1\nMinWidth 6\nMinSpace 16\n").unwrap();
        let mut cfg = DrcConfig::default();
        cfg.recording_level = RecordingLevel::All;
        let flat = DrcRun::new(&db, &rules, &cfg).run().unwrap();
        cfg.partition_size = 100;
        let gridded = DrcRun::new(&db, &rules, &cfg).run().unwrap();
        assert_eq!(flat.reports.len(), gridded.reports.len());
        let mut a: Vec<_> = flat.reports.iter().map(|r| (r.object_index, r.bbox)).collect();
        let mut b: Vec<_> = gridded.reports.iter().map(|r| (r.object_index, r.bbox)).collect();
        a.sort_by_key(|(i, bb)| (*i, bb.min.x, bb.min.y));
        b.sort_by_key(|(i, bb)| (*i, bb.min.x, bb.min.y));
        assert_eq!(a, b);
    }

    #[test]
    fn test_region_target_and_skip_instances() {
        let mut db = db(&[(0, 0, 5, 5), (100, 0, 105, 5)]);
        let mut sub = Cell::new("sub");
        sub.add_geometry(GeomPrimitive::Rect(Rect::new(1, 0, 0, 5, 5)));
        let sub_id = db.add_cell(sub);
        let top_id = db.top_cell.unwrap();
        db.get_cell_mut(&top_id)
            .unwrap()
            .add_instance(CellInstance::new(sub_id, "u1", Transform::translate(0, 50)));
        let rules = parse_deck("Layer M1\nMinWidth 10\n").unwrap();
        let mut cfg = DrcConfig::default();

        let out = DrcRun::new(&db, &rules, &cfg)
            .target(CheckTarget::Region("top".to_string(), BBox::from_coords(-10, -10, 50, 100)))
            .run()
            .unwrap();
        assert_eq!(out.reports.len(), 2);
        assert!(out.reports.iter().any(|r| r.instance_path == vec!["u1".to_string()]));

        cfg.intr_skip_instances = true;
        let out = DrcRun::new(&db, &rules, &cfg)
            .mode(RunMode::Interactive)
            .run()
            .unwrap();
        assert_eq!(out.reports.len(), 2);
        assert!(out.reports.iter().all(|r| r.instance_path.is_empty()));
    }

    #[test]
    fn test_setup_error_skips_rule() {
        let db = squares(2);
        let rules = parse_deck("Layer M1\nMinSpaceTo NOPE 3\nMinWidth 10\n").unwrap();
        let cfg = DrcConfig::default();
        let out = DrcRun::new(&db, &rules, &cfg).run().unwrap();
        assert_eq!(out.status, RunStatus::Completed);
        assert_eq!(out.setup_errors.len(), 1);
        assert_eq!(out.reports.len(), 2);
    }

    #[test]
    fn test_kernel_failure_aborts_run() {
        let mut db = squares(2);
        let top_id = db.top_cell.unwrap();
        db.get_cell_mut(&top_id).unwrap().add_geometry(GeomPrimitive::Polygon(Polygon::new(
            1,
            vec![
                Point::new(0, 20),
                Point::new(30, 20),
                Point::new(30, 30),
                Point::new(10, 30),
                Point::new(10, 50),
                Point::new(0, 50),
            ],
        )));
        let rules = parse_deck("Layer M1\nMinWidth 10\n").unwrap();
        let cfg = DrcConfig::default();
        let mut log = Vec::new();
        let err = DrcRun::new(&db, &rules, &cfg)
            .kernel(Kernel::new(1))
            .log_to(&mut log)
            .run()
            .unwrap_err();
        assert!(matches!(err, DrcError::Kernel(_)));
        let text = String::from_utf8(log).unwrap();
        let footer = text.lines().last().unwrap();
        assert!(footer.starts_with(crate::report::LOG_FOOTER_PREFIX));
        assert!(footer.contains(&format!("status={FAILED_STATUS}")));
    }

    fn gridded_and_flat(db: &LayoutDatabase, deck: &str) -> (RunOutcome, RunOutcome) {
        let rules = parse_deck(deck).unwrap();
        let mut cfg = DrcConfig::default();
        cfg.recording_level = RecordingLevel::All;
        let flat = DrcRun::new(db, &rules, &cfg).run().unwrap();
        cfg.partition_size = 100;
        let gridded = DrcRun::new(db, &rules, &cfg).run().unwrap();
        (flat, gridded)
    }

    #[test]
    fn test_gridded_connected_sees_whole_cell() {
        // A chain of twenty abutting squares across several grid cells and
        // one stray square far away.
        let mut rects: Vec<_> = (0..20).map(|i| (i * 10, 0, i * 10 + 10, 10)).collect();
        rects.push((1000, 0, 1005, 5));
        let (flat, gridded) = gridded_and_flat(&db(&rects), "Layer M1\nConnected\n");
        for out in [&flat, &gridded] {
            assert_eq!(out.reports.len(), 1);
            assert_eq!(out.reports[0].object_index, 20);
        }
    }

    #[test]
    fn test_gridded_area_counts_group_once() {
        // 250 units long, spread over three grid cells.
        let rects: Vec<_> = (0..25).map(|i| (i * 10, 0, i * 10 + 10, 1)).collect();
        let (flat, gridded) = gridded_and_flat(&db(&rects), "Layer M1\nMinArea 1000\n");
        assert_eq!(flat.reports.len(), 1);
        assert_eq!(gridded.reports.len(), 1);
        assert_eq!(gridded.reports[0].bbox, BBox::from_coords(0, 0, 250, 1));
    }

    #[test]
    fn test_gridded_hole_across_cells() {
        // A ring around a 10x10 hole, split by the grid line at x = 100.
        let db = db(&[
            (0, 0, 5, 5),
            (90, 0, 120, 10),
            (90, 20, 120, 30),
            (90, 10, 100, 20),
            (110, 10, 120, 20),
        ]);
        let (flat, gridded) = gridded_and_flat(&db, "Layer M1\nNoHoles\n");
        for out in [&flat, &gridded] {
            assert_eq!(out.reports.len(), 1);
            assert_eq!(out.reports[0].code, crate::violation::ErrorCode::HoleTooSmall);
        }
    }

    #[test]
    fn test_region_area_reported_inside_region() {
        let db = db(&[(0, 0, 10, 10), (10, 0, 20, 10), (20, 0, 30, 10)]);
        let rules = parse_deck("Layer M1\nMinArea 1000\n").unwrap();
        let cfg = DrcConfig::default();
        let full = DrcRun::new(&db, &rules, &cfg).run().unwrap();
        assert_eq!(full.reports.len(), 1);
        assert_eq!(full.reports[0].object_index, 0);

        let region = DrcRun::new(&db, &rules, &cfg)
            .target(CheckTarget::Region("top".to_string(), BBox::from_coords(22, 2, 28, 8)))
            .run()
            .unwrap();
        assert_eq!(region.reports.len(), 1);
        assert_eq!(region.reports[0].object_index, 2);
        assert_eq!(region.reports[0].bbox, BBox::from_coords(0, 0, 30, 10));
    }

    #[test]
    fn test_partition_halo_ignores_area_rules() {
        let db = squares(30);
        let rules = parse_deck("Layer M1\nMinArea 1000000\nMinSpace 4\n").unwrap();
        let reaches: Vec<_> = rules.rules_for_layer("M1").map(|(_, r)| r.reach()).collect();
        assert_eq!(reaches.iter().max(), Some(&4));

        let known = ["M1"];
        let kernel = Kernel::default();
        let whole = FlatLayout::new(kernel, flatten_objects(&db, &db.top_cell.unwrap(), &kernel).unwrap(), known);
        let selected: HashSet<usize> = whole.objects().iter().map(|o| o.index).collect();
        let parts = partition(&whole, &selected, None, 100, 5);
        assert_eq!(parts.len(), 6);
        for p in &parts {
            let reach = p.reach.unwrap();
            assert!(whole.touching(&reach).len() < 8);
        }
    }

    #[test]
    fn test_missing_cell() {
        let db = squares(1);
        let rules = RuleSet::new();
        let cfg = DrcConfig::default();
        let err = DrcRun::new(&db, &rules, &cfg)
            .target(CheckTarget::Cell("nope".to_string()))
            .run()
            .unwrap_err();
        assert!(matches!(err, DrcError::CellNotFound(_)));
    }
}

use std::io::Write;

use opensilicon_core::{Cell, GeomPrimitive, Layer, LayoutDatabase, Rect};
use opensilicon_drc::report::{read_log, LOG_FOOTER_PREFIX, LOG_HEADER_PREFIX};
use opensilicon_drc::{
    format_deck, parse_deck, DrcConfig, DrcRun, EdgeRef, ErrorCode, RecordingLevel, RuleEditHistory, RuleType,
    RunMode, RunStatus, StopReason,
};

fn layout(rects: &[(u32, i64, i64, i64, i64)]) -> LayoutDatabase {
    let mut db = LayoutDatabase::new("chip");
    db.layer_stack.add_layer(Layer::new(1, "M1", 68, 20));
    db.layer_stack.add_layer(Layer::new(2, "M2", 69, 20));
    let mut top = Cell::new("top");
    for &(layer, x0, y0, x1, y1) in rects {
        top.add_geometry(GeomPrimitive::Rect(Rect::new(layer, x0, y0, x1, y1)));
    }
    db.add_cell(top);
    db
}

const DECK: &str = "\
# metal rules
Layer M1
  MinWidth 12 \"m1 width\"
  MinSpace 10
Layer M2
  MinArea 400
";

#[test]
fn undersized_square_is_one_violation_on_all_edges() {
    let db = layout(&[(1, 0, 0, 10, 10)]);
    let rules = parse_deck("Layer M1\nMinWidth 12\n").unwrap();
    let cfg = DrcConfig::default();
    let out = DrcRun::new(&db, &rules, &cfg).run().unwrap();

    assert_eq!(out.status, RunStatus::Completed);
    assert_eq!(out.reports.len(), 1);
    let r = &out.reports[0];
    assert_eq!(r.rule_type, RuleType::MinWidth);
    assert_eq!(r.edge, EdgeRef::AllEdges);
    assert_eq!(r.layer, "M1");
}

#[test]
fn deck_prints_back_unchanged() {
    let set = parse_deck(DECK).unwrap();
    let printed = format_deck(&set);
    assert_eq!(format_deck(&parse_deck(&printed).unwrap()), printed);
}

#[test]
fn spacing_and_area_across_layers() {
    let db = layout(&[
        (1, 0, 0, 20, 20),
        (1, 25, 0, 45, 20),
        (2, 0, 100, 10, 110),
        (2, 50, 100, 80, 130),
    ]);
    let rules = parse_deck(DECK).unwrap();
    let mut cfg = DrcConfig::default();
    cfg.recording_level = RecordingLevel::All;
    let out = DrcRun::new(&db, &rules, &cfg).run().unwrap();

    let m1: Vec<_> = out.reports.iter().filter(|r| r.layer == "M1").collect();
    assert!(!m1.is_empty());
    assert!(m1.iter().all(|r| r.rule_type == RuleType::MinSpace));
    assert!(m1.iter().any(|r| r.code == ErrorCode::Space));

    let m2: Vec<_> = out.reports.iter().filter(|r| r.layer == "M2").collect();
    assert_eq!(m2.len(), 1);
    assert_eq!(m2[0].rule_type, RuleType::MinArea);
    assert_eq!(m2[0].bbox.min.x, 0);
}

#[test]
fn interactive_run_stops_at_error_limit() {
    let rects: Vec<_> = (0..20).map(|i| (1, i * 30, 0, i * 30 + 5, 5)).collect();
    let db = layout(&rects);
    let rules = parse_deck("Layer M1\nMinWidth 12\n").unwrap();
    let mut cfg = DrcConfig::default();
    cfg.set_named("IntrMaxErrors", "5").unwrap();

    let out = DrcRun::new(&db, &rules, &cfg)
        .mode(RunMode::Interactive)
        .run()
        .unwrap();
    assert_eq!(out.status, RunStatus::StoppedEarly(StopReason::ErrorLimit));
    assert_eq!(out.reports.len(), 5);

    let out = DrcRun::new(&db, &rules, &cfg).run().unwrap();
    assert_eq!(out.status, RunStatus::Completed);
    assert_eq!(out.reports.len(), 20);
}

#[test]
fn overlap_checks_are_symmetric() {
    let rules = parse_deck("Layer M1\nNoOverlap M2\nLayer M2\nNoOverlap M1\n").unwrap();
    let cfg = DrcConfig::default();
    for (m2, expect) in [((5, 5, 30, 30), true), ((40, 0, 60, 20), false)] {
        let db = layout(&[(1, 0, 0, 20, 20), (2, m2.0, m2.1, m2.2, m2.3)]);
        let out = DrcRun::new(&db, &rules, &cfg).run().unwrap();
        let on = |layer: &str| out.reports.iter().any(|r| r.layer == layer);
        assert_eq!(on("M1"), expect);
        assert_eq!(on("M2"), expect);
    }
}

#[test]
fn violations_are_logged_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("top.drc.log");
    let db = layout(&[(1, 0, 0, 10, 10), (1, 100, 0, 108, 40)]);
    let rules = parse_deck("Layer M1\nMinWidth 12\n").unwrap();
    let cfg = DrcConfig::default();

    let file = std::fs::File::create(&path).unwrap();
    let out = DrcRun::new(&db, &rules, &cfg)
        .source("metal.deck")
        .log_to(file)
        .run()
        .unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    let first = text.lines().next().unwrap();
    assert!(first.starts_with(LOG_HEADER_PREFIX));
    assert!(first.contains("cell=top"));
    assert!(text.lines().last().unwrap().starts_with(LOG_FOOTER_PREFIX));

    let logged = read_log(&text).unwrap();
    assert_eq!(logged.len(), out.reports.len());
    for (l, r) in logged.iter().zip(&out.reports) {
        assert_eq!(l.rule_type, r.rule_type);
        assert_eq!(l.message, r.message);
        assert_eq!(l.edge, r.edge);
    }
}

#[test]
fn settings_load_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, r#"{{ "max_errors": 2, "recording_level": "All", "rule_filter": "MinSpace", "rule_filter_mode": "Skip" }}"#)
        .unwrap();
    let cfg = DrcConfig::load(file.path()).unwrap();
    assert_eq!(cfg.max_errors, 2);
    assert_eq!(cfg.recording_level, RecordingLevel::All);

    let rects: Vec<_> = (0..6).map(|i| (1, i * 12, 0, i * 12 + 5, 5)).collect();
    let db = layout(&rects);
    let rules = parse_deck("Layer M1\nMinWidth 8\nMinSpace 10\n").unwrap();
    let out = DrcRun::new(&db, &rules, &cfg).run().unwrap();
    assert_eq!(out.status, RunStatus::StoppedEarly(StopReason::ErrorLimit));
    assert_eq!(out.reports.len(), 2);
    assert!(out.reports.iter().all(|r| r.rule_type == RuleType::MinWidth));
}

#[test]
fn edited_rules_take_effect() {
    let db = layout(&[(1, 0, 0, 10, 10)]);
    let mut rules = parse_deck("Layer M1\nMinWidth 12\n").unwrap();
    let cfg = DrcConfig::default();
    let (id, _) = rules.rules_for_layer("M1").next().unwrap();
    let loose = opensilicon_drc::parse_rule("M1", "MinWidth 8").unwrap();

    let mut history = RuleEditHistory::new();
    history.execute(Box::new(opensilicon_drc::ReplaceRule::new(id, loose)), &mut rules);
    assert!(DrcRun::new(&db, &rules, &cfg).run().unwrap().reports.is_empty());

    history.undo(&mut rules);
    assert_eq!(DrcRun::new(&db, &rules, &cfg).run().unwrap().reports.len(), 1);
}

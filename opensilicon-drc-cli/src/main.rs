//! OpenSilicon DRC CLI - batch design rule checks of JSON layouts.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use opensilicon_core::{BBox, LayoutDatabase, LayoutError};
use opensilicon_drc::jobs::CELL_PLACEHOLDER;
use opensilicon_drc::{
    disk_eval, donut_eval, parse_deck, BatchCommand, CheckTarget, ConfigError, DrcConfig, DrcError,
    DrcRun, JobTracker, ParseError, RunMode, RunOutcome, RunStatus, RuleSet,
};
use thiserror::Error;

#[derive(Parser)]
#[command(name = "opensilicon-drc")]
#[command(about = "Design rule checker for OpenSilicon layouts", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct RunArgs {
    /// Rule deck
    #[arg(short, long, value_name = "DECK")]
    rules: PathBuf,

    /// Settings file (JSON)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override a setting, e.g. --set MaxErrors=100
    #[arg(long = "set", value_name = "NAME=VALUE")]
    settings: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Check one cell of a layout
    Check {
        /// Layout database (JSON)
        #[arg(value_name = "LAYOUT")]
        layout: PathBuf,

        #[command(flatten)]
        run: RunArgs,

        /// Cell to check; defaults to the top cell
        #[arg(long)]
        cell: Option<String>,

        /// Limit the check to an area: x0,y0,x1,y1
        #[arg(long, value_parser = parse_area)]
        area: Option<BBox>,

        #[arg(short, long, value_enum, default_value = "batch")]
        mode: Mode,

        /// Write the violation log here
        #[arg(long, value_name = "FILE")]
        log: Option<PathBuf>,

        #[arg(short, long, value_enum, default_value = "human")]
        format: OutputFormat,

        /// Exit with status 1 when violations are found
        #[arg(long)]
        fail_on_violations: bool,
    },

    /// Check every cell of a layout, one background process per cell
    CheckAll {
        #[arg(value_name = "LAYOUT")]
        layout: PathBuf,

        #[command(flatten)]
        run: RunArgs,

        /// Directory for the per-cell logs
        #[arg(long, value_name = "DIR", default_value = ".")]
        log_dir: PathBuf,
    },

    /// Check a disk or donut against a layer's rules before drawing it
    Round {
        #[arg(short, long, value_name = "DECK")]
        rules: PathBuf,

        #[arg(long)]
        layer: String,

        /// Outer diameter
        #[arg(long)]
        diameter: i64,

        /// Hole diameter; makes the shape a donut
        #[arg(long)]
        hole: Option<i64>,
    },

    /// Print the effective settings
    Settings {
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        #[arg(long = "set", value_name = "NAME=VALUE")]
        settings: Vec<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Batch,
    Interactive,
    Gridded,
}

impl From<Mode> for RunMode {
    fn from(m: Mode) -> Self {
        match m {
            Mode::Batch => RunMode::Batch,
            Mode::Interactive => RunMode::Interactive,
            Mode::Gridded => RunMode::Gridded,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// One line per violation
    Human,
    /// The full run outcome as JSON
    Json,
}

#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Drc(#[from] DrcError),

    #[error("rule deck: {0}")]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error("{path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("bad setting '{0}', expected NAME=VALUE")]
    BadSetting(String),

    #[error("JSON output: {0}")]
    Json(#[from] serde_json::Error),
}

fn parse_area(s: &str) -> Result<BBox, String> {
    let v: Vec<i64> = s
        .split(',')
        .map(|p| p.trim().parse::<i64>().map_err(|e| format!("'{p}': {e}")))
        .collect::<Result<_, _>>()?;
    match v.as_slice() {
        [x0, y0, x1, y1] => Ok(BBox::from_coords(*x0, *y0, *x1, *y1)),
        _ => Err("expected x0,y0,x1,y1".to_string()),
    }
}

fn read(path: &Path) -> Result<String, CliError> {
    std::fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn load_rules(path: &Path) -> Result<RuleSet, CliError> {
    Ok(parse_deck(&read(path)?)?)
}

fn load_config(path: Option<&Path>, overrides: &[String]) -> Result<DrcConfig, CliError> {
    let mut cfg = match path {
        Some(p) => DrcConfig::load(p)?,
        None => DrcConfig::default(),
    };
    for s in overrides {
        let (name, value) = s
            .split_once('=')
            .ok_or_else(|| CliError::BadSetting(s.clone()))?;
        cfg.set_named(name.trim(), value.trim())?;
    }
    Ok(cfg)
}

fn print_outcome(outcome: &RunOutcome, format: OutputFormat) -> Result<(), CliError> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(outcome)?),
        OutputFormat::Human => {
            for r in &outcome.reports {
                let b = &r.bbox;
                println!(
                    "{} [{}] ({}, {}) - ({}, {}): {}",
                    r.layer, r.rule_type, b.min.x, b.min.y, b.max.x, b.max.y, r.message
                );
            }
            for e in &outcome.setup_errors {
                println!("setup error: {e}");
            }
            println!(
                "{}: {} violations, {} objects checked, {} ({} ms)",
                outcome.cell,
                outcome.reports.len(),
                outcome.objects_checked,
                outcome.status,
                outcome.elapsed.as_millis()
            );
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn handle_check(
    layout: &Path,
    run: &RunArgs,
    cell: Option<String>,
    area: Option<BBox>,
    mode: Mode,
    log: Option<&Path>,
    format: OutputFormat,
    fail_on_violations: bool,
) -> Result<i32, CliError> {
    let db = LayoutDatabase::from_json(&read(layout)?)?;
    let rules = load_rules(&run.rules)?;
    let cfg = load_config(run.config.as_deref(), &run.settings)?;

    let mut drc = DrcRun::new(&db, &rules, &cfg)
        .mode(mode.into())
        .source(&run.rules.display().to_string());
    match (cell, area) {
        (Some(name), Some(a)) => drc = drc.target(CheckTarget::Region(name, a)),
        (Some(name), None) => drc = drc.target(CheckTarget::Cell(name)),
        (None, Some(a)) => {
            let top = db
                .top_cell
                .as_ref()
                .and_then(|id| db.get_cell(id))
                .ok_or(DrcError::NoTopCell)?;
            drc = drc.target(CheckTarget::Region(top.name.clone(), a));
        }
        (None, None) => {}
    }
    if let Some(path) = log {
        let file = File::create(path).map_err(DrcError::Io)?;
        drc = drc.log_to(BufWriter::new(file));
    }
    let outcome = drc.run()?;
    print_outcome(&outcome, format)?;

    let failed = fail_on_violations && !outcome.reports.is_empty();
    Ok(match outcome.status {
        RunStatus::Aborted => 2,
        _ if failed => 1,
        _ => 0,
    })
}

fn handle_check_all(layout: &Path, run: &RunArgs, log_dir: &Path) -> Result<i32, CliError> {
    let db = LayoutDatabase::from_json(&read(layout)?)?;
    // Parse up front so a bad deck fails once instead of in every job.
    load_rules(&run.rules)?;
    let exe = std::env::current_exe().map_err(DrcError::Io)?;
    let mut cmd = BatchCommand::new(exe)
        .arg("check")
        .arg(layout.display().to_string())
        .arg("--rules")
        .arg(run.rules.display().to_string())
        .arg("--cell")
        .arg(CELL_PLACEHOLDER)
        .arg("--log")
        .arg(log_dir.join(format!("{CELL_PLACEHOLDER}.drc.log")).display().to_string());
    if let Some(c) = &run.config {
        cmd = cmd.arg("--config").arg(c.display().to_string());
    }
    for s in &run.settings {
        cmd = cmd.arg("--set").arg(s.clone());
    }

    let mut tracker = JobTracker::new();
    for name in db.cell_names() {
        let job = tracker.start(name, &cmd)?;
        println!("started {} (pid {})", job.cell, job.pid);
    }
    let mut failures = 0;
    while !tracker.is_empty() {
        for done in tracker.poll()? {
            if !done.status.success() {
                failures += 1;
            }
            println!("finished {} (pid {}): {}", done.handle.cell, done.handle.pid, done.status);
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    Ok(i32::from(failures > 0))
}

fn handle_round(rules: &Path, layer: &str, diameter: i64, hole: Option<i64>) -> Result<i32, CliError> {
    let rules = load_rules(rules)?;
    let faults = match hole {
        Some(inner) => donut_eval(&rules, layer, diameter, inner),
        None => disk_eval(&rules, layer, diameter),
    };
    for f in &faults {
        println!("{} {}: {}", layer, f.rule_type, f.message);
    }
    Ok(i32::from(!faults.is_empty()))
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Check {
            layout,
            run,
            cell,
            area,
            mode,
            log,
            format,
            fail_on_violations,
        } => handle_check(
            &layout,
            &run,
            cell,
            area,
            mode,
            log.as_deref(),
            format,
            fail_on_violations,
        ),
        Commands::CheckAll {
            layout,
            run,
            log_dir,
        } => handle_check_all(&layout, &run, &log_dir),
        Commands::Round {
            rules,
            layer,
            diameter,
            hole,
        } => handle_round(&rules, &layer, diameter, hole),
        Commands::Settings { config, settings } => {
            load_config(config.as_deref(), &settings).and_then(|cfg| {
                println!("{}", cfg.to_json()?);
                Ok(0)
            })
        }
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(2);
        }
    }
}

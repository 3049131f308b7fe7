//! Run settings.
//!
//! Settings load from JSON with defaults for anything missing, and can be set
//! one at a time by name (`MaxErrors`, `IntrMaxTime`, ...). Every value is
//! clamped to its allowed range on load and on set.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::collector::RecordingLevel;
use crate::error::ConfigError;
use crate::registry::{FilterMode, NameFilter};
use crate::walker::{DEFAULT_CORNER_ANGLE, MAX_CORNER_ANGLE, MIN_CORNER_ANGLE};

/// Allowed range and default of a numeric setting.
#[derive(Debug, Clone, Copy)]
pub struct SettingSpec {
    pub name: &'static str,
    pub min: i64,
    pub default: i64,
    pub max: i64,
}

impl SettingSpec {
    pub fn clamp(&self, v: i64) -> i64 {
        v.clamp(self.min, self.max)
    }
}

const fn setting(name: &'static str, min: i64, default: i64, max: i64) -> SettingSpec {
    SettingSpec {
        name,
        min,
        default,
        max,
    }
}

pub const MAX_ERRORS: SettingSpec = setting("MaxErrors", 0, 0, 1_000_000);
pub const INTR_MAX_OBJECTS: SettingSpec = setting("IntrMaxObjects", 0, 1000, 100_000);
pub const INTR_MAX_TIME: SettingSpec = setting("IntrMaxTime", 0, 2000, 60_000);
pub const INTR_MAX_ERRORS: SettingSpec = setting("IntrMaxErrors", 0, 50, 1000);
pub const RECORDING_LEVEL: SettingSpec = setting("RecordingLevel", 0, 0, 2);
pub const PARTITION_SIZE: SettingSpec = setting("PartitionSize", 0, 0, 100_000_000);
pub const CORNER_ANGLE: SettingSpec = setting(
    "CornerAngle",
    MIN_CORNER_ANGLE as i64,
    DEFAULT_CORNER_ANGLE as i64,
    MAX_CORNER_ANGLE as i64,
);

/// Smallest non-zero partition edge; smaller values are raised to it.
pub const MIN_PARTITION: i64 = 100;

pub const NUMERIC_SETTINGS: [SettingSpec; 7] = [
    MAX_ERRORS,
    INTR_MAX_OBJECTS,
    INTR_MAX_TIME,
    INTR_MAX_ERRORS,
    RECORDING_LEVEL,
    PARTITION_SIZE,
    CORNER_ANGLE,
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrcConfig {
    /// Error ceiling for batch runs; 0 is unlimited.
    pub max_errors: usize,
    pub intr_max_objects: usize,
    /// Milliseconds.
    pub intr_max_time: u64,
    pub intr_max_errors: usize,
    pub recording_level: RecordingLevel,
    /// Grid edge for partitioned runs; 0 disables partitioning.
    pub partition_size: i64,
    pub corner_angle: u32,
    pub layer_filter: String,
    pub layer_filter_mode: FilterMode,
    pub rule_filter: String,
    pub rule_filter_mode: FilterMode,
    /// Interactive runs check only top-level geometry.
    pub intr_skip_instances: bool,
}

impl Default for DrcConfig {
    fn default() -> Self {
        Self {
            max_errors: MAX_ERRORS.default as usize,
            intr_max_objects: INTR_MAX_OBJECTS.default as usize,
            intr_max_time: INTR_MAX_TIME.default as u64,
            intr_max_errors: INTR_MAX_ERRORS.default as usize,
            recording_level: RecordingLevel::from_index(RECORDING_LEVEL.default),
            partition_size: PARTITION_SIZE.default,
            corner_angle: DEFAULT_CORNER_ANGLE,
            layer_filter: String::new(),
            layer_filter_mode: FilterMode::Skip,
            rule_filter: String::new(),
            rule_filter_mode: FilterMode::Skip,
            intr_skip_instances: false,
        }
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(name, value)),
    }
}

fn parse_mode(name: &str, value: &str) -> Result<FilterMode, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "only" => Ok(FilterMode::Only),
        "skip" => Ok(FilterMode::Skip),
        _ => Err(invalid(name, value)),
    }
}

fn invalid(name: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.to_string(),
        value: value.to_string(),
    }
}

impl DrcConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let cfg = Self::from_json(&text)?;
        log::info!("loaded DRC settings from {}", path.display());
        Ok(cfg)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let mut cfg: DrcConfig = serde_json::from_str(text)?;
        cfg.clamp();
        Ok(cfg)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Bring every numeric setting into its allowed range.
    pub fn clamp(&mut self) {
        let c = |spec: &SettingSpec, v: i64| spec.clamp(v);
        self.max_errors = c(&MAX_ERRORS, self.max_errors as i64) as usize;
        self.intr_max_objects = c(&INTR_MAX_OBJECTS, self.intr_max_objects as i64) as usize;
        self.intr_max_time = c(&INTR_MAX_TIME, self.intr_max_time as i64) as u64;
        self.intr_max_errors = c(&INTR_MAX_ERRORS, self.intr_max_errors as i64) as usize;
        self.corner_angle = c(&CORNER_ANGLE, self.corner_angle as i64) as u32;
        let p = c(&PARTITION_SIZE, self.partition_size);
        self.partition_size = if p > 0 { p.max(MIN_PARTITION) } else { 0 };
    }

    /// Set one setting by name. Numbers out of range are clamped, not
    /// rejected.
    pub fn set_named(&mut self, name: &str, value: &str) -> Result<(), ConfigError> {
        let number = || value.trim().parse::<i64>().map_err(|_| invalid(name, value));
        match name.to_ascii_lowercase().as_str() {
            "maxerrors" => self.max_errors = number()?.max(0) as usize,
            "intrmaxobjects" => self.intr_max_objects = number()?.max(0) as usize,
            "intrmaxtime" => self.intr_max_time = number()?.max(0) as u64,
            "intrmaxerrors" => self.intr_max_errors = number()?.max(0) as usize,
            "partitionsize" => self.partition_size = number()?,
            "cornerangle" => self.corner_angle = number()?.clamp(0, u32::MAX as i64) as u32,
            "recordinglevel" => {
                self.recording_level = match value.trim().parse::<i64>() {
                    Ok(n) => RecordingLevel::from_index(RECORDING_LEVEL.clamp(n)),
                    Err(_) => RecordingLevel::from_name(value.trim()).ok_or_else(|| invalid(name, value))?,
                }
            }
            "layerfilter" => self.layer_filter = value.trim().to_string(),
            "layerfiltermode" => self.layer_filter_mode = parse_mode(name, value)?,
            "rulefilter" => self.rule_filter = value.trim().to_string(),
            "rulefiltermode" => self.rule_filter_mode = parse_mode(name, value)?,
            "intrskipinstances" => self.intr_skip_instances = parse_bool(name, value)?,
            _ => return Err(ConfigError::UnknownSetting(name.to_string())),
        }
        self.clamp();
        log::debug!("DRC setting {name} = {value}");
        Ok(())
    }

    pub fn layer_filter(&self) -> NameFilter {
        NameFilter::new(self.layer_filter_mode, &self.layer_filter)
    }

    pub fn rule_filter(&self) -> NameFilter {
        NameFilter::new(self.rule_filter_mode, &self.rule_filter)
    }
}

//! Comparison parameters.
//!
//! [`ComparisonConfig`] is what the comparison engine consumes. It can be
//! built directly or parsed from string key/value options as supplied by an
//! operation front-end (see [`ComparisonConfig::from_options`]).

use std::collections::BTreeMap;

use log::warn;
use thiserror::Error;

use crate::enums::{ComparisonMethod, DiscrepancyKind, is_prefix_of};

pub const METHOD_KEY: &str = "Method";
pub const DISCREPANCY_KIND_KEY: &str = "DiscType";
pub const CHANNEL_KEY: &str = "Channel";
pub const TEST_LOWER_KEY: &str = "TestImgLowerThreshold";
pub const TEST_UPPER_KEY: &str = "TestImgUpperThreshold";
pub const REFERENCE_LOWER_KEY: &str = "RefImgLowerThreshold";
pub const REFERENCE_UPPER_KEY: &str = "RefImgUpperThreshold";
pub const DTA_ABS_KEY: &str = "DTAVoxValEqAbs";
pub const DTA_REL_KEY: &str = "DTAVoxValEqRelDiff";
pub const DTA_MAX_KEY: &str = "DTAMax";
pub const GAMMA_DTA_KEY: &str = "GammaDTAThreshold";
pub const GAMMA_DISC_KEY: &str = "GammaDiscThreshold";
pub const GAMMA_TERMINATE_KEY: &str = "GammaTerminateAboveOne";

const KNOWN_KEYS: [&str; 13] = [
    METHOD_KEY,
    DISCREPANCY_KIND_KEY,
    CHANNEL_KEY,
    TEST_LOWER_KEY,
    TEST_UPPER_KEY,
    REFERENCE_LOWER_KEY,
    REFERENCE_UPPER_KEY,
    DTA_ABS_KEY,
    DTA_REL_KEY,
    DTA_MAX_KEY,
    GAMMA_DTA_KEY,
    GAMMA_DISC_KEY,
    GAMMA_TERMINATE_KEY,
];

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Method '{0}' not understood")]
    UnknownMethod(String),

    #[error("Discrepancy type '{0}' not understood")]
    UnknownDiscrepancyKind(String),

    #[error("Option {key}: '{value}' is not a number")]
    InvalidNumber { key: String, value: String },

    #[error("Option {key}: '{value}' is not a channel index")]
    InvalidChannel { key: String, value: String },

    #[error("Option {key}: '{value}' is not a boolean")]
    InvalidBoolean { key: String, value: String },

    #[error("Parameter {name} must be non-negative, got {value}")]
    NegativeParameter { name: &'static str, value: f64 },
}

/// Inclusive value range. NaN bounds exclude everything, as does a range
/// with `lower > upper`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueRange {
    pub lower: f64,
    pub upper: f64,
}

impl ValueRange {
    pub const ALL: Self = Self {
        lower: f64::NEG_INFINITY,
        upper: f64::INFINITY,
    };

    pub fn new(lower: f64, upper: f64) -> Self {
        Self { lower, upper }
    }

    #[inline]
    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }
}

impl Default for ValueRange {
    fn default() -> Self {
        Self::ALL
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonConfig {
    pub method: ComparisonMethod,
    pub discrepancy_kind: DiscrepancyKind,
    /// Channel compared in both volumes
    pub channel: usize,
    /// Only test voxels with values in this range are overwritten
    pub test_range: ValueRange,
    /// Only reference voxels with values in this range take part
    pub reference_range: ValueRange,
    /// Absolute value difference considered equal by the DTA search
    pub dta_abs_tolerance: f64,
    /// Relative value difference (%) considered equal by the DTA search
    pub dta_rel_tolerance: f64,
    /// Search radius (mm)
    pub dta_max: f64,
    /// Gamma distance criterion (mm)
    pub gamma_dta_threshold: f64,
    /// Gamma discrepancy criterion (%)
    pub gamma_discrepancy_threshold: f64,
    /// Stop the gamma search once the index is known to exceed one
    pub gamma_terminate_above_one: bool,
}

impl Default for ComparisonConfig {
    fn default() -> Self {
        Self {
            method: ComparisonMethod::GammaIndex,
            discrepancy_kind: DiscrepancyKind::Relative,
            channel: 0,
            test_range: ValueRange::ALL,
            reference_range: ValueRange::ALL,
            dta_abs_tolerance: 1.0e-3,
            dta_rel_tolerance: 1.0,
            dta_max: 30.0,
            gamma_dta_threshold: 5.0,
            gamma_discrepancy_threshold: 5.0,
            gamma_terminate_above_one: true,
        }
    }
}

impl ComparisonConfig {
    /// Check tolerances, radii and thresholds are non-negative numbers.
    /// Infinite values are accepted.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let parameters = [
            ("DTA absolute tolerance", self.dta_abs_tolerance),
            ("DTA relative tolerance", self.dta_rel_tolerance),
            ("DTA maximum", self.dta_max),
            ("gamma DTA threshold", self.gamma_dta_threshold),
            ("gamma discrepancy threshold", self.gamma_discrepancy_threshold),
        ];
        for (name, value) in parameters {
            if !(value >= 0.0) {
                return Err(ConfigError::NegativeParameter { name, value });
            }
        }
        Ok(())
    }

    /// Parse string options. Missing keys keep their default value and
    /// unrecognised keys are ignored with a warning.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for unparsable values or if the result fails
    /// [`Self::validate`].
    pub fn from_options(options: &BTreeMap<String, String>) -> Result<Self, ConfigError> {
        for key in options.keys() {
            if !KNOWN_KEYS.contains(&key.as_str()) {
                warn!("Ignoring unknown comparison option '{key}'");
            }
        }

        let mut config = Self::default();
        if let Some(value) = options.get(METHOD_KEY) {
            config.method = value.parse()?;
        }
        if let Some(value) = options.get(DISCREPANCY_KIND_KEY) {
            config.discrepancy_kind = value.parse()?;
        }
        if let Some(value) = options.get(CHANNEL_KEY) {
            config.channel = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidChannel {
                    key: CHANNEL_KEY.to_string(),
                    value: value.clone(),
                })?;
        }

        let number = |key: &str, default: f64| -> Result<f64, ConfigError> {
            match options.get(key) {
                Some(value) => parse_number(key, value),
                None => Ok(default),
            }
        };
        config.test_range = ValueRange::new(
            number(TEST_LOWER_KEY, config.test_range.lower)?,
            number(TEST_UPPER_KEY, config.test_range.upper)?,
        );
        config.reference_range = ValueRange::new(
            number(REFERENCE_LOWER_KEY, config.reference_range.lower)?,
            number(REFERENCE_UPPER_KEY, config.reference_range.upper)?,
        );
        config.dta_abs_tolerance = number(DTA_ABS_KEY, config.dta_abs_tolerance)?;
        config.dta_rel_tolerance = number(DTA_REL_KEY, config.dta_rel_tolerance)?;
        config.dta_max = number(DTA_MAX_KEY, config.dta_max)?;
        config.gamma_dta_threshold = number(GAMMA_DTA_KEY, config.gamma_dta_threshold)?;
        config.gamma_discrepancy_threshold =
            number(GAMMA_DISC_KEY, config.gamma_discrepancy_threshold)?;

        if let Some(value) = options.get(GAMMA_TERMINATE_KEY) {
            config.gamma_terminate_above_one = parse_bool(GAMMA_TERMINATE_KEY, value)?;
        }

        config.validate()?;
        Ok(config)
    }
}

/// Accepts reals plus `inf`, `-inf` and `nan` (any case).
fn parse_number(key: &str, value: &str) -> Result<f64, ConfigError> {
    value
        .trim()
        .parse::<f64>()
        .map_err(|_| ConfigError::InvalidNumber {
            key: key.to_string(),
            value: value.to_string(),
        })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    if is_prefix_of(value, "true") {
        Ok(true)
    } else if is_prefix_of(value, "false") {
        Ok(false)
    } else {
        Err(ConfigError::InvalidBoolean {
            key: key.to_string(),
            value: value.to_string(),
        })
    }
}

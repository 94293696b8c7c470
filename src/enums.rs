use std::fmt;
use std::str::FromStr;

use crate::config::ConfigError;

/// The per-voxel metric written into the test volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ComparisonMethod {
    Discrepancy,
    DistanceToAgreement,
    #[default]
    GammaIndex,
}

/// How a discrepancy between test and reference values is expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiscrepancyKind {
    /// Signed percent difference relative to the reference value.
    #[default]
    Relative,
    /// Signed difference `test - reference` in voxel value units.
    Difference,
    /// Signed percent difference relative to the largest reference magnitude.
    PinnedToMax,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortBy {
    /// Order slices by their position along the stack normal.
    #[default]
    SlicePosition,
    None,
}

/// Case-insensitive, non-empty prefix match against `word`.
pub(crate) fn is_prefix_of(input: &str, word: &str) -> bool {
    let input = input.trim();
    !input.is_empty()
        && input.len() <= word.len()
        && word[..input.len()].eq_ignore_ascii_case(input)
}

impl FromStr for ComparisonMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // "d" is claimed by DTA before discrepancy.
        if is_prefix_of(s, "gamma-index") {
            Ok(Self::GammaIndex)
        } else if is_prefix_of(s, "dta") {
            Ok(Self::DistanceToAgreement)
        } else if is_prefix_of(s, "discrepancy") {
            Ok(Self::Discrepancy)
        } else {
            Err(ConfigError::UnknownMethod(s.to_string()))
        }
    }
}

impl FromStr for DiscrepancyKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if is_prefix_of(s, "relative") {
            Ok(Self::Relative)
        } else if is_prefix_of(s, "difference") {
            Ok(Self::Difference)
        } else if is_prefix_of(s, "pinned-to-max") {
            Ok(Self::PinnedToMax)
        } else {
            Err(ConfigError::UnknownDiscrepancyKind(s.to_string()))
        }
    }
}

impl fmt::Display for ComparisonMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discrepancy => write!(f, "discrepancy"),
            Self::DistanceToAgreement => write!(f, "DTA"),
            Self::GammaIndex => write!(f, "gamma-index"),
        }
    }
}

impl fmt::Display for DiscrepancyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Relative => write!(f, "relative"),
            Self::Difference => write!(f, "difference"),
            Self::PinnedToMax => write!(f, "pinned-to-max"),
        }
    }
}

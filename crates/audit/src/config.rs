use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::AuditError;
use crate::period::Period;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub tolerance: ToleranceConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub series: SeriesConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    /// Input file locations. Only the CLI reads these; the engine receives
    /// pre-loaded records.
    #[serde(default)]
    pub inputs: Option<InputsConfig>,
}

fn default_name() -> String {
    "session audit".into()
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            tolerance: ToleranceConfig::default(),
            watch: WatchConfig::default(),
            series: SeriesConfig::default(),
            identity: IdentityConfig::default(),
            inputs: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tolerance
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ToleranceConfig {
    /// Largest |diff| (in sessions) still considered consistent.
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
    /// SESSION_DROP fires when `curr < prev * drop_ratio`.
    #[serde(default = "default_drop_ratio")]
    pub drop_ratio: f64,
    /// Relative payroll deviation tolerated before PAYROLL_MISMATCH.
    #[serde(default = "default_fee_ratio")]
    pub fee_ratio: f64,
}

fn default_epsilon() -> f64 {
    0.1
}

fn default_drop_ratio() -> f64 {
    0.5
}

fn default_fee_ratio() -> f64 {
    0.1
}

impl Default for ToleranceConfig {
    fn default() -> Self {
        Self {
            epsilon: default_epsilon(),
            drop_ratio: default_drop_ratio(),
            fee_ratio: default_fee_ratio(),
        }
    }
}

// ---------------------------------------------------------------------------
// Watch periods
// ---------------------------------------------------------------------------

/// Periods subject to the abuse-oriented classification rule.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WatchConfig {
    #[serde(default)]
    pub periods: Vec<Period>,
}

impl WatchConfig {
    pub fn contains(&self, period: Period) -> bool {
        self.periods.contains(&period)
    }
}

// ---------------------------------------------------------------------------
// Series keying
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeriesConfig {
    #[serde(default)]
    pub key: SeriesKey,
}

/// How ledger records are grouped into series.
///
/// `TrainerMember` keeps the payroll sheets' composite key: a member who
/// switches trainer mid-year gets two disjoint series. `Member` keys by the
/// member alone and reports each switch as a `TRAINER_CHANGED` case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesKey {
    #[default]
    TrainerMember,
    Member,
}

impl std::fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TrainerMember => write!(f, "trainer_member"),
            Self::Member => write!(f, "member"),
        }
    }
}

// ---------------------------------------------------------------------------
// Identity matching
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdentityConfig {
    #[serde(default)]
    pub strategy: IdentityStrategy,
    /// Regex rewrites applied in order (`normalized` only).
    #[serde(default)]
    pub rules: Vec<NameRule>,
    /// Known alias → canonical name, applied after the rules (`normalized` only).
    #[serde(default)]
    pub mappings: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityStrategy {
    #[default]
    Exact,
    CaseInsensitive,
    Normalized,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NameRule {
    pub pattern: String,
    #[serde(default)]
    pub replacement: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct InputsConfig {
    pub ledger: String,
    #[serde(default)]
    pub purchases: Option<String>,
    #[serde(default)]
    pub directory: Option<String>,
    #[serde(default)]
    pub trainers: Option<String>,
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl AuditConfig {
    pub fn from_toml(input: &str) -> Result<Self, AuditError> {
        let config: AuditConfig =
            toml::from_str(input).map_err(|e| AuditError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AuditError> {
        let t = &self.tolerance;
        if !t.epsilon.is_finite() || t.epsilon < 0.0 {
            return Err(AuditError::ConfigValidation(format!(
                "tolerance.epsilon must be a non-negative number, got {}",
                t.epsilon
            )));
        }
        if !t.drop_ratio.is_finite() || t.drop_ratio <= 0.0 || t.drop_ratio > 1.0 {
            return Err(AuditError::ConfigValidation(format!(
                "tolerance.drop_ratio must be in (0, 1], got {}",
                t.drop_ratio
            )));
        }
        if !t.fee_ratio.is_finite() || t.fee_ratio < 0.0 {
            return Err(AuditError::ConfigValidation(format!(
                "tolerance.fee_ratio must be a non-negative number, got {}",
                t.fee_ratio
            )));
        }

        let id = &self.identity;
        if id.strategy != IdentityStrategy::Normalized
            && (!id.rules.is_empty() || !id.mappings.is_empty())
        {
            return Err(AuditError::ConfigValidation(
                "identity.rules and identity.mappings require strategy = \"normalized\"".into(),
            ));
        }
        for rule in &id.rules {
            regex::Regex::new(&rule.pattern).map_err(|e| {
                AuditError::ConfigValidation(format!(
                    "identity rule pattern '{}' is not a valid regex: {e}",
                    rule.pattern
                ))
            })?;
        }

        if let Some(ref inputs) = self.inputs {
            if inputs.ledger.trim().is_empty() {
                return Err(AuditError::ConfigValidation("inputs.ledger must not be empty".into()));
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

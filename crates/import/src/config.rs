use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("Invalid reference pattern '{pattern}': {source}")]
    ReferencePattern {
        pattern: String,
        source: regex::Error,
    },
}

/// How a group is keyed at one mining level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupingKey {
    /// Normalized description text.
    Description,
    /// `{bank_account}|{currency}|{description}`.
    AccountCurrencyDescription,
    /// `{bank_account}|{currency}`.
    AccountCurrency,
}

/// Denominator used when computing a field's confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceBasis {
    /// Count of non-empty values for the field.
    NonEmpty,
    /// Size of the whole group, empties included.
    GroupSize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelConfig {
    pub key: GroupingKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_support: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_fixed: Option<f64>,
}

impl LevelConfig {
    pub fn new(key: GroupingKey) -> Self {
        Self {
            key,
            min_support: None,
            confidence_fixed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinerConfig {
    /// Dominant-value share at or above which a column is fixed.
    pub confidence_fixed: f64,
    /// Lower bound of the variable band; `None` (`false` in TOML) disables
    /// variable columns.
    #[serde(
        deserialize_with = "deserialize_band",
        skip_serializing_if = "Option::is_none"
    )]
    pub confidence_variable: Option<f64>,
    pub basis: ConfidenceBasis,
    pub min_support: usize,
    /// Shortest normalized description that can form a level-1 group.
    pub min_description_len: usize,
    pub min_pattern_len: usize,
    pub max_pattern_len: usize,
    /// Skip rows already covered by a rule from a higher level.
    pub exclude_covered: bool,
    pub grouping_levels: Vec<LevelConfig>,
}

impl MinerConfig {
    /// Fixed at >= 85 %, variable band from 65 %, confidence over non-empty values.
    pub fn soft() -> Self {
        Self {
            confidence_fixed: 0.85,
            confidence_variable: Some(0.65),
            basis: ConfidenceBasis::NonEmpty,
            min_support: 3,
            min_description_len: 6,
            min_pattern_len: 3,
            max_pattern_len: 256,
            exclude_covered: true,
            grouping_levels: default_levels(),
        }
    }

    /// Only unanimous columns, confidence over the whole group.
    pub fn perfect() -> Self {
        Self {
            confidence_fixed: 1.0,
            confidence_variable: None,
            basis: ConfidenceBasis::GroupSize,
            min_support: 2,
            ..Self::soft()
        }
    }

    pub fn level_min_support(&self, level: &LevelConfig) -> usize {
        level.min_support.unwrap_or(self.min_support)
    }

    pub fn level_confidence_fixed(&self, level: &LevelConfig) -> f64 {
        level.confidence_fixed.unwrap_or(self.confidence_fixed)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let in_unit = |v: f64| v > 0.0 && v <= 1.0;
        if !in_unit(self.confidence_fixed) {
            return Err(invalid("mining.confidence_fixed must be in (0, 1]"));
        }
        if let Some(variable) = self.confidence_variable {
            if !in_unit(variable) || variable >= self.confidence_fixed {
                return Err(invalid(
                    "mining.confidence_variable must be in (0, confidence_fixed)",
                ));
            }
        }
        if self.min_support == 0 {
            return Err(invalid("mining.min_support must be at least 1"));
        }
        if self.min_pattern_len > self.max_pattern_len {
            return Err(invalid("mining.min_pattern_len exceeds max_pattern_len"));
        }
        if self.grouping_levels.is_empty() {
            return Err(invalid("mining.grouping_levels must not be empty"));
        }
        for level in &self.grouping_levels {
            if level.min_support == Some(0) {
                return Err(invalid("level min_support must be at least 1"));
            }
            if let Some(fixed) = level.confidence_fixed {
                if !in_unit(fixed) {
                    return Err(invalid("level confidence_fixed must be in (0, 1]"));
                }
            }
        }
        Ok(())
    }
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self::soft()
    }
}

fn deserialize_band<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Band {
        Bound(f64),
        Enabled(bool),
    }

    match Band::deserialize(deserializer)? {
        Band::Bound(v) => Ok(Some(v)),
        Band::Enabled(false) => Ok(None),
        Band::Enabled(true) => Err(serde::de::Error::custom(
            "confidence_variable must be a number or false",
        )),
    }
}

fn default_levels() -> Vec<LevelConfig> {
    vec![
        LevelConfig::new(GroupingKey::Description),
        LevelConfig::new(GroupingKey::AccountCurrencyDescription),
        LevelConfig::new(GroupingKey::AccountCurrency),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceConfig {
    pub enabled: bool,
    pub patterns: Vec<String>,
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            patterns: vec![r"AE\d+".to_string(), r"OFFICE \d+ \w+".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplyConfig {
    /// Only the first N rules in ranked order are considered.
    pub max_rules: Option<usize>,
    pub min_pattern_len: usize,
    /// Variable columns apply only above this confidence.
    pub variable_threshold: f64,
    pub verify_integrity: bool,
    /// Fail the run on an integrity violation instead of flagging it.
    pub strict: bool,
    /// Columns protected in addition to the built-in set.
    pub extra_protected: Vec<String>,
    pub reference_extraction: ReferenceConfig,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            max_rules: None,
            min_pattern_len: 3,
            variable_threshold: 0.8,
            verify_integrity: true,
            strict: false,
            extra_protected: Vec::new(),
            reference_extraction: ReferenceConfig::default(),
        }
    }
}

impl ApplyConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.variable_threshold) {
            return Err(invalid("apply.variable_threshold must be in [0, 1]"));
        }
        if self.max_rules == Some(0) {
            return Err(invalid("apply.max_rules must be at least 1 when set"));
        }
        Ok(())
    }
}

/// Top-level engine configuration, usually read from `ledgerfill.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FillConfig {
    pub mining: MinerConfig,
    pub apply: ApplyConfig,
}

impl FillConfig {
    pub fn from_toml(toml_content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.mining.validate()?;
        self.apply.validate()
    }
}

fn invalid(msg: &str) -> ConfigError {
    ConfigError::Invalid(msg.to_string())
}

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Priority assigned to rules persisted without one.
pub const DEFAULT_PRIORITY: u32 = 999;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RuleError {
    #[error("Rule has an empty pattern and no context")]
    EmptyPattern,
    #[error("Rule '{0}' has no fixed or variable columns")]
    NoAssignments(String),
    #[error("Rule '{pattern}' assigns an empty value to '{column}'")]
    EmptyValue { pattern: String, column: String },
}

/// Account/currency condition carried by composite-key rules.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RuleContext {
    pub bank_account: String,
    pub currency: String,
}

impl RuleContext {
    pub fn new(bank_account: &str, currency: &str) -> Self {
        Self {
            bank_account: bank_account.trim().to_lowercase(),
            currency: currency.trim().to_lowercase(),
        }
    }

    pub fn matches(&self, bank_account: Option<&str>, currency: Option<&str>) -> bool {
        let eq = |want: &str, got: Option<&str>| {
            got.is_some_and(|g| g.trim().eq_ignore_ascii_case(want.trim()))
        };
        eq(&self.bank_account, bank_account) && eq(&self.currency, currency)
    }
}

impl fmt::Display for RuleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.bank_account, self.currency)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// Two or more fixed columns.
    CompleteFill,
    /// Exactly one fixed column.
    HybridFill,
    /// Variable columns only.
    #[default]
    ConditionalFill,
}

impl RuleKind {
    pub fn classify(fixed: usize) -> Self {
        match fixed {
            0 => RuleKind::ConditionalFill,
            1 => RuleKind::HybridFill,
            _ => RuleKind::CompleteFill,
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleKind::CompleteFill => write!(f, "complete_fill"),
            RuleKind::HybridFill => write!(f, "hybrid_fill"),
            RuleKind::ConditionalFill => write!(f, "conditional_fill"),
        }
    }
}

/// A moderately confident default for one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableColumn {
    pub default_value: String,
    pub confidence: f64,
}

/// A mined fill rule. Column keys are spreadsheet headers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub pattern: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<RuleContext>,
    #[serde(default)]
    pub support: usize,
    #[serde(alias = "level", default = "default_priority")]
    pub priority: u32,
    #[serde(default)]
    pub rule_type: RuleKind,
    #[serde(default)]
    pub fixed_columns: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variable_columns: BTreeMap<String, VariableColumn>,
    #[serde(default)]
    pub global_confidence: f64,
}

fn default_priority() -> u32 {
    DEFAULT_PRIORITY
}

impl Rule {
    pub fn has_assignments(&self) -> bool {
        !self.fixed_columns.is_empty() || !self.variable_columns.is_empty()
    }

    /// Pattern length in characters, used for specificity ranking.
    pub fn pattern_len(&self) -> usize {
        self.pattern.chars().count()
    }

    /// Identity used for cross-level deduplication.
    pub fn key(&self) -> (&str, Option<&RuleContext>) {
        (self.pattern.as_str(), self.context.as_ref())
    }

    pub fn validate(&self) -> Result<(), RuleError> {
        if self.pattern.trim().is_empty() && self.context.is_none() {
            return Err(RuleError::EmptyPattern);
        }
        if !self.has_assignments() {
            return Err(RuleError::NoAssignments(self.pattern.clone()));
        }
        let values = self
            .fixed_columns
            .iter()
            .map(|(c, v)| (c, v.as_str()))
            .chain(
                self.variable_columns
                    .iter()
                    .map(|(c, v)| (c, v.default_value.as_str())),
            );
        for (column, value) in values {
            if value.trim().is_empty() {
                return Err(RuleError::EmptyValue {
                    pattern: self.pattern.clone(),
                    column: column.clone(),
                });
            }
        }
        Ok(())
    }

    /// A short label for logs: the pattern, prefixed by its context if any.
    pub fn label(&self) -> String {
        match &self.context {
            Some(ctx) if self.pattern.is_empty() => format!("[{ctx}]"),
            Some(ctx) => format!("[{ctx}] {}", self.pattern),
            None => self.pattern.clone(),
        }
    }
}

/// Ranking shared by the combiner and the applier: priority ascending, then
/// support descending, longer patterns first, higher confidence first, and
/// finally the pattern text so the order is total.
pub fn rule_order(a: &Rule, b: &Rule) -> Ordering {
    a.priority
        .cmp(&b.priority)
        .then_with(|| b.support.cmp(&a.support))
        .then_with(|| b.pattern_len().cmp(&a.pattern_len()))
        .then_with(|| b.global_confidence.total_cmp(&a.global_confidence))
        .then_with(|| a.pattern.cmp(&b.pattern))
        .then_with(|| a.context.cmp(&b.context))
}

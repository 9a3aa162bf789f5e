use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::rule::{rule_order, Rule, RuleKind};

#[derive(Debug, Error)]
pub enum RuleSetError {
    #[error("Invalid rule set JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid creation timestamp: '{0}'")]
    InvalidTimestamp(String),
}

/// An ordered, timestamped collection of rules: the persisted unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleSet {
    pub creation_timestamp: DateTime<Utc>,
    pub total_rule_count: usize,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub level_counts: BTreeMap<u32, usize>,
    pub rules: Vec<Rule>,
    /// Rules dropped while decoding because they were malformed.
    #[serde(skip)]
    pub rejected_rules: usize,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(alias = "extraction_time")]
    creation_timestamp: String,
    #[serde(default, alias = "total_rules")]
    total_rule_count: Option<usize>,
    #[serde(default)]
    level_counts: BTreeMap<u32, usize>,
    #[serde(default)]
    rules: Vec<serde_json::Value>,
}

impl RuleSet {
    /// Builds a rule set, sorting the rules into application order.
    pub fn new(mut rules: Vec<Rule>, creation_timestamp: DateTime<Utc>) -> Self {
        rules.sort_by(rule_order);
        let mut level_counts = BTreeMap::new();
        for rule in &rules {
            *level_counts.entry(rule.priority).or_insert(0) += 1;
        }
        Self {
            creation_timestamp,
            total_rule_count: rules.len(),
            level_counts,
            rules,
            rejected_rules: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn kind_counts(&self) -> BTreeMap<RuleKind, usize> {
        let mut counts = BTreeMap::new();
        for rule in &self.rules {
            *counts.entry(rule.rule_type).or_insert(0) += 1;
        }
        counts
    }

    /// Decodes a persisted rule set. The envelope must be well formed; each rule
    /// is decoded on its own and malformed ones are skipped and counted.
    /// Rules come back in application order whatever order the file lists.
    pub fn from_json(json: &str) -> Result<Self, RuleSetError> {
        let envelope: Envelope = serde_json::from_str(json)?;
        Self::from_envelope(envelope)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, RuleSetError> {
        let envelope: Envelope = serde_json::from_slice(bytes)?;
        Self::from_envelope(envelope)
    }

    fn from_envelope(envelope: Envelope) -> Result<Self, RuleSetError> {
        let creation_timestamp = parse_timestamp(&envelope.creation_timestamp)
            .ok_or_else(|| RuleSetError::InvalidTimestamp(envelope.creation_timestamp.clone()))?;

        let mut rules = Vec::with_capacity(envelope.rules.len());
        let mut rejected_rules = 0;
        for (idx, value) in envelope.rules.into_iter().enumerate() {
            match decode_rule(value) {
                Ok(rule) => rules.push(rule),
                Err(reason) => {
                    tracing::warn!(rule = idx, "Skipping malformed rule: {reason}");
                    rejected_rules += 1;
                }
            }
        }
        rules.sort_by(rule_order);

        Ok(Self {
            creation_timestamp,
            total_rule_count: envelope.total_rule_count.unwrap_or(rules.len()),
            level_counts: envelope.level_counts,
            rules,
            rejected_rules,
        })
    }

    pub fn to_json_pretty(&self) -> Result<String, RuleSetError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn decode_rule(value: serde_json::Value) -> Result<Rule, String> {
    let mut rule: Rule = serde_json::from_value(value).map_err(|e| e.to_string())?;
    rule.validate().map_err(|e| e.to_string())?;
    if rule.rule_type == RuleKind::default() && !rule.fixed_columns.is_empty() {
        rule.rule_type = RuleKind::classify(rule.fixed_columns.len());
    }
    Ok(rule)
}

/// Accepts RFC 3339 and naive ISO-8601 timestamps; naive ones are taken as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{RuleContext, VariableColumn, DEFAULT_PRIORITY};
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 18, 9, 30, 0).unwrap()
    }

    fn sample_rules() -> Vec<Rule> {
        vec![
            Rule {
                pattern: "advicepro monthly fee".to_string(),
                context: None,
                support: 3,
                priority: 1,
                rule_type: RuleKind::HybridFill,
                fixed_columns: BTreeMap::from([("Service".to_string(), "OHD".to_string())]),
                variable_columns: BTreeMap::from([(
                    "Vessel".to_string(),
                    VariableColumn {
                        default_value: "N/A".to_string(),
                        confidence: 2.0 / 3.0,
                    },
                )]),
                global_confidence: 0.8333333333333334,
            },
            Rule {
                pattern: String::new(),
                context: Some(RuleContext::new("USD-ACCOUNT-002", "USD")),
                support: 5,
                priority: 3,
                rule_type: RuleKind::HybridFill,
                fixed_columns: BTreeMap::from([("Nature".to_string(), "Import".to_string())]),
                variable_columns: BTreeMap::new(),
                global_confidence: 1.0,
            },
        ]
    }

    #[test]
    fn new_sorts_and_counts_levels() {
        let mut rules = sample_rules();
        rules.reverse();
        let set = RuleSet::new(rules, ts());
        assert_eq!(set.total_rule_count, 2);
        assert_eq!(set.rules[0].priority, 1);
        assert_eq!(set.level_counts.get(&1), Some(&1));
        assert_eq!(set.level_counts.get(&3), Some(&1));
    }

    #[test]
    fn json_round_trip_preserves_rules() {
        let set = RuleSet::new(sample_rules(), ts());
        let json = set.to_json_pretty().unwrap();
        let back = RuleSet::from_json(&json).unwrap();
        assert_eq!(back, set);
    }

    #[test]
    fn malformed_rules_are_skipped_not_fatal() {
        let json = r#"{
            "creation_timestamp": "2026-03-18T09:30:00Z",
            "total_rule_count": 3,
            "rules": [
                {"pattern": "advicepro", "support": 3, "priority": 1, "fixed_columns": {"Service": "OHD"}},
                {"pattern": "broken", "support": 3, "fixed_columns": ["Service", "OHD"]},
                {"pattern": "nothing to fill", "support": 3, "fixed_columns": {}}
            ]
        }"#;
        let set = RuleSet::from_json(json).unwrap();
        assert_eq!(set.rules.len(), 1);
        assert_eq!(set.rejected_rules, 2);
        assert_eq!(set.rules[0].rule_type, RuleKind::HybridFill);
    }

    #[test]
    fn legacy_envelope_keys_are_accepted() {
        let json = r#"{
            "extraction_time": "2025-06-01T14:22:05.123456",
            "total_rules": 1,
            "system_type": "rules_corrected",
            "rules": [
                {"pattern": "comfort", "support": 4, "rule_type": "complete_fill",
                 "fixed_columns": {"Nature": "G- Suppliers", "Service": "OHD"},
                 "variable_columns": {}, "global_confidence": 1.0}
            ]
        }"#;
        let set = RuleSet::from_json(json).unwrap();
        assert_eq!(set.total_rule_count, 1);
        assert_eq!(
            set.creation_timestamp,
            parse_timestamp("2025-06-01T14:22:05.123456Z").unwrap()
        );
        assert_eq!(set.rules[0].rule_type, RuleKind::CompleteFill);
    }

    #[test]
    fn decoded_rules_are_ranked() {
        let json = r#"{
            "creation_timestamp": "2026-03-18T09:30:00Z",
            "rules": [
                {"pattern": "monthly fee", "support": 50, "priority": 2, "fixed_columns": {"Service": "ADM"}},
                {"pattern": "fee", "support": 9, "fixed_columns": {"Service": "FEE"}},
                {"pattern": "advicepro", "support": 3, "priority": 1, "fixed_columns": {"Service": "OHD"}}
            ]
        }"#;
        let set = RuleSet::from_json(json).unwrap();
        let patterns: Vec<&str> = set.rules.iter().map(|r| r.pattern.as_str()).collect();
        assert_eq!(patterns, ["advicepro", "monthly fee", "fee"]);
        assert_eq!(set.rules[2].priority, DEFAULT_PRIORITY);
    }

    #[test]
    fn corrupt_envelope_is_an_error() {
        assert!(matches!(RuleSet::from_json("{not json"), Err(RuleSetError::Json(_))));
        assert!(matches!(
            RuleSet::from_json(r#"{"creation_timestamp": "yesterday", "rules": []}"#),
            Err(RuleSetError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn parse_timestamp_formats() {
        assert_eq!(parse_timestamp("2026-03-18T09:30:00Z"), Some(ts()));
        assert_eq!(parse_timestamp("2026-03-18T10:30:00+01:00"), Some(ts()));
        assert_eq!(parse_timestamp("2026-03-18 09:30:00"), Some(ts()));
        assert_eq!(parse_timestamp("18/03/2026"), None);
    }
}

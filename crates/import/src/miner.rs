use chrono::{DateTime, Utc};
use ledgerfill_core::{
    Dataset, Rule, RuleContext, RuleKind, RuleSet, TargetField, VariableColumn,
    BANK_ACCOUNT_COLUMN, CURRENCY_COLUMN, DESCRIPTION_COLUMN,
};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

use crate::combiner;
use crate::config::{ConfidenceBasis, ConfigError, GroupingKey, LevelConfig, MinerConfig};
use crate::signature::{extract_signature, normalize_description, Signature};
use crate::util::normalize_text;

/// Slack for comparing a computed share against a configured threshold.
const THRESHOLD_EPSILON: f64 = 1e-9;

#[derive(Debug, Error)]
pub enum MineError {
    #[error("Invalid miner configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Missing required column: {0}")]
    MissingColumn(String),
}

/// How one target column of a group was classified.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldClass {
    Fixed { value: String, confidence: f64 },
    Variable { value: String, confidence: f64 },
    Dropped { value: String, confidence: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelStats {
    pub level: u32,
    pub key: GroupingKey,
    pub records_considered: usize,
    pub groups: usize,
    pub groups_below_support: usize,
    pub rules_emitted: usize,
    pub records_covered: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MiningStats {
    pub records_seen: usize,
    pub levels: Vec<LevelStats>,
    pub duplicates_dropped: usize,
}

#[derive(Debug, Clone)]
pub struct MiningOutcome {
    pub rule_set: RuleSet,
    pub stats: MiningStats,
}

/// One historical row reduced to what the miner needs.
#[derive(Debug)]
struct Observation {
    row: usize,
    description: String,
    bank_account: String,
    currency: String,
    signature: Signature,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct GroupKey {
    pattern: String,
    context: Option<RuleContext>,
}

/// Learns fill rules from a labeled dataset, one grouping level at a time.
pub struct RuleMiner {
    config: MinerConfig,
}

impl RuleMiner {
    pub fn new(config: MinerConfig) -> Result<Self, MineError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn mine(&self, dataset: &Dataset) -> Result<MiningOutcome, MineError> {
        self.mine_at(dataset, Utc::now())
    }

    /// Mines every configured level and combines the result into a rule set
    /// stamped with `created`.
    pub fn mine_at(
        &self,
        dataset: &Dataset,
        created: DateTime<Utc>,
    ) -> Result<MiningOutcome, MineError> {
        if !dataset.has_column(DESCRIPTION_COLUMN) {
            return Err(MineError::MissingColumn(DESCRIPTION_COLUMN.to_string()));
        }

        let observations: Vec<Observation> = dataset
            .records()
            .map(|rec| Observation {
                row: rec.index(),
                description: normalize_description(rec.get(DESCRIPTION_COLUMN)),
                bank_account: normalize_text(rec.get(BANK_ACCOUNT_COLUMN)),
                currency: normalize_text(rec.get(CURRENCY_COLUMN)),
                signature: extract_signature(&rec),
            })
            .collect();

        tracing::info!(
            records = observations.len(),
            levels = self.config.grouping_levels.len(),
            "Mining fill rules"
        );

        let mut stats = MiningStats {
            records_seen: observations.len(),
            ..MiningStats::default()
        };
        let mut covered: HashSet<usize> = HashSet::new();
        let mut per_level = Vec::with_capacity(self.config.grouping_levels.len());

        for (idx, level) in self.config.grouping_levels.iter().enumerate() {
            let priority = idx as u32 + 1;
            let pool: Vec<&Observation> = observations
                .iter()
                .filter(|o| !(self.config.exclude_covered && covered.contains(&o.row)))
                .collect();

            let (rules, level_covered, level_stats) = self.mine_level(priority, level, &pool);
            tracing::info!(
                level = priority,
                key = ?level.key,
                groups = level_stats.groups,
                rules = level_stats.rules_emitted,
                "Level mined"
            );
            covered.extend(level_covered);
            stats.levels.push(level_stats);
            per_level.push(rules);
        }

        let emitted: usize = per_level.iter().map(Vec::len).sum();
        let rule_set = combiner::combine(per_level, created);
        stats.duplicates_dropped = emitted.saturating_sub(rule_set.len());

        Ok(MiningOutcome { rule_set, stats })
    }

    /// Mines one level. Returns the emitted rules, the rows those rules cover,
    /// and the level statistics.
    fn mine_level(
        &self,
        priority: u32,
        level: &LevelConfig,
        pool: &[&Observation],
    ) -> (Vec<Rule>, Vec<usize>, LevelStats) {
        let min_support = self.config.level_min_support(level);
        let fixed_threshold = self.config.level_confidence_fixed(level);

        let mut groups: BTreeMap<GroupKey, Vec<&Observation>> = BTreeMap::new();
        for obs in pool {
            if let Some(key) = self.group_key(level.key, obs) {
                groups.entry(key).or_default().push(obs);
            }
        }

        let mut stats = LevelStats {
            level: priority,
            key: level.key,
            records_considered: pool.len(),
            groups: groups.len(),
            groups_below_support: 0,
            rules_emitted: 0,
            records_covered: 0,
        };
        let mut rules = Vec::new();
        let mut covered = Vec::new();

        for (key, members) in groups {
            if members.len() < min_support {
                stats.groups_below_support += 1;
                continue;
            }
            let signatures: Vec<&Signature> = members.iter().map(|o| &o.signature).collect();
            if let Some(rule) = self.build_rule(priority, key, &signatures, fixed_threshold) {
                covered.extend(members.iter().map(|o| o.row));
                rules.push(rule);
            }
        }

        stats.rules_emitted = rules.len();
        stats.records_covered = covered.len();
        (rules, covered, stats)
    }

    fn group_key(&self, key: GroupingKey, obs: &Observation) -> Option<GroupKey> {
        let has_context = !obs.bank_account.is_empty() && !obs.currency.is_empty();
        let context = || RuleContext::new(&obs.bank_account, &obs.currency);
        let long_enough = obs.description.chars().count() >= self.config.min_description_len;

        match key {
            GroupingKey::Description if long_enough => Some(GroupKey {
                pattern: obs.description.clone(),
                context: None,
            }),
            GroupingKey::AccountCurrencyDescription if long_enough && has_context => {
                Some(GroupKey {
                    pattern: obs.description.clone(),
                    context: Some(context()),
                })
            }
            GroupingKey::AccountCurrency if has_context => Some(GroupKey {
                pattern: String::new(),
                context: Some(context()),
            }),
            _ => None,
        }
    }

    fn pattern_allowed(&self, key: &GroupKey) -> bool {
        if key.pattern.is_empty() {
            return key.context.is_some();
        }
        let len = key.pattern.chars().count();
        len >= self.config.min_pattern_len && len <= self.config.max_pattern_len
    }

    fn build_rule(
        &self,
        priority: u32,
        key: GroupKey,
        signatures: &[&Signature],
        fixed_threshold: f64,
    ) -> Option<Rule> {
        if !self.pattern_allowed(&key) {
            tracing::debug!(pattern = %key.pattern, "Pattern rejected by length limits");
            return None;
        }

        let mut fixed_columns = BTreeMap::new();
        let mut variable_columns = BTreeMap::new();
        let mut confidences = Vec::new();

        for field in TargetField::ALL {
            let values: Vec<&str> = signatures.iter().map(|s| s.get(field)).collect();
            match classify_field(
                &values,
                fixed_threshold,
                self.config.confidence_variable,
                self.config.basis,
            ) {
                Some(FieldClass::Fixed { value, confidence }) => {
                    fixed_columns.insert(field.column().to_string(), value);
                    confidences.push(confidence);
                }
                Some(FieldClass::Variable { value, confidence }) => {
                    variable_columns.insert(
                        field.column().to_string(),
                        VariableColumn {
                            default_value: value,
                            confidence,
                        },
                    );
                    confidences.push(confidence);
                }
                Some(FieldClass::Dropped { .. }) | None => {}
            }
        }

        if confidences.is_empty() {
            return None;
        }

        Some(Rule {
            pattern: key.pattern,
            context: key.context,
            support: signatures.len(),
            priority,
            rule_type: RuleKind::classify(fixed_columns.len()),
            fixed_columns,
            variable_columns,
            global_confidence: confidences.iter().sum::<f64>() / confidences.len() as f64,
        })
    }
}

/// Most frequent non-empty value and its count. Ties go to the value seen
/// first.
pub fn dominant_value<'a>(values: &[&'a str]) -> Option<(&'a str, usize)> {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for value in values.iter().copied().filter(|v| !v.is_empty()) {
        match counts.iter_mut().find(|(v, _)| *v == value) {
            Some((_, n)) => *n += 1,
            None => counts.push((value, 1)),
        }
    }
    counts
        .into_iter()
        .fold(None, |best: Option<(&str, usize)>, (v, n)| match best {
            Some((_, best_n)) if best_n >= n => best,
            _ => Some((v, n)),
        })
}

/// Classifies one column of a group. `values` holds one entry per group
/// member, empty strings included. Returns `None` when no member has a value.
pub fn classify_field(
    values: &[&str],
    confidence_fixed: f64,
    confidence_variable: Option<f64>,
    basis: ConfidenceBasis,
) -> Option<FieldClass> {
    let (value, count) = dominant_value(values)?;
    let denominator = match basis {
        ConfidenceBasis::NonEmpty => values.iter().filter(|v| !v.is_empty()).count(),
        ConfidenceBasis::GroupSize => values.len(),
    };
    let confidence = count as f64 / denominator as f64;
    let value = value.to_string();

    let meets = |threshold: f64| confidence >= threshold - THRESHOLD_EPSILON;
    Some(if meets(confidence_fixed) {
        FieldClass::Fixed { value, confidence }
    } else if confidence_variable.is_some_and(meets) {
        FieldClass::Variable { value, confidence }
    } else {
        FieldClass::Dropped { value, confidence }
    })
}

use ledgerfill_core::{
    rule_order, Dataset, ProtectedFields, Rule, RuleSet, TargetField, BANK_ACCOUNT_COLUMN,
    CURRENCY_COLUMN, DESCRIPTION_COLUMN,
};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::config::{ApplyConfig, ConfigError};
use crate::integrity::{self, IntegrityStatus, Violation};
use crate::reference::ReferenceExtractor;

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("Invalid apply configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Missing required column: {0}")]
    MissingColumn(String),
    #[error("Integrity check failed with {} violation(s)", .0.len())]
    Integrity(Vec<Violation>),
}

/// Cells filled by one rule during a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleFillCount {
    pub rule: String,
    pub priority: u32,
    pub support: usize,
    pub rows_matched: usize,
    pub cells_filled: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ApplyReport {
    pub rule_set_available: bool,
    pub rules_loaded: usize,
    /// Rules dropped while decoding the rule set.
    pub rules_rejected: usize,
    pub rules_considered: usize,
    pub rules_skipped: usize,
    pub rules_matched: usize,
    pub rules_applied: usize,
    pub cells_filled: usize,
    pub fills_by_column: BTreeMap<String, usize>,
    pub protected_assignments_blocked: usize,
    pub non_target_assignments_skipped: usize,
    pub references_extracted: usize,
    pub initial_completion: f64,
    pub final_completion: f64,
    pub improvement: f64,
    pub integrity: IntegrityStatus,
    /// Rules that filled at least one cell, most productive first.
    pub top_rules: Vec<RuleFillCount>,
}

#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    pub dataset: Dataset,
    pub report: ApplyReport,
}

/// Column positions resolved once per run.
struct Columns {
    description: usize,
    bank_account: Option<usize>,
    currency: Option<usize>,
}

pub struct RuleApplier {
    config: ApplyConfig,
    protected: ProtectedFields,
    references: Option<ReferenceExtractor>,
}

impl RuleApplier {
    pub fn new(config: ApplyConfig) -> Result<Self, ApplyError> {
        config.validate()?;
        let protected = ProtectedFields::standard().with_extra(&config.extra_protected);
        let references = ReferenceExtractor::from_config(&config.reference_extraction)?;
        Ok(Self {
            config,
            protected,
            references,
        })
    }

    /// Applies `rules` to a copy of `dataset`. The input is never modified.
    ///
    /// With no rule set the copy is returned untouched and the report says so.
    pub fn apply(
        &self,
        dataset: &Dataset,
        rules: Option<&RuleSet>,
    ) -> Result<ApplyOutcome, ApplyError> {
        let mut output = dataset.clone();
        let initial_completion = dataset.completion_percentage();
        let mut report = ApplyReport {
            initial_completion,
            final_completion: initial_completion,
            ..ApplyReport::default()
        };

        let Some(rule_set) = rules else {
            tracing::warn!("No rule set available; dataset returned unchanged");
            return Ok(ApplyOutcome {
                dataset: output,
                report,
            });
        };

        report.rule_set_available = true;
        report.rules_loaded = rule_set.len();
        report.rules_rejected = rule_set.rejected_rules;

        let columns = Columns {
            description: dataset
                .column_index(DESCRIPTION_COLUMN)
                .ok_or_else(|| ApplyError::MissingColumn(DESCRIPTION_COLUMN.to_string()))?,
            bank_account: dataset.column_index(BANK_ACCOUNT_COLUMN),
            currency: dataset.column_index(CURRENCY_COLUMN),
        };

        let descriptions: Vec<Option<String>> = (0..dataset.len())
            .map(|row| dataset.cell(row, columns.description).map(str::to_lowercase))
            .collect();

        // Callers may hand over rules in any order; the cap keeps the best ranked.
        let mut ranked: Vec<&Rule> = rule_set.rules.iter().collect();
        ranked.sort_by(|a, b| rule_order(a, b));
        let limit = self.config.max_rules.unwrap_or(usize::MAX);
        for rule in ranked.into_iter().take(limit) {
            report.rules_considered += 1;
            if !self.is_applicable(rule) {
                report.rules_skipped += 1;
                continue;
            }

            let matched = matching_rows(rule, dataset, &columns, &descriptions);
            if matched.is_empty() {
                continue;
            }
            report.rules_matched += 1;

            let filled = self.fill_rule(rule, &matched, &mut output, &mut report);
            if filled > 0 {
                report.rules_applied += 1;
                report.top_rules.push(RuleFillCount {
                    rule: rule.label(),
                    priority: rule.priority,
                    support: rule.support,
                    rows_matched: matched.len(),
                    cells_filled: filled,
                });
            }
            tracing::debug!(rule = %rule.label(), rows = matched.len(), filled, "Rule matched");
        }

        if let Some(extractor) = &self.references {
            if self.protected.contains(TargetField::Reference.column()) {
                tracing::warn!("Reference column is protected; extraction skipped");
            } else {
                let extracted = extractor.fill(&mut output);
                report.references_extracted = extracted;
                report.cells_filled += extracted;
                if extracted > 0 {
                    *report
                        .fills_by_column
                        .entry(TargetField::Reference.column().to_string())
                        .or_insert(0) += extracted;
                }
            }
        }

        report.top_rules.sort_by(|a, b| b.cells_filled.cmp(&a.cells_filled));
        report.final_completion = output.completion_percentage();
        report.improvement = report.final_completion - report.initial_completion;

        if self.config.verify_integrity {
            report.integrity = integrity::verify(dataset, &output, &self.protected);
            if let IntegrityStatus::Violated { violations } = &report.integrity {
                if self.config.strict {
                    return Err(ApplyError::Integrity(violations.clone()));
                }
            }
        }

        tracing::info!(
            rules = report.rules_loaded,
            applied = report.rules_applied,
            cells = report.cells_filled,
            blocked = report.protected_assignments_blocked,
            "Rules applied: {:.1}% -> {:.1}% complete",
            report.initial_completion,
            report.final_completion
        );

        Ok(ApplyOutcome {
            dataset: output,
            report,
        })
    }

    fn is_applicable(&self, rule: &Rule) -> bool {
        if let Err(e) = rule.validate() {
            tracing::warn!("Skipping rule: {e}");
            return false;
        }
        let len = rule.pattern.trim().chars().count();
        if len == 0 {
            // Context-only rules carry no pattern.
            return rule.context.is_some();
        }
        len >= self.config.min_pattern_len
    }

    /// Writes the rule's assignments into the empty cells of `rows`. Returns
    /// the number of cells filled.
    fn fill_rule(
        &self,
        rule: &Rule,
        rows: &[usize],
        output: &mut Dataset,
        report: &mut ApplyReport,
    ) -> usize {
        let fixed = rule
            .fixed_columns
            .iter()
            .map(|(c, v)| (c.as_str(), v.as_str()));
        let variable = rule
            .variable_columns
            .iter()
            .filter(|(_, v)| v.confidence > self.config.variable_threshold)
            .map(|(c, v)| (c.as_str(), v.default_value.as_str()));

        let mut filled = 0;
        for (column, value) in fixed.chain(variable) {
            if self.protected.contains(column) {
                tracing::warn!(
                    rule = %rule.label(),
                    column,
                    "Blocked assignment to protected column"
                );
                report.protected_assignments_blocked += 1;
                continue;
            }
            let Some(field) = TargetField::from_column(column) else {
                tracing::debug!(rule = %rule.label(), column, "Skipping non-target column");
                report.non_target_assignments_skipped += 1;
                continue;
            };
            let Some(col) = output.column_index(field.column()) else {
                continue;
            };

            let value = value.trim();
            let mut column_fills = 0;
            for &row in rows {
                if output.is_cell_empty(row, col) {
                    output.set_cell(row, col, value.to_string());
                    column_fills += 1;
                }
            }
            if column_fills > 0 {
                *report
                    .fills_by_column
                    .entry(field.column().to_string())
                    .or_insert(0) += column_fills;
                filled += column_fills;
            }
        }
        report.cells_filled += filled;
        filled
    }
}

fn matching_rows(
    rule: &Rule,
    dataset: &Dataset,
    columns: &Columns,
    descriptions: &[Option<String>],
) -> Vec<usize> {
    let pattern = rule.pattern.trim().to_lowercase();
    descriptions
        .iter()
        .enumerate()
        .filter(|(_, desc)| desc.as_deref().is_some_and(|d| d.contains(&pattern)))
        .filter(|(row, _)| match &rule.context {
            None => true,
            Some(ctx) => ctx.matches(
                columns.bank_account.and_then(|c| dataset.cell(*row, c)),
                columns.currency.and_then(|c| dataset.cell(*row, c)),
            ),
        })
        .map(|(row, _)| row)
        .collect()
}

use ledgerfill_core::{Dataset, TargetField};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::util::{clean_value, percentage};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ColumnMetrics {
    /// Rows whose labeled value is non-empty.
    pub should_predict: usize,
    /// Rows whose output value is non-empty.
    pub predicted: usize,
    pub correct: usize,
    pub missed: usize,
    /// `correct / should_predict`, as a percentage.
    pub accuracy: f64,
    /// `correct / predicted`, as a percentage.
    pub precision: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub rows_compared: usize,
    pub columns: BTreeMap<String, ColumnMetrics>,
    pub total_should_predict: usize,
    pub total_predicted: usize,
    pub total_correct: usize,
    pub overall_accuracy: f64,
    pub overall_precision: f64,
    /// Changed cells per non-target column shared by both datasets.
    pub unexpected_changes: BTreeMap<String, usize>,
}

impl EvaluationReport {
    pub fn other_columns_unchanged(&self) -> bool {
        self.unexpected_changes.is_empty()
    }
}

/// Scores a filled dataset against a labeled one. Rows are compared
/// positionally up to the shorter of the two; values are compared after
/// trimming, with `nan` treated as empty.
pub fn evaluate(truth: &Dataset, output: &Dataset) -> EvaluationReport {
    let rows = truth.len().min(output.len());
    if truth.len() != output.len() {
        tracing::warn!(
            truth = truth.len(),
            output = output.len(),
            "Row counts differ; comparing the first {rows} rows"
        );
    }

    let mut report = EvaluationReport {
        rows_compared: rows,
        ..EvaluationReport::default()
    };

    for field in TargetField::ALL {
        let (Some(t_col), Some(o_col)) = (
            truth.column_index(field.column()),
            output.column_index(field.column()),
        ) else {
            continue;
        };

        let mut m = ColumnMetrics::default();
        for row in 0..rows {
            let expected = clean_value(truth.cell(row, t_col));
            let actual = clean_value(output.cell(row, o_col));
            if !expected.is_empty() {
                m.should_predict += 1;
                if actual.is_empty() {
                    m.missed += 1;
                } else if actual == expected {
                    m.correct += 1;
                }
            }
            if !actual.is_empty() {
                m.predicted += 1;
            }
        }
        m.accuracy = percentage(m.correct, m.should_predict);
        m.precision = percentage(m.correct, m.predicted);

        report.total_should_predict += m.should_predict;
        report.total_predicted += m.predicted;
        report.total_correct += m.correct;
        report.columns.insert(field.column().to_string(), m);
    }

    report.overall_accuracy = percentage(report.total_correct, report.total_should_predict);
    report.overall_precision = percentage(report.total_correct, report.total_predicted);

    for (t_col, name) in truth.columns().iter().enumerate() {
        if TargetField::from_column(name).is_some() {
            continue;
        }
        let Some(o_col) = output.column_index(name) else {
            continue;
        };
        let changes = (0..rows)
            .filter(|&row| clean_value(truth.cell(row, t_col)) != clean_value(output.cell(row, o_col)))
            .count();
        if changes > 0 {
            tracing::warn!(column = %name, changes, "Non-target column changed");
            report.unexpected_changes.insert(name.clone(), changes);
        }
    }

    report
}

use ledgerfill_core::{Dataset, ProtectedFields};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// A protected column disappeared from the output.
    ColumnRemoved,
    /// The output has a different number of rows.
    RowCountChanged,
    /// A protected cell differs from the input.
    ProtectedCellChanged,
    /// A non-empty input cell was rewritten.
    FilledCellOverwritten,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub column: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row: Option<usize>,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.kind, self.row) {
            (ViolationKind::ColumnRemoved, _) => write!(f, "column '{}' was removed", self.column),
            (ViolationKind::RowCountChanged, _) => write!(f, "row count changed"),
            (ViolationKind::ProtectedCellChanged, Some(row)) => {
                write!(f, "protected column '{}' changed at row {row}", self.column)
            }
            (ViolationKind::FilledCellOverwritten, Some(row)) => {
                write!(f, "non-empty cell in '{}' overwritten at row {row}", self.column)
            }
            (kind, None) => write!(f, "{kind:?} in '{}'", self.column),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IntegrityStatus {
    Verified,
    #[default]
    Skipped,
    Violated { violations: Vec<Violation> },
}

impl IntegrityStatus {
    pub fn is_violated(&self) -> bool {
        matches!(self, IntegrityStatus::Violated { .. })
    }
}

/// Checks every protected column of `before` is byte-identical in `after`.
pub fn verify_protected(
    before: &Dataset,
    after: &Dataset,
    protected: &ProtectedFields,
) -> Vec<Violation> {
    let mut violations = Vec::new();
    if before.len() != after.len() {
        violations.push(Violation {
            kind: ViolationKind::RowCountChanged,
            column: String::new(),
            row: None,
        });
        return violations;
    }

    for (col, name) in before.columns().iter().enumerate() {
        if !protected.contains(name) {
            continue;
        }
        let Some(after_col) = after.column_index(name) else {
            violations.push(Violation {
                kind: ViolationKind::ColumnRemoved,
                column: name.clone(),
                row: None,
            });
            continue;
        };
        for row in 0..before.len() {
            if before.raw_cell(row, col) != after.raw_cell(row, after_col) {
                violations.push(Violation {
                    kind: ViolationKind::ProtectedCellChanged,
                    column: name.clone(),
                    row: Some(row),
                });
            }
        }
    }
    violations
}

/// Checks that no non-empty cell of `before` changed in `after`, in any column.
pub fn verify_fill_only(before: &Dataset, after: &Dataset) -> Vec<Violation> {
    let mut violations = Vec::new();
    if before.len() != after.len() {
        violations.push(Violation {
            kind: ViolationKind::RowCountChanged,
            column: String::new(),
            row: None,
        });
        return violations;
    }

    for (col, name) in before.columns().iter().enumerate() {
        let Some(after_col) = after.column_index(name) else {
            violations.push(Violation {
                kind: ViolationKind::ColumnRemoved,
                column: name.clone(),
                row: None,
            });
            continue;
        };
        for row in 0..before.len() {
            if before.is_cell_empty(row, col) {
                continue;
            }
            if before.raw_cell(row, col) != after.raw_cell(row, after_col) {
                violations.push(Violation {
                    kind: ViolationKind::FilledCellOverwritten,
                    column: name.clone(),
                    row: Some(row),
                });
            }
        }
    }
    violations
}

/// Runs both checks and logs every violation found.
pub fn verify(before: &Dataset, after: &Dataset, protected: &ProtectedFields) -> IntegrityStatus {
    let mut violations = verify_protected(before, after, protected);
    for v in verify_fill_only(before, after) {
        if !violations.contains(&v) {
            violations.push(v);
        }
    }

    if violations.is_empty() {
        tracing::debug!("Integrity verified");
        return IntegrityStatus::Verified;
    }
    for v in &violations {
        tracing::error!("Integrity violation: {v}");
    }
    IntegrityStatus::Violated { violations }
}

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Free-text column every rule pattern is matched against.
pub const DESCRIPTION_COLUMN: &str = "Description";
pub const BANK_ACCOUNT_COLUMN: &str = "Bank account";
pub const CURRENCY_COLUMN: &str = "CCY";

/// Columns that no rule may ever write to, whatever the rule set claims.
pub const PROTECTED_COLUMNS: &[&str] = &[
    "Amount CCYs",
    "Amount USD",
    "Rate FX",
    "Entity",
    "Period",
    "Date",
    BANK_ACCOUNT_COLUMN,
    CURRENCY_COLUMN,
];

/// The categorical columns the engine is allowed to fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TargetField {
    Nature,
    Descrip,
    Vessel,
    Service,
    Reference,
}

impl TargetField {
    pub const COUNT: usize = 5;

    pub const ALL: [TargetField; Self::COUNT] = [
        TargetField::Nature,
        TargetField::Descrip,
        TargetField::Vessel,
        TargetField::Service,
        TargetField::Reference,
    ];

    pub fn column(self) -> &'static str {
        match self {
            TargetField::Nature => "Nature",
            TargetField::Descrip => "Descrip",
            TargetField::Vessel => "Vessel",
            TargetField::Service => "Service",
            TargetField::Reference => "Reference",
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// Resolves a column header to a target field. Matching ignores case and
    /// surrounding whitespace.
    pub fn from_column(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|f| f.column().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for TargetField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.column())
    }
}

/// The protected column set consumed by both the applier and the integrity
/// check. It starts from [`PROTECTED_COLUMNS`] and can only grow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectedFields {
    columns: BTreeSet<String>,
}

impl ProtectedFields {
    pub fn standard() -> Self {
        Self {
            columns: PROTECTED_COLUMNS.iter().map(|c| key(c)).collect(),
        }
    }

    pub fn with_extra<I, S>(mut self, extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for column in extra {
            let column = key(column.as_ref());
            if !column.is_empty() {
                self.columns.insert(column);
            }
        }
        self
    }

    pub fn contains(&self, column: &str) -> bool {
        self.columns.contains(&key(column))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl Default for ProtectedFields {
    fn default() -> Self {
        Self::standard()
    }
}

fn key(column: &str) -> String {
    column.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_field_from_column_ignores_case() {
        assert_eq!(TargetField::from_column("service"), Some(TargetField::Service));
        assert_eq!(TargetField::from_column("  VESSEL "), Some(TargetField::Vessel));
        assert_eq!(TargetField::from_column("Amount USD"), None);
    }

    #[test]
    fn target_field_index_matches_all_order() {
        for (i, field) in TargetField::ALL.iter().enumerate() {
            assert_eq!(field.index(), i);
        }
    }

    #[test]
    fn standard_protected_set_covers_financial_columns() {
        let protected = ProtectedFields::standard();
        assert!(protected.contains("Amount USD"));
        assert!(protected.contains("amount usd"));
        assert!(protected.contains("Rate FX"));
        assert!(protected.contains("Bank account"));
        assert!(protected.contains("CCY"));
        assert!(!protected.contains("Service"));
    }

    #[test]
    fn extra_protected_columns_only_grow_the_set() {
        let protected = ProtectedFields::standard().with_extra(["Total", " "]);
        assert_eq!(protected.len(), PROTECTED_COLUMNS.len() + 1);
        assert!(protected.contains("total"));
        assert!(protected.contains("Date"));
    }
}

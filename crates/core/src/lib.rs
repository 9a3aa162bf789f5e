pub mod dataset;
pub mod field;
pub mod rule;
pub mod ruleset;

pub use dataset::{Cell, Dataset, DatasetError, Record};
pub use field::{
    ProtectedFields, TargetField, BANK_ACCOUNT_COLUMN, CURRENCY_COLUMN, DESCRIPTION_COLUMN,
    PROTECTED_COLUMNS,
};
pub use rule::{
    rule_order, Rule, RuleContext, RuleError, RuleKind, VariableColumn, DEFAULT_PRIORITY,
};
pub use ruleset::{parse_timestamp, RuleSet, RuleSetError};

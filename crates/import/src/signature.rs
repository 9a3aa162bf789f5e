use ledgerfill_core::{Record, TargetField};

use crate::util::{clean_value, normalize_text};

/// The target-field values observed on one historical record. Absent values
/// are empty strings, never missing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Signature {
    values: [String; TargetField::COUNT],
}

impl Signature {
    pub fn get(&self, field: TargetField) -> &str {
        &self.values[field.index()]
    }

    pub fn set(&mut self, field: TargetField, value: String) {
        self.values[field.index()] = value;
    }
}

/// Builds the signature of one record from its target columns.
pub fn extract_signature(record: &Record<'_>) -> Signature {
    let mut signature = Signature::default();
    for field in TargetField::ALL {
        signature.set(field, clean_value(record.get(field.column())));
    }
    signature
}

/// Normalized description text used as the level-1 grouping key.
pub fn normalize_description(raw: Option<&str>) -> String {
    normalize_text(raw)
}

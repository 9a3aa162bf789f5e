use ledgerfill_core::{Dataset, TargetField, DESCRIPTION_COLUMN};
use regex::{Regex, RegexBuilder};

use crate::config::{ConfigError, ReferenceConfig};

/// Compiled-size cap for user supplied reference patterns.
const PATTERN_SIZE_LIMIT: usize = 1 << 20;

/// Copies reference codes found in the description into empty `Reference`
/// cells.
#[derive(Debug, Clone)]
pub struct ReferenceExtractor {
    patterns: Vec<Regex>,
}

impl ReferenceExtractor {
    pub fn new<I, S>(patterns: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| {
                let p = p.as_ref();
                RegexBuilder::new(p)
                    .size_limit(PATTERN_SIZE_LIMIT)
                    .build()
                    .map_err(|source| ConfigError::ReferencePattern {
                        pattern: p.to_string(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// `None` when extraction is disabled.
    pub fn from_config(config: &ReferenceConfig) -> Result<Option<Self>, ConfigError> {
        if !config.enabled {
            return Ok(None);
        }
        Self::new(&config.patterns).map(Some)
    }

    /// The leftmost match of any pattern.
    pub fn extract<'a>(&self, description: &'a str) -> Option<&'a str> {
        self.patterns
            .iter()
            .filter_map(|re| re.find(description))
            .min_by_key(|m| m.start())
            .map(|m| m.as_str())
    }

    /// Fills empty `Reference` cells and returns how many were filled. Does
    /// nothing when either the description or the reference column is absent.
    pub fn fill(&self, dataset: &mut Dataset) -> usize {
        let (Some(desc_col), Some(ref_col)) = (
            dataset.column_index(DESCRIPTION_COLUMN),
            dataset.column_index(TargetField::Reference.column()),
        ) else {
            return 0;
        };

        let mut filled = 0;
        for row in 0..dataset.len() {
            if !dataset.is_cell_empty(row, ref_col) {
                continue;
            }
            let found = dataset
                .cell(row, desc_col)
                .and_then(|d| self.extract(d))
                .map(str::to_string);
            if let Some(reference) = found {
                dataset.set_cell(row, ref_col, reference);
                filled += 1;
            }
        }
        filled
    }
}

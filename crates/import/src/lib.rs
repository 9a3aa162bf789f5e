pub mod applier;
pub mod combiner;
pub mod config;
pub mod csv;
pub mod evaluate;
pub mod integrity;
pub mod miner;
pub mod reference;
pub mod signature;
pub(crate) mod util;

pub use applier::{ApplyError, ApplyOutcome, ApplyReport, RuleApplier, RuleFillCount};
pub use config::{
    ApplyConfig, ConfidenceBasis, ConfigError, FillConfig, GroupingKey, LevelConfig, MinerConfig,
    ReferenceConfig,
};
pub use csv::{CsvError, CsvImportProfile};
pub use evaluate::{ColumnMetrics, EvaluationReport};
pub use integrity::{IntegrityStatus, Violation, ViolationKind};
pub use miner::{LevelStats, MineError, MiningOutcome, MiningStats, RuleMiner};
pub use reference::ReferenceExtractor;
pub use signature::{extract_signature, Signature};

pub mod fill {
    use crate::*;
    use ledgerfill_core::{Dataset, RuleSet};

    pub fn read_csv<R: std::io::Read>(
        data: R,
        profile: &CsvImportProfile,
    ) -> Result<Dataset, CsvError> {
        crate::csv::read_dataset(data, profile)
    }

    pub fn write_csv<W: std::io::Write>(dataset: &Dataset, out: W) -> Result<(), CsvError> {
        crate::csv::write_dataset(dataset, out, b',')
    }

    pub fn mine_rules(dataset: &Dataset, config: &MinerConfig) -> Result<MiningOutcome, MineError> {
        RuleMiner::new(config.clone())?.mine(dataset)
    }

    pub fn apply_rules(
        dataset: &Dataset,
        rules: Option<&RuleSet>,
        config: &ApplyConfig,
    ) -> Result<ApplyOutcome, ApplyError> {
        RuleApplier::new(config.clone())?.apply(dataset, rules)
    }

    pub fn evaluate(truth: &Dataset, output: &Dataset) -> EvaluationReport {
        crate::evaluate::evaluate(truth, output)
    }
}

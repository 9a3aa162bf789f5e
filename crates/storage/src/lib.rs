pub mod db;
pub mod hash;
pub mod store;

pub use db::{
    create_db, list_rule_sets, load_latest_rule_set, load_rule_set, save_rule_set, DbPool,
};
pub use store::{DirectoryRuleStore, RuleSetId, RuleSetSummary, RuleStore, StoreError};

use anyhow::{bail, Context};
use ledgerfill_core::{Dataset, RuleSet, TargetField};
use ledgerfill_import::{
    fill, ApplyReport, CsvImportProfile, EvaluationReport, IntegrityStatus, MinerConfig,
    MiningOutcome,
};
use ledgerfill_storage::{
    DbPool, DirectoryRuleStore, RuleSetId, RuleSetSummary, RuleStore, StoreError,
};
use serde::Serialize;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use crate::settings::Settings;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum Preset {
    /// Fixed at 85 %, variable band from 65 %
    Soft,
    /// Only unanimous columns
    Perfect,
}

/// The configured rule store: a directory of JSON files or a SQLite file.
pub enum Store {
    Directory(DirectoryRuleStore),
    Sqlite(DbPool),
}

impl Store {
    pub async fn open(
        settings: &Settings,
        rules_dir: Option<&Path>,
        database: Option<&Path>,
    ) -> anyhow::Result<Self> {
        if let Some(db) = database.or(settings.store.database.as_deref()) {
            if let Some(parent) = db.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            let pool = ledgerfill_storage::create_db(db)
                .await
                .with_context(|| format!("Failed to open rule database {}", db.display()))?;
            return Ok(Store::Sqlite(pool));
        }
        let dir = settings.rules_dir(rules_dir);
        tracing::debug!("Using rules directory {}", dir.display());
        Ok(Store::Directory(DirectoryRuleStore::new(dir)))
    }

    async fn save(&self, rule_set: &RuleSet) -> Result<RuleSetId, StoreError> {
        match self {
            Store::Directory(store) => store.save(rule_set),
            Store::Sqlite(pool) => ledgerfill_storage::save_rule_set(pool, rule_set).await,
        }
    }

    async fn load(&self, id: &RuleSetId) -> Result<RuleSet, StoreError> {
        match self {
            Store::Directory(store) => store.load(id),
            Store::Sqlite(pool) => ledgerfill_storage::load_rule_set(pool, id).await,
        }
    }

    async fn load_latest(&self) -> Result<RuleSet, StoreError> {
        match self {
            Store::Directory(store) => store.load_latest(),
            Store::Sqlite(pool) => ledgerfill_storage::load_latest_rule_set(pool).await,
        }
    }

    async fn list(&self) -> Result<Vec<RuleSetSummary>, StoreError> {
        match self {
            Store::Directory(store) => store.list(),
            Store::Sqlite(pool) => ledgerfill_storage::list_rule_sets(pool).await,
        }
    }
}

pub struct MineArgs {
    pub input: PathBuf,
    pub profile: CsvImportProfile,
    pub preset: Option<Preset>,
    pub dry_run: bool,
}

pub struct ApplyArgs {
    pub input: PathBuf,
    pub output: PathBuf,
    pub profile: CsvImportProfile,
    pub rules: Option<PathBuf>,
    pub max_rules: Option<usize>,
    pub strict: bool,
    pub extract_references: bool,
}

fn read_dataset(path: &Path, profile: &CsvImportProfile) -> anyhow::Result<Dataset> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let dataset = fill::read_csv(BufReader::new(file), profile)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    tracing::info!(
        rows = dataset.len(),
        columns = dataset.width(),
        "Loaded {}",
        path.display()
    );
    Ok(dataset)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn miner_config(settings: &Settings, preset: Option<Preset>) -> MinerConfig {
    let configured = &settings.fill.mining;
    let base = match preset {
        None => return configured.clone(),
        Some(Preset::Soft) => MinerConfig::soft(),
        Some(Preset::Perfect) => MinerConfig::perfect(),
    };
    MinerConfig {
        grouping_levels: configured.grouping_levels.clone(),
        ..base
    }
}

pub async fn mine(
    settings: &Settings,
    store: &Store,
    args: MineArgs,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let dataset = read_dataset(&args.input, &args.profile)?;
    let config = miner_config(settings, args.preset);
    let outcome = fill::mine_rules(&dataset, &config).context("Rule mining failed")?;

    let id = if args.dry_run {
        None
    } else {
        Some(store.save(&outcome.rule_set).await.context("Failed to save rule set")?)
    };

    match format {
        OutputFormat::Json => {
            #[derive(Serialize)]
            struct MineSummary<'a> {
                id: Option<&'a RuleSetId>,
                total_rule_count: usize,
                stats: &'a ledgerfill_import::MiningStats,
            }
            print_json(&MineSummary {
                id: id.as_ref(),
                total_rule_count: outcome.rule_set.len(),
                stats: &outcome.stats,
            })
        }
        OutputFormat::Text => {
            print_mining(&outcome);
            match &id {
                Some(id) => println!("Saved rule set {id}"),
                None => println!("Dry run: rule set not saved"),
            }
            Ok(())
        }
    }
}

fn print_mining(outcome: &MiningOutcome) {
    println!("Records analysed: {}", outcome.stats.records_seen);
    for level in &outcome.stats.levels {
        println!(
            "  level {} ({:?}): {} groups, {} below support, {} rules, {} records covered",
            level.level,
            level.key,
            level.groups,
            level.groups_below_support,
            level.rules_emitted,
            level.records_covered
        );
    }
    println!("Rules in set: {}", outcome.rule_set.len());
    for (kind, count) in outcome.rule_set.kind_counts() {
        println!("  {kind}: {count}");
    }
}

/// Loads the rule set to apply. Rule-set problems are reported and turned
/// into "no rules" so the dataset still goes through unchanged.
async fn rules_for_apply(store: &Store, explicit: Option<&Path>) -> Option<RuleSet> {
    let loaded = match explicit {
        Some(path) => std::fs::read(path)
            .map_err(StoreError::from)
            .and_then(|bytes| RuleSet::from_slice(&bytes).map_err(StoreError::from)),
        None => store.load_latest().await,
    };
    match loaded {
        Ok(set) => {
            if set.rejected_rules > 0 {
                tracing::warn!("{} malformed rule(s) skipped", set.rejected_rules);
            }
            Some(set)
        }
        Err(e) if e.is_not_found() => {
            tracing::warn!("No rule set found; no rules will be applied");
            None
        }
        Err(e) => {
            tracing::warn!("Rule set unavailable ({e}); no rules will be applied");
            None
        }
    }
}

pub async fn apply(
    settings: &Settings,
    store: &Store,
    args: ApplyArgs,
    format: OutputFormat,
) -> anyhow::Result<ApplyReport> {
    let mut dataset = read_dataset(&args.input, &args.profile)?;
    for field in TargetField::ALL {
        dataset.ensure_column(field.column());
    }

    let rules = rules_for_apply(store, args.rules.as_deref()).await;

    let mut config = settings.fill.apply.clone();
    if args.max_rules.is_some() {
        config.max_rules = args.max_rules;
    }
    config.strict |= args.strict;
    config.reference_extraction.enabled |= args.extract_references;

    let outcome = fill::apply_rules(&dataset, rules.as_ref(), &config)?;

    let out = File::create(&args.output)
        .with_context(|| format!("Failed to create {}", args.output.display()))?;
    fill::write_csv(&outcome.dataset, BufWriter::new(out))
        .with_context(|| format!("Failed to write {}", args.output.display()))?;

    let report = outcome.report;
    if report.integrity.is_violated() {
        tracing::error!("Protected data changed during application; output is suspect");
    }

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => print_apply(&report, &args.output),
    }
    Ok(report)
}

fn print_apply(report: &ApplyReport, output: &Path) {
    if !report.rule_set_available {
        println!("No rule set available: dataset written unchanged");
    }
    println!("Rules loaded:    {}", report.rules_loaded);
    if report.rules_rejected > 0 {
        println!("Rules rejected:  {}", report.rules_rejected);
    }
    println!("Rules matched:   {}", report.rules_matched);
    println!("Rules applied:   {}", report.rules_applied);
    println!("Cells filled:    {}", report.cells_filled);
    for (column, count) in &report.fills_by_column {
        println!("  {column}: {count}");
    }
    if report.protected_assignments_blocked > 0 {
        println!(
            "Protected assignments blocked: {}",
            report.protected_assignments_blocked
        );
    }
    println!(
        "Completion:      {:.1}% -> {:.1}% (+{:.1}%)",
        report.initial_completion, report.final_completion, report.improvement
    );
    match &report.integrity {
        IntegrityStatus::Verified => println!("Integrity:       verified"),
        IntegrityStatus::Skipped => println!("Integrity:       not checked"),
        IntegrityStatus::Violated { violations } => {
            println!("Integrity:       VIOLATED ({} issue(s))", violations.len());
            for v in violations.iter().take(10) {
                println!("  {v}");
            }
        }
    }
    for rule in report.top_rules.iter().take(5) {
        println!(
            "  [p{}] {} -> {} cell(s)",
            rule.priority, rule.rule, rule.cells_filled
        );
    }
    println!("Wrote {}", output.display());
}

pub fn evaluate(
    truth: &Path,
    output: &Path,
    profile: &CsvImportProfile,
    format: OutputFormat,
) -> anyhow::Result<EvaluationReport> {
    let truth_ds = read_dataset(truth, profile)?;
    let output_ds = read_dataset(output, profile)?;
    let report = fill::evaluate(&truth_ds, &output_ds);

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => {
            println!("Rows compared: {}", report.rows_compared);
            println!(
                "{:<12} {:>8} {:>9} {:>8} {:>7} {:>9} {:>10}",
                "Column", "Labeled", "Predicted", "Correct", "Missed", "Accuracy", "Precision"
            );
            for (column, m) in &report.columns {
                println!(
                    "{:<12} {:>8} {:>9} {:>8} {:>7} {:>8.1}% {:>9.1}%",
                    column,
                    m.should_predict,
                    m.predicted,
                    m.correct,
                    m.missed,
                    m.accuracy,
                    m.precision
                );
            }
            println!(
                "Overall: accuracy {:.1}%, precision {:.1}%",
                report.overall_accuracy, report.overall_precision
            );
            if report.other_columns_unchanged() {
                println!("Other columns unchanged");
            } else {
                for (column, changes) in &report.unexpected_changes {
                    println!("Changed non-target column {column}: {changes} cell(s)");
                }
            }
        }
    }
    Ok(report)
}

pub async fn inspect(
    store: &Store,
    id: Option<&str>,
    top: usize,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let set = match id {
        Some(raw) => {
            let id = RuleSetId::parse(raw)?;
            store.load(&id).await?
        }
        None => match store.load_latest().await {
            Ok(set) => set,
            Err(e) if e.is_not_found() => {
                bail!("No rule set stored yet; run `ledgerfill mine` first")
            }
            Err(e) => return Err(e.into()),
        },
    };

    if format == OutputFormat::Json {
        println!("{}", set.to_json_pretty()?);
        return Ok(());
    }

    println!("Created:     {}", set.creation_timestamp.to_rfc3339());
    println!("Total rules: {}", set.total_rule_count);
    for (level, count) in &set.level_counts {
        println!("  level {level}: {count}");
    }
    for (kind, count) in set.kind_counts() {
        println!("  {kind}: {count}");
    }
    for rule in set.rules.iter().take(top) {
        let fixed: Vec<String> = rule
            .fixed_columns
            .iter()
            .map(|(c, v)| format!("{c}={v}"))
            .collect();
        let variable: Vec<String> = rule
            .variable_columns
            .iter()
            .map(|(c, v)| format!("{c}~{} ({:.0}%)", v.default_value, v.confidence * 100.0))
            .collect();
        println!(
            "[p{} s{} c{:.2}] {:<40} {} {}",
            rule.priority,
            rule.support,
            rule.global_confidence,
            rule.label(),
            fixed.join(", "),
            variable.join(", ")
        );
    }
    Ok(())
}

pub async fn list(store: &Store, format: OutputFormat) -> anyhow::Result<()> {
    let summaries = store.list().await?;
    match format {
        OutputFormat::Json => print_json(&summaries),
        OutputFormat::Text => {
            if summaries.is_empty() {
                println!("No rule sets stored");
            }
            for s in &summaries {
                println!(
                    "{}  {}  {} rule(s)",
                    s.id,
                    s.creation_timestamp.to_rfc3339(),
                    s.total_rule_count
                );
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRAINING: &str = "\
Description,Bank account,CCY,Amount USD,Nature,Descrip,Vessel,Service,Reference
ADVICEPRO monthly fee,EUR-001,EUR,1800.00,G- Suppliers,ADVICEPRO,N/A,OHD,
ADVICEPRO monthly fee,EUR-001,EUR,1750.00,G- Suppliers,ADVICEPRO,N/A,OHD,
ADVICEPRO monthly fee,EUR-001,EUR,1820.00,G- Suppliers,ADVICEPRO,N/A,OHD,
Port dues 0001,USD-002,USD,300.00,Import,,,,
Port dues 0002,USD-002,USD,310.00,Import,,,,
Port dues 0003,USD-002,USD,320.00,Import,,,,
";

    const TARGET: &str = "\
Description,Bank account,CCY,Amount USD,Service
ADVICEPRO monthly fee,EUR-001,EUR,1900.00,
Payment to ADVICEPRO for consulting,EUR-001,EUR,500.00,Consulting
Harbour fee,USD-002,USD,120.00,
";

    fn setup() -> (tempfile::TempDir, Settings, Store) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("training.csv"), TRAINING).unwrap();
        std::fs::write(dir.path().join("target.csv"), TARGET).unwrap();
        let settings = Settings::default();
        let store = Store::Directory(DirectoryRuleStore::new(dir.path().join("rules")));
        (dir, settings, store)
    }

    fn apply_args(dir: &Path) -> ApplyArgs {
        ApplyArgs {
            input: dir.join("target.csv"),
            output: dir.join("out.csv"),
            profile: CsvImportProfile::default(),
            rules: None,
            max_rules: None,
            strict: true,
            extract_references: false,
        }
    }

    #[tokio::test]
    async fn mine_then_apply_fills_empty_cells_only() {
        let (dir, settings, store) = setup();
        mine(
            &settings,
            &store,
            MineArgs {
                input: dir.path().join("training.csv"),
                profile: CsvImportProfile::default(),
                preset: None,
                dry_run: false,
            },
            OutputFormat::Text,
        )
        .await
        .unwrap();
        assert_eq!(store.list().await.unwrap().len(), 1);

        let report = apply(&settings, &store, apply_args(dir.path()), OutputFormat::Text)
            .await
            .unwrap();
        assert!(report.rule_set_available);
        assert_eq!(report.integrity, IntegrityStatus::Verified);

        let out = read_dataset(&dir.path().join("out.csv"), &CsvImportProfile::default()).unwrap();
        let service = out.column_index("Service").unwrap();
        let nature = out.column_index("Nature").unwrap();
        assert_eq!(out.cell(0, service), Some("OHD"));
        assert_eq!(out.cell(1, service), Some("Consulting"));
        // Level-3 account/currency rule.
        assert_eq!(out.cell(2, nature), Some("Import"));
        assert_eq!(out.cell(2, out.column_index("Amount USD").unwrap()), Some("120.00"));
    }

    #[tokio::test]
    async fn apply_without_rules_writes_input_unchanged() {
        let (dir, settings, store) = setup();
        let report = apply(&settings, &store, apply_args(dir.path()), OutputFormat::Json)
            .await
            .unwrap();
        assert!(!report.rule_set_available);
        assert_eq!(report.cells_filled, 0);

        let out = read_dataset(&dir.path().join("out.csv"), &CsvImportProfile::default()).unwrap();
        // Target columns are created by the caller even when nothing is filled.
        assert!(out.has_column("Vessel"));
        assert_eq!(out.len(), 3);
    }

    #[tokio::test]
    async fn corrupt_explicit_rule_file_falls_back_to_no_rules() {
        let (dir, settings, store) = setup();
        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "{oops").unwrap();
        let args = ApplyArgs {
            rules: Some(bad),
            ..apply_args(dir.path())
        };
        let report = apply(&settings, &store, args, OutputFormat::Text).await.unwrap();
        assert!(!report.rule_set_available);
    }

    #[tokio::test]
    async fn dry_run_does_not_save() {
        let (dir, settings, store) = setup();
        mine(
            &settings,
            &store,
            MineArgs {
                input: dir.path().join("training.csv"),
                profile: CsvImportProfile::default(),
                preset: Some(Preset::Perfect),
                dry_run: true,
            },
            OutputFormat::Json,
        )
        .await
        .unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }

    #[test]
    fn preset_keeps_configured_levels() {
        let mut settings = Settings::default();
        settings.fill.mining.grouping_levels.truncate(1);
        let config = miner_config(&settings, Some(Preset::Perfect));
        assert_eq!(config.confidence_fixed, 1.0);
        assert_eq!(config.grouping_levels.len(), 1);
    }
}

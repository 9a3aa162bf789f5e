use anyhow::Context;
use ledgerfill_import::{ConfigError, FillConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "ledgerfill.toml";

/// Where rule sets are persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub rules_dir: Option<PathBuf>,
    /// SQLite file; when set it is used instead of `rules_dir`.
    pub database: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StoreSection {
    store: StoreSettings,
}

/// Everything read from `ledgerfill.toml`: the `[store]` section plus the
/// engine's `[mining]` and `[apply]` sections.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    pub store: StoreSettings,
    pub fill: FillConfig,
}

impl Settings {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let fill = FillConfig::from_toml(content)?;
        let StoreSection { store } = toml::from_str(content)?;
        Ok(Self { store, fill })
    }

    /// Reads `path` when given, otherwise the per-user config file if one
    /// exists, otherwise the defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match project_dirs().map(|d| d.config_dir().join(CONFIG_FILE)) {
                Some(p) if p.exists() => p,
                _ => {
                    tracing::debug!("No config file found; using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let settings = Self::from_toml(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(settings)
    }

    /// Rules directory: command-line override, then config, then the
    /// per-user data directory.
    pub fn rules_dir(&self, cli_override: Option<&Path>) -> PathBuf {
        cli_override
            .map(Path::to_path_buf)
            .or_else(|| self.store.rules_dir.clone())
            .or_else(|| project_dirs().map(|d| d.data_dir().join("rules")))
            .unwrap_or_else(|| PathBuf::from("rules"))
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "ledgerfill", "Ledgerfill")
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerfill_import::MinerConfig;

    #[test]
    fn store_section_sits_beside_engine_sections() {
        let toml = r#"
            [store]
            rules_dir = "/srv/ledgerfill/rules"

            [mining]
            min_support = 4

            [apply]
            max_rules = 150
        "#;
        let settings = Settings::from_toml(toml).unwrap();
        assert_eq!(
            settings.store.rules_dir,
            Some(PathBuf::from("/srv/ledgerfill/rules"))
        );
        assert_eq!(settings.store.database, None);
        assert_eq!(settings.fill.mining.min_support, 4);
        assert_eq!(settings.fill.apply.max_rules, Some(150));
    }

    #[test]
    fn empty_file_gives_defaults() {
        let settings = Settings::from_toml("").unwrap();
        assert_eq!(settings.fill.mining, MinerConfig::soft());
        assert_eq!(settings.store, StoreSettings::default());
    }

    #[test]
    fn cli_override_wins_for_rules_dir() {
        let settings = Settings {
            store: StoreSettings {
                rules_dir: Some(PathBuf::from("from-config")),
                database: None,
            },
            ..Settings::default()
        };
        assert_eq!(
            settings.rules_dir(Some(Path::new("from-cli"))),
            PathBuf::from("from-cli")
        );
        assert_eq!(settings.rules_dir(None), PathBuf::from("from-config"));
    }

    #[test]
    fn explicit_config_file_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "[apply]\nstrict = true\n").unwrap();
        let settings = Settings::load(Some(&path)).unwrap();
        assert!(settings.fill.apply.strict);
    }

    #[test]
    fn missing_explicit_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Settings::load(Some(&dir.path().join("absent.toml"))).is_err());
    }
}

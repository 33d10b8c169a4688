use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SeedbedConfig {
    pub database: Option<String>,
    /// Separator between key fields in `ref` and in references
    pub separator: Option<String>,
    /// Resolve references missing from a document against the database
    pub auto_load: Option<bool>,
}

impl SeedbedConfig {
    /// The configuration `seedbed init` writes
    pub fn starter() -> Self {
        Self {
            database: Some(default_database_path().display().to_string()),
            separator: Some(crate::loader::DEFAULT_SEPARATOR.to_string()),
            auto_load: Some(false),
        }
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("seedbed.toml")
}

pub fn default_database_path() -> PathBuf {
    PathBuf::from("seedbed.db")
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Option<SeedbedConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    let config: SeedbedConfig = toml::from_str(&contents)?;
    Ok(Some(config))
}

pub fn write_config(path: &Path, config: &SeedbedConfig, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("config already exists at {} (use --force to overwrite)", path.display());
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}

pub fn ensure_db_dir(db_path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_config_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_config(Some(&dir.path().join("seedbed.toml"))).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_write_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seedbed.toml");
        let config = SeedbedConfig {
            database: Some("data/seed.db".to_string()),
            separator: Some(";".to_string()),
            auto_load: Some(true),
        };
        write_config(&path, &config, false).unwrap();
        assert_eq!(load_config(Some(&path)).unwrap(), Some(config.clone()));

        assert!(write_config(&path, &config, false).is_err());
        write_config(&path, &SeedbedConfig::starter(), true).unwrap();
        assert_eq!(load_config(Some(&path)).unwrap(), Some(SeedbedConfig::starter()));
    }

    #[test]
    fn test_ensure_db_dir_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("nested").join("seed.db");
        ensure_db_dir(&db).unwrap();
        assert!(dir.path().join("nested").is_dir());
    }
}

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::schema::DataType;
use crate::{Error, Result};

pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Physical layout names and engine tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub object_table: String,
    pub object_log_table: String,
    pub relation_table: String,
    pub relation_log_table: String,
    /// Data type ID → value table name
    pub data_type_tables: BTreeMap<String, String>,
    /// Value table name → log table name
    pub value_log_tables: BTreeMap<String, String>,
    /// Number of IDs explicitly listed in one query
    pub batch_size: usize,
    /// Derive type → expression template overrides (`{0}` is the source field)
    pub derive_types: BTreeMap<String, String>,
    /// Write audit log entries when an audit log is attached
    pub logging: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let data_type_tables = [
            (DataType::Boolean, "object_integer_values"),
            (DataType::Integer, "object_integer_values"),
            (DataType::Decimal, "object_decimal_values"),
            (DataType::String, "object_string_values"),
            (DataType::Date, "object_datetime_values"),
            (DataType::DateTime, "object_datetime_values"),
        ]
        .into_iter()
        .map(|(dt, table)| (dt.id().to_string(), table.to_string()))
        .collect();

        let value_log_tables = [
            "object_integer_values",
            "object_decimal_values",
            "object_string_values",
            "object_datetime_values",
        ]
        .into_iter()
        .map(|table| (table.to_string(), format!("{}_log", table)))
        .collect();

        Self {
            object_table: "objects".to_string(),
            object_log_table: "objects_log".to_string(),
            relation_table: "object_relations".to_string(),
            relation_log_table: "object_relations_log".to_string(),
            data_type_tables,
            value_log_tables,
            batch_size: DEFAULT_BATCH_SIZE,
            derive_types: BTreeMap::new(),
            logging: true,
        }
    }
}

impl StorageConfig {
    /// Value table holding values of `data_type`
    pub fn value_table(&self, data_type: DataType) -> Result<&str> {
        self.data_type_tables
            .get(data_type.id())
            .map(String::as_str)
            .ok_or_else(|| Error::SchemaInconsistency(format!("Unknown data type: {}", data_type)))
    }

    /// Every distinct value table, in name order
    pub fn value_tables(&self) -> Vec<&str> {
        let tables: BTreeSet<&str> = self.data_type_tables.values().map(String::as_str).collect();
        tables.into_iter().collect()
    }

    /// Data type whose SQL type a value table uses (first type mapped to it)
    pub fn value_table_type(&self, table: &str) -> DataType {
        DataType::all()
            .iter()
            .copied()
            .find(|dt| self.data_type_tables.get(dt.id()).is_some_and(|t| t == table))
            .unwrap_or(DataType::String)
    }

    pub fn value_log_table(&self, value_table: &str) -> Result<&str> {
        self.value_log_tables
            .get(value_table)
            .map(String::as_str)
            .ok_or_else(|| Error::Config(format!("no log table configured for {}", value_table)))
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be greater than zero".to_string()));
        }
        for dt in DataType::all() {
            self.value_table(*dt)?;
        }
        if self.logging {
            for table in self.value_tables() {
                self.value_log_table(table)?;
            }
        }
        Ok(())
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("objstore.toml")
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Option<StorageConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    let config: StorageConfig = toml::from_str(&contents)?;
    config.validate()?;
    Ok(Some(config))
}

pub fn write_config(path: &Path, config: &StorageConfig, force: bool) -> anyhow::Result<()> {
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
    fn test_default_layout() {
        let config = StorageConfig::default();
        assert_eq!(config.value_table(DataType::Boolean).unwrap(), "object_integer_values");
        assert_eq!(config.value_tables().len(), 4);
        assert_eq!(config.value_table_type("object_datetime_values"), DataType::Date);
        assert_eq!(config.batch_size, 1000);
        config.validate().unwrap();
    }

    #[test]
    fn test_config_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("objstore.toml");
        assert!(load_config(Some(&path)).unwrap().is_none());

        let mut config = StorageConfig::default();
        config.batch_size = 250;
        config.derive_types.insert("year".to_string(), "strftime('%Y', {0})".to_string());
        write_config(&path, &config, false).unwrap();
        assert!(write_config(&path, &config, false).is_err());

        let loaded = load_config(Some(&path)).unwrap().unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: StorageConfig = toml::from_str("batch_size = 10\nlogging = false\n").unwrap();
        assert_eq!(config.batch_size, 10);
        assert!(!config.logging);
        assert_eq!(config.object_table, "objects");
    }

    #[test]
    fn test_zero_batch_rejected() {
        let config = StorageConfig { batch_size: 0, ..Default::default() };
        assert!(config.validate().is_err());
    }
}

//! On-disk model configuration and translator options.
//!
//! ```toml
//! [options]
//! dialect = "sqlserver"
//!
//! [[entity]]
//! name = "Employee"
//! table = "Employees"
//!
//! [[entity.column]]
//! member = "EmployeeId"
//! primary_key = true
//!
//! [[entity.navigation]]
//! name = "NavDepartment"
//! target = "Department"
//! cardinality = "to_one_optional"
//! keys = [{ parent = "DepartmentId", child = "DepartmentId" }]
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::model::Cardinality;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub options: TranslatorOptions,
    #[serde(default, rename = "entity")]
    pub entities: Vec<EntityConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityConfig {
    pub name: String,
    /// Defaults to the entity name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(default, rename = "column")]
    pub columns: Vec<ColumnConfig>,
    #[serde(default, rename = "navigation")]
    pub navigations: Vec<NavigationConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnConfig {
    pub member: String,
    /// Defaults to the member name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    #[serde(default)]
    pub primary_key: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationConfig {
    pub name: String,
    pub target: String,
    pub cardinality: Cardinality,
    pub keys: Vec<KeyPair>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyPair {
    pub parent: String,
    pub child: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialectKind {
    #[default]
    SqlServer,
    Postgres,
}

impl FromStr for DialectKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlserver" | "mssql" | "tsql" => Ok(DialectKind::SqlServer),
            "postgres" | "postgresql" | "pg" => Ok(DialectKind::Postgres),
            other => Err(format!("unknown dialect '{other}' (expected sqlserver or postgres)")),
        }
    }
}

impl fmt::Display for DialectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DialectKind::SqlServer => f.write_str("sqlserver"),
            DialectKind::Postgres => f.write_str("postgres"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslatorOptions {
    pub dialect: DialectKind,
    /// Run the expression rewrites before conversion.
    pub preprocess: bool,
    /// Move every CTE to the statement's WITH clause.
    pub hoist_ctes: bool,
}

impl Default for TranslatorOptions {
    fn default() -> Self {
        Self {
            dialect: DialectKind::SqlServer,
            preprocess: true,
            hoist_ctes: true,
        }
    }
}

impl ModelConfig {
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("linqsql")
            .join("model.toml")
    }

    pub fn from_toml_str(source: &str) -> Result<Self> {
        Ok(toml::from_str(source)?)
    }

    /// Loads the model at `path`. A missing file yields an empty model.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading model file {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("parsing model file {}", path.display()))
    }

    pub fn load_default() -> Result<Self> {
        Self::load(&Self::default_path())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_default_when_absent() {
        let config = ModelConfig::from_toml_str("").unwrap();
        assert_eq!(config.options, TranslatorOptions::default());
        assert!(config.entities.is_empty());
    }

    #[test]
    fn test_parse_entity_with_navigation() {
        let config = ModelConfig::from_toml_str(crate::testing::MODEL_TOML).unwrap();
        let employee = config.entities.iter().find(|e| e.name == "Employee").unwrap();
        assert_eq!(employee.table.as_deref(), Some("Employees"));
        let nav = &employee.navigations[0];
        assert_eq!(nav.cardinality, Cardinality::ToOneOptional);
        assert_eq!(nav.keys[0].parent, "DepartmentId");
    }

    #[test]
    fn test_options_partial_override() {
        let config = ModelConfig::from_toml_str("[options]\ndialect = \"postgres\"\n").unwrap();
        assert_eq!(config.options.dialect, DialectKind::Postgres);
        assert!(config.options.preprocess);
    }

    #[test]
    fn test_missing_file_is_empty_model() {
        let path = std::env::temp_dir().join("linqsql-does-not-exist").join("model.toml");
        let config = ModelConfig::load(&path).unwrap();
        assert!(config.entities.is_empty());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = std::env::temp_dir().join(format!("linqsql-config-{}", std::process::id()));
        let path = dir.join("model.toml");
        let config = ModelConfig::from_toml_str(crate::testing::MODEL_TOML).unwrap();
        config.save(&path).unwrap();
        let loaded = ModelConfig::load(&path).unwrap();
        assert_eq!(config, loaded);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_dialect_from_str() {
        assert_eq!("PostgreSQL".parse::<DialectKind>().unwrap(), DialectKind::Postgres);
        assert!("oracle".parse::<DialectKind>().is_err());
    }
}

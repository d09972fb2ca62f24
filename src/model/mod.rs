//! Model metadata: how entity types map onto tables and columns.
//!
//! The compiler never guesses about the model. Every table, column and
//! navigation it emits comes from a [`ModelMetadata`] implementation;
//! [`ModelRegistry`] is the TOML-backed one shipped with the crate.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{EntityConfig, ModelConfig};
use crate::error::{Result, TranslateError};
use crate::expr::{Expr, MemberAccess, TypeRef, Value};

/// Schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName {
    pub schema: Option<String>,
    pub name: String,
}

impl TableName {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: None,
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    /// Member name on the entity type.
    pub member: String,
    /// Column name in the table.
    pub column: String,
    pub primary_key: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    /// Exactly one related row; joined with INNER JOIN.
    ToOneRequired,
    /// Zero or one related row; joined with LEFT JOIN.
    ToOneOptional,
    ToMany,
}

/// A navigation property from one entity to another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationInfo {
    pub name: String,
    pub target: String,
    pub cardinality: Cardinality,
    /// `(parent member, target member)` pairs forming the join predicate.
    pub keys: Vec<(String, String)>,
}

impl NavigationInfo {
    pub fn is_to_many(&self) -> bool {
        self.cardinality == Cardinality::ToMany
    }
}

/// Read-only model lookups used by the converters.
pub trait ModelMetadata {
    fn table_name(&self, entity: &str) -> Result<TableName>;

    fn table_columns(&self, entity: &str) -> Result<&[ColumnInfo]>;

    fn navigation(&self, entity: &str, name: &str) -> Result<NavigationInfo>;

    fn column_members(&self, entity: &str) -> Result<Vec<String>> {
        Ok(self
            .table_columns(entity)?
            .iter()
            .map(|c| c.member.clone())
            .collect())
    }

    fn primary_keys(&self, entity: &str) -> Result<Vec<String>> {
        Ok(self
            .table_columns(entity)?
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.member.clone())
            .collect())
    }

    fn column_name(&self, entity: &str, member: &str) -> Result<String> {
        self.table_columns(entity)?
            .iter()
            .find(|c| c.member == member)
            .map(|c| c.column.clone())
            .ok_or_else(|| TranslateError::UnknownMember {
                entity: entity.to_string(),
                member: member.to_string(),
            })
    }

    fn is_queryable_type(&self, ty: &TypeRef) -> bool {
        matches!(ty, TypeRef::Queryable(_))
    }

    fn is_grouping_type(&self, ty: &TypeRef) -> bool {
        ty.is_grouping()
    }

    /// Sequence-typed values (collections of rows), excluding strings.
    fn is_enumerable(&self, ty: &TypeRef) -> bool {
        ty.is_sequence()
    }

    /// Whether the expression is a value computed outside the query: a
    /// captured variable or a member chain rooted at one.
    fn is_variable(&self, expr: &Expr) -> bool {
        match expr {
            Expr::Variable(_) => true,
            Expr::Member(MemberAccess {
                target: Some(target),
                ..
            }) => self.is_variable(target),
            _ => false,
        }
    }

    /// Evaluates an expression for which [`is_variable`](Self::is_variable)
    /// holds, or a constant.
    fn evaluate(&self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Variable(v) => Ok(v.value.clone()),
            Expr::Constant(c) => Ok(c.value.clone()),
            Expr::Member(MemberAccess {
                target: Some(target),
                member,
                ..
            }) => match self.evaluate(target)? {
                Value::Object(fields) => fields.get(member).cloned().ok_or_else(|| {
                    TranslateError::MissingBinding {
                        member: member.clone(),
                        context: "captured value".into(),
                    }
                }),
                Value::String(s) if member == "Length" => Ok(Value::Int(s.chars().count() as i64)),
                Value::List(items) if member == "Count" || member == "Length" => {
                    Ok(Value::Int(items.len() as i64))
                }
                _ => Err(TranslateError::unsupported(format!(
                    "evaluating member '{member}' of a captured value"
                ))),
            },
            Expr::NewArray(a) => Ok(Value::List(
                a.items.iter().map(|i| self.evaluate(i)).collect::<Result<_>>()?,
            )),
            other => Err(TranslateError::unsupported(format!(
                "evaluating {} outside the query",
                other.kind_name()
            ))),
        }
    }
}

#[derive(Debug, Clone)]
struct EntityModel {
    table: TableName,
    columns: Vec<ColumnInfo>,
    navigations: Vec<NavigationInfo>,
}

/// [`ModelMetadata`] backed by a [`ModelConfig`].
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    entities: HashMap<String, EntityModel>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the registry and validates cross references: navigation
    /// targets must exist and key members must be columns on both sides.
    pub fn from_config(config: &ModelConfig) -> Result<Self> {
        let mut registry = Self::new();
        for entity in &config.entities {
            registry.add_entity(entity)?;
        }
        registry.validate()?;
        debug!(entities = registry.entities.len(), "model registry loaded");
        Ok(registry)
    }

    pub fn from_toml(source: &str) -> Result<Self> {
        let config = ModelConfig::from_toml_str(source).map_err(|e| TranslateError::Config(e.to_string()))?;
        Self::from_config(&config)
    }

    pub fn add_entity(&mut self, entity: &EntityConfig) -> Result<()> {
        if self.entities.contains_key(&entity.name) {
            return Err(TranslateError::Config(format!(
                "entity '{}' is declared twice",
                entity.name
            )));
        }
        let columns = entity
            .columns
            .iter()
            .map(|c| ColumnInfo {
                member: c.member.clone(),
                column: c.column.clone().unwrap_or_else(|| c.member.clone()),
                primary_key: c.primary_key,
            })
            .collect();
        let navigations = entity
            .navigations
            .iter()
            .map(|n| NavigationInfo {
                name: n.name.clone(),
                target: n.target.clone(),
                cardinality: n.cardinality,
                keys: n.keys.iter().map(|k| (k.parent.clone(), k.child.clone())).collect(),
            })
            .collect();
        self.entities.insert(
            entity.name.clone(),
            EntityModel {
                table: TableName {
                    schema: entity.schema.clone(),
                    name: entity.table.clone().unwrap_or_else(|| entity.name.clone()),
                },
                columns,
                navigations,
            },
        );
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        for (name, entity) in &self.entities {
            if entity.columns.is_empty() {
                return Err(TranslateError::Config(format!("entity '{name}' has no columns")));
            }
            for nav in &entity.navigations {
                let target = self.entities.get(&nav.target).ok_or_else(|| {
                    TranslateError::Config(format!(
                        "navigation '{name}.{}' targets unknown entity '{}'",
                        nav.name, nav.target
                    ))
                })?;
                if nav.keys.is_empty() {
                    return Err(TranslateError::Config(format!(
                        "navigation '{name}.{}' has no key pairs",
                        nav.name
                    )));
                }
                for (parent, child) in &nav.keys {
                    let known = entity.columns.iter().any(|c| &c.member == parent)
                        && target.columns.iter().any(|c| &c.member == child);
                    if !known {
                        return Err(TranslateError::Config(format!(
                            "navigation '{name}.{}' key {parent} -> {child} is not a column pair",
                            nav.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn entity_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entities.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn entity(&self, name: &str) -> Result<&EntityModel> {
        self.entities
            .get(name)
            .ok_or_else(|| TranslateError::UnknownEntity(name.to_string()))
    }
}

impl ModelMetadata for ModelRegistry {
    fn table_name(&self, entity: &str) -> Result<TableName> {
        Ok(self.entity(entity)?.table.clone())
    }

    fn table_columns(&self, entity: &str) -> Result<&[ColumnInfo]> {
        Ok(&self.entity(entity)?.columns)
    }

    fn navigation(&self, entity: &str, name: &str) -> Result<NavigationInfo> {
        self.entity(entity)?
            .navigations
            .iter()
            .find(|n| n.name == name)
            .cloned()
            .ok_or_else(|| TranslateError::UnknownNavigation {
                entity: entity.to_string(),
                navigation: name.to_string(),
            })
    }
}

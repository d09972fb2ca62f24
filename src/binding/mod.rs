//! Name binding: lambda parameters, data-source shapes and member
//! resolution.
//!
//! [`Bindings`] is the per-compilation symbol table. It owns the alias
//! counter, the `parameter -> SQL value` scope stack, the registry of what
//! columns each data source exposes, and the column cache that keeps
//! resolution reference-stable.

pub mod path;

use std::collections::HashMap;
use std::rc::Rc;

use tracing::trace;

use crate::error::{Result, TranslateError};
use crate::model::ModelMetadata;
use crate::sql::{Alias, QuerySource, SqlColumn, SqlComposite, SqlExpr};

pub use path::ModelPath;

/// Columns a data source exposes.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceShape {
    /// An entity table; members resolve through the model metadata.
    Entity(String),
    /// A derived table, union or CTE: `path -> column alias`. `entity` is
    /// set when every row is a whole row of that entity, so navigations and
    /// key comparisons still resolve through the model.
    Columns {
        columns: Vec<(ModelPath, String)>,
        entity: Option<String>,
    },
}

impl SourceShape {
    pub fn of(source: &QuerySource) -> SourceShape {
        match source {
            QuerySource::Table(t) => SourceShape::Entity(t.entity.clone()),
            QuerySource::Derived(d) => SourceShape::Columns {
                columns: d.column_paths(),
                entity: d.row_entity().map(str::to_string),
            },
            QuerySource::Union(u) => SourceShape::Columns {
                columns: u.column_paths(),
                entity: u.row_entity().map(str::to_string),
            },
            QuerySource::Cte { columns, .. } => SourceShape::Columns {
                columns: columns.clone(),
                entity: None,
            },
        }
    }

    /// The entity behind the rows, for tables and whole-row derived tables.
    pub fn entity(&self) -> Option<&str> {
        match self {
            SourceShape::Entity(entity) => Some(entity),
            SourceShape::Columns { entity, .. } => entity.as_deref(),
        }
    }
}

#[derive(Debug, Default)]
pub struct Bindings {
    params: Vec<(String, SqlExpr)>,
    sources: HashMap<Alias, SourceShape>,
    columns: HashMap<(Alias, String), Rc<SqlColumn>>,
    last_alias: u32,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_alias(&mut self) -> Alias {
        self.last_alias += 1;
        Alias(self.last_alias)
    }

    pub fn register_source(&mut self, alias: Alias, shape: SourceShape) {
        self.sources.insert(alias, shape);
    }

    pub fn source_shape(&self, alias: Alias) -> Result<&SourceShape> {
        self.sources
            .get(&alias)
            .ok_or_else(|| TranslateError::invalid(format!("data source {alias} is not registered")))
    }

    /// Innermost binding for `name`.
    pub fn lookup_parameter(&self, name: &str) -> Option<&SqlExpr> {
        self.params.iter().rev().find(|(n, _)| n == name).map(|(_, e)| e)
    }

    pub fn parameter_depth(&self) -> usize {
        self.params.len()
    }

    pub(crate) fn push_parameter(&mut self, name: String, value: SqlExpr) {
        trace!(parameter = %name, bound_to = value.kind_name(), "bind parameter");
        self.params.push((name, value));
    }

    pub(crate) fn truncate_parameters(&mut self, depth: usize) {
        self.params.truncate(depth);
    }

    /// Rewrites every outstanding parameter binding in place.
    pub(crate) fn remap_parameters(&mut self, mut f: impl FnMut(&mut SqlExpr)) {
        for (_, value) in &mut self.params {
            f(value);
        }
    }

    /// The column node for `alias.name`. Repeated requests return the same
    /// shared node.
    pub fn column(&mut self, alias: Alias, name: &str) -> SqlExpr {
        let column = self
            .columns
            .entry((alias, name.to_string()))
            .or_insert_with(|| {
                Rc::new(SqlColumn {
                    source: alias,
                    name: name.to_string(),
                })
            });
        SqlExpr::Column(Rc::clone(column))
    }

    /// The value a lambda parameter sees for a whole data source: a
    /// reference, or the column itself when the source has one unnamed
    /// column.
    pub fn source_shape_expr(&mut self, alias: Alias) -> SqlExpr {
        let scalar = match self.sources.get(&alias) {
            Some(SourceShape::Columns { columns: cols, .. }) if cols.len() == 1 && cols[0].0.is_empty() => {
                Some(cols[0].1.clone())
            }
            _ => None,
        };
        match scalar {
            Some(name) => self.column(alias, &name),
            None => SqlExpr::DataSourceRef(alias),
        }
    }

    /// Resolves `target.member`.
    pub fn resolve_member(
        &mut self,
        metadata: &dyn ModelMetadata,
        target: &SqlExpr,
        member: &str,
    ) -> Result<SqlExpr> {
        match target {
            SqlExpr::DataSourceRef(alias) => self.resolve_path(metadata, *alias, &ModelPath::single(member)),
            SqlExpr::Composite(c) => c.member(member).ok_or_else(|| TranslateError::MissingBinding {
                member: member.to_string(),
                context: "composite value".into(),
            }),
            SqlExpr::Grouping(g) if member == "Key" => Ok((*g.key).clone()),
            SqlExpr::Grouping(_) => Err(TranslateError::MissingBinding {
                member: member.to_string(),
                context: "grouping".into(),
            }),
            other => Err(TranslateError::shape(
                "data source or composite",
                other.kind_name(),
                format!("target of member '{member}'"),
            )),
        }
    }

    /// Resolves a path against a registered data source.
    pub fn resolve_path(&mut self, metadata: &dyn ModelMetadata, alias: Alias, path: &ModelPath) -> Result<SqlExpr> {
        let missing = || TranslateError::MissingBinding {
            member: path.to_string(),
            context: format!("data source {alias}"),
        };
        match self.source_shape(alias)?.clone() {
            SourceShape::Entity(entity) => match path.segments() {
                [member] => {
                    let column = metadata.column_name(&entity, member)?;
                    Ok(self.column(alias, &column))
                }
                _ => Err(missing()),
            },
            SourceShape::Columns { columns: cols, .. } => {
                if let Some((_, name)) = cols.iter().find(|(p, _)| p == path) {
                    return Ok(self.column(alias, name));
                }
                let nested: Vec<(ModelPath, String)> = cols
                    .iter()
                    .filter_map(|(p, name)| p.strip_prefix(path).map(|rest| (rest, name.clone())))
                    .collect();
                if nested.is_empty() {
                    return Err(missing());
                }
                Ok(SqlExpr::Composite(
                    nested
                        .into_iter()
                        .map(|(rest, name)| (rest, self.column(alias, &name)))
                        .collect::<SqlComposite>(),
                ))
            }
        }
    }

    /// Flattens a shape into `(path, leaf)` pairs under `prefix`, expanding
    /// whole data sources into their columns.
    pub fn flatten(
        &mut self,
        metadata: &dyn ModelMetadata,
        shape: &SqlExpr,
        prefix: &ModelPath,
        out: &mut Vec<(ModelPath, SqlExpr)>,
    ) -> Result<()> {
        match shape {
            SqlExpr::Composite(c) => {
                for (path, leaf) in c.entries() {
                    self.flatten(metadata, leaf, &prefix.concat(path), out)?;
                }
            }
            SqlExpr::DataSourceRef(alias) => match self.source_shape(*alias)?.clone() {
                SourceShape::Entity(entity) => {
                    for column in metadata.table_columns(&entity)? {
                        let leaf = self.column(*alias, &column.column);
                        out.push((prefix.append(column.member.clone()), leaf));
                    }
                }
                SourceShape::Columns { columns: cols, .. } => {
                    for (path, name) in cols {
                        let leaf = self.column(*alias, &name);
                        out.push((prefix.concat(&path), leaf));
                    }
                }
            },
            SqlExpr::Grouping(g) => self.flatten(metadata, &g.key, prefix, out)?,
            SqlExpr::DerivedTable(dt) => out.push((prefix.clone(), SqlExpr::Subquery(Box::new(dt.clone())))),
            SqlExpr::Select(_)
            | SqlExpr::Placeholder
            | SqlExpr::Table(_)
            | SqlExpr::Union(_)
            | SqlExpr::Update(_)
            | SqlExpr::Delete(_) => {
                return Err(TranslateError::shape(
                    "projectable value",
                    shape.kind_name(),
                    format!("projection member '{prefix}'"),
                ))
            }
            leaf => out.push((prefix.clone(), leaf.clone())),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::SqlGrouping;
    use crate::testing;

    #[test]
    fn test_entity_member_resolves_to_mapped_column() {
        let model = testing::model();
        let mut b = Bindings::new();
        let a = b.next_alias();
        b.register_source(a, SourceShape::Entity("Student".into()));
        let col = b.resolve_member(&model, &SqlExpr::DataSourceRef(a), "Name").unwrap();
        assert_eq!(col, SqlExpr::column(a, "FullName"));
    }

    #[test]
    fn test_resolution_is_reference_stable() {
        let model = testing::model();
        let mut b = Bindings::new();
        let a = b.next_alias();
        b.register_source(a, SourceShape::Entity("Student".into()));
        let first = b.resolve_path(&model, a, &ModelPath::single("Age")).unwrap();
        let second = b.resolve_path(&model, a, &ModelPath::single("Age")).unwrap();
        match (first, second) {
            (SqlExpr::Column(x), SqlExpr::Column(y)) => assert!(Rc::ptr_eq(&x, &y)),
            other => panic!("expected columns, got {other:?}"),
        }
    }

    #[test]
    fn test_derived_columns_resolve_by_prefix() {
        let model = testing::model();
        let mut b = Bindings::new();
        let a = b.next_alias();
        b.register_source(
            a,
            SourceShape::Columns {
                columns: vec![
                    (ModelPath::from_dotted("S.Id"), "S_Id".into()),
                    (ModelPath::from_dotted("S.Name"), "S_Name".into()),
                    (ModelPath::single("Grade"), "Grade".into()),
                ],
                entity: None,
            },
        );
        let s = b.resolve_member(&model, &SqlExpr::DataSourceRef(a), "S").unwrap();
        let name = b.resolve_member(&model, &s, "Name").unwrap();
        assert_eq!(name, SqlExpr::column(a, "S_Name"));
        assert!(b.resolve_member(&model, &SqlExpr::DataSourceRef(a), "T").is_err());
    }

    #[test]
    fn test_scalar_source_binds_to_its_column() {
        let mut b = Bindings::new();
        let a = b.next_alias();
        b.register_source(
            a,
            SourceShape::Columns {
                columns: vec![(ModelPath::EMPTY, "Age".into())],
                entity: None,
            },
        );
        assert_eq!(b.source_shape_expr(a), SqlExpr::column(a, "Age"));
    }

    #[test]
    fn test_inner_parameter_shadows_outer() {
        let mut b = Bindings::new();
        b.push_parameter("x".into(), SqlExpr::DataSourceRef(Alias(1)));
        let depth = b.parameter_depth();
        b.push_parameter("x".into(), SqlExpr::DataSourceRef(Alias(2)));
        assert_eq!(b.lookup_parameter("x"), Some(&SqlExpr::DataSourceRef(Alias(2))));
        b.truncate_parameters(depth);
        assert_eq!(b.lookup_parameter("x"), Some(&SqlExpr::DataSourceRef(Alias(1))));
    }

    #[test]
    fn test_grouping_key_member() {
        let model = testing::model();
        let mut b = Bindings::new();
        let g = SqlExpr::Grouping(SqlGrouping {
            key: Box::new(SqlExpr::column(Alias(1), "Age")),
            element: Box::new(SqlExpr::DataSourceRef(Alias(1))),
        });
        assert_eq!(b.resolve_member(&model, &g, "Key").unwrap(), SqlExpr::column(Alias(1), "Age"));
        assert!(b.resolve_member(&model, &g, "Other").is_err());
    }

    #[test]
    fn test_flatten_expands_entity_sources_under_prefix() {
        let model = testing::model();
        let mut b = Bindings::new();
        let a = b.next_alias();
        b.register_source(a, SourceShape::Entity("Course".into()));
        let mut shape = SqlComposite::new();
        shape.insert_member("C", SqlExpr::DataSourceRef(a));
        let mut out = Vec::new();
        b.flatten(&model, &SqlExpr::Composite(shape), &ModelPath::EMPTY, &mut out).unwrap();
        let paths: Vec<String> = out.iter().map(|(p, _)| p.to_string()).collect();
        assert_eq!(paths, vec!["C.CourseId", "C.Title"]);
    }
}

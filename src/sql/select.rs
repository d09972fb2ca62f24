//! The SELECT accumulator.
//!
//! Query operators do not build SQL text; each one mutates a [`SqlSelect`].
//! Before an operator touches the select it calls [`SqlSelect::prepare`]
//! with the kind of change it is about to make. When that change cannot be
//! expressed in the current select (filtering after paging, grouping twice,
//! ...), the select wraps itself: the old select becomes a derived table and
//! a fresh select reads from it.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use super::*;
use crate::binding::{Bindings, SourceShape};
use crate::error::{Result, TranslateError};
use crate::model::ModelMetadata;

/// The kind of change an operator is about to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Filter,
    Projection,
    Join,
    GroupBy,
    OrderBy,
    ThenBy,
    Take,
    Skip,
    Distinct,
    Aggregate,
    /// UPDATE/DELETE: never wraps, rejects incompatible selects.
    Modify,
    /// Reads the select without changing its clauses.
    Inspect,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SqlSelect {
    pub(crate) sources: Vec<SqlDataSource>,
    pub(crate) projection: Option<SqlExpr>,
    pub(crate) filter: Option<SqlExpr>,
    pub(crate) group_by: Option<SqlExpr>,
    /// Element shape of the groups, for lambdas over a grouping.
    pub(crate) group_element: Option<SqlExpr>,
    pub(crate) having: Option<SqlExpr>,
    pub(crate) order_by: Vec<OrderItem>,
    pub(crate) top: Option<SqlExpr>,
    pub(crate) skip: Option<SqlExpr>,
    pub(crate) distinct: bool,
    pub(crate) default_if_empty: bool,
    pub(crate) ctes: Vec<SqlCte>,
}

impl SqlSelect {
    pub fn from_source(source: QuerySource, bindings: &mut Bindings) -> Self {
        let alias = bindings.next_alias();
        bindings.register_source(alias, SourceShape::of(&source));
        Self {
            sources: vec![SqlDataSource {
                alias,
                source,
                join: None,
                navigation: None,
            }],
            ..Default::default()
        }
    }

    /// A select without a FROM clause computing one value.
    pub fn scalar(value: SqlExpr) -> Self {
        Self {
            projection: Some(value),
            ..Default::default()
        }
    }

    pub fn sources(&self) -> &[SqlDataSource] {
        &self.sources
    }

    pub fn projection(&self) -> Option<&SqlExpr> {
        self.projection.as_ref()
    }

    pub fn filter(&self) -> Option<&SqlExpr> {
        self.filter.as_ref()
    }

    pub fn group_by(&self) -> Option<&SqlExpr> {
        self.group_by.as_ref()
    }

    pub fn having(&self) -> Option<&SqlExpr> {
        self.having.as_ref()
    }

    pub fn order_by(&self) -> &[OrderItem] {
        &self.order_by
    }

    pub fn top(&self) -> Option<&SqlExpr> {
        self.top.as_ref()
    }

    pub fn skip(&self) -> Option<&SqlExpr> {
        self.skip.as_ref()
    }

    pub fn is_distinct(&self) -> bool {
        self.distinct
    }

    pub fn is_default_if_empty(&self) -> bool {
        self.default_if_empty
    }

    pub fn ctes(&self) -> &[SqlCte] {
        &self.ctes
    }

    pub fn initial_alias(&self) -> Option<Alias> {
        self.sources.first().map(|s| s.alias)
    }

    pub fn aliases(&self) -> impl Iterator<Item = Alias> + '_ {
        self.sources.iter().map(|s| s.alias)
    }

    pub fn contains_alias(&self, alias: Alias) -> bool {
        self.sources.iter().any(|s| s.alias == alias)
    }

    pub fn data_source(&self, alias: Alias) -> Option<&SqlDataSource> {
        self.sources.iter().find(|s| s.alias == alias)
    }

    pub fn is_paged(&self) -> bool {
        self.top.is_some() || self.skip.is_some()
    }

    pub fn is_grouped(&self) -> bool {
        self.group_by.is_some()
    }

    /// The entity whose whole rows this select returns, if any.
    pub fn row_entity(&self) -> Option<&str> {
        if self.is_grouped() {
            return None;
        }
        let alias = match &self.projection {
            None => self.initial_alias()?,
            Some(SqlExpr::DataSourceRef(alias)) => *alias,
            Some(_) => return None,
        };
        match &self.data_source(alias)?.source {
            QuerySource::Table(t) => Some(&t.entity),
            QuerySource::Derived(d) => d.row_entity(),
            QuerySource::Union(u) => u.row_entity(),
            QuerySource::Cte { .. } => None,
        }
    }

    /// The value the next lambda parameter binds to.
    pub fn current_shape(&self, bindings: &mut Bindings) -> SqlExpr {
        if let Some(projection) = &self.projection {
            return projection.clone();
        }
        if let Some(key) = &self.group_by {
            return SqlExpr::Grouping(SqlGrouping {
                key: Box::new(key.clone()),
                element: Box::new(self.element_shape(bindings)),
            });
        }
        match self.initial_alias() {
            Some(alias) => bindings.source_shape_expr(alias),
            None => SqlExpr::Placeholder,
        }
    }

    fn element_shape(&self, bindings: &mut Bindings) -> SqlExpr {
        match (&self.group_element, self.initial_alias()) {
            (Some(element), _) => element.clone(),
            (None, Some(alias)) => bindings.source_shape_expr(alias),
            (None, None) => SqlExpr::Placeholder,
        }
    }

    /// The shape seen by a lambda over the groups of this select.
    pub fn grouping_shape(&self, bindings: &mut Bindings) -> Result<SqlExpr> {
        let key = self
            .group_by
            .clone()
            .ok_or_else(|| TranslateError::invalid("grouping requested from an ungrouped select"))?;
        Ok(SqlExpr::Grouping(SqlGrouping {
            key: Box::new(key),
            element: Box::new(self.element_shape(bindings)),
        }))
    }

    fn changes_shape(&self) -> bool {
        self.projection
            .as_ref()
            .is_some_and(|p| !p.is_reference_shape())
    }

    /// Whether applying `op` requires wrapping first.
    pub fn needs_wrap(&self, op: Operation) -> bool {
        let paged = self.is_paged();
        let grouped = self.is_grouped();
        match op {
            Operation::Filter => {
                paged
                    || self.distinct
                    || (grouped && self.projection.is_some())
                    || (!grouped && self.changes_shape())
            }
            Operation::Projection => self.distinct,
            Operation::Join => paged || self.distinct || grouped,
            Operation::GroupBy => paged || self.distinct || grouped || self.changes_shape(),
            Operation::OrderBy => paged || self.distinct,
            Operation::Take => self.top.is_some(),
            Operation::Skip => paged,
            Operation::Distinct => paged,
            Operation::Aggregate => paged || self.distinct || grouped,
            Operation::ThenBy | Operation::Modify | Operation::Inspect => false,
        }
    }

    /// Makes the select ready for `op`, wrapping when required. Returns
    /// whether a wrap happened.
    pub fn prepare(&mut self, op: Operation, bindings: &mut Bindings, metadata: &dyn ModelMetadata) -> Result<bool> {
        if op == Operation::Modify && (self.is_paged() || self.is_grouped() || self.distinct) {
            return Err(TranslateError::unsupported(
                "UPDATE or DELETE over a paged, grouped or distinct query",
            ));
        }
        if !self.needs_wrap(op) {
            return Ok(false);
        }
        debug!(?op, "wrapping select before applying operation");
        self.wrap(bindings, metadata)?;
        Ok(true)
    }

    /// Replaces this select with `SELECT .. FROM (this) AS aN`.
    ///
    /// Outstanding lambda-parameter bindings that pointed into the old
    /// select are re-derived against the new derived-table alias.
    pub fn wrap(&mut self, bindings: &mut Bindings, metadata: &dyn ModelMetadata) -> Result<()> {
        let inner = std::mem::take(self);
        let inner_aliases: HashSet<Alias> = inner.aliases().collect();
        let old_shape = inner.current_shape(bindings);
        let derived = inner.close(bindings, metadata)?;
        let outputs: Vec<(SqlExpr, String)> = derived
            .columns
            .iter()
            .map(|c| (c.expr.clone(), c.alias.clone()))
            .collect();

        *self = SqlSelect::from_source(QuerySource::Derived(derived), bindings);
        let alias = self.sources[0].alias;

        let replacements: Vec<(SqlExpr, SqlExpr)> = outputs
            .into_iter()
            .map(|(old, name)| (old, bindings.column(alias, &name)))
            .collect();
        let mut expansions: HashMap<Alias, SqlExpr> = HashMap::new();
        match &old_shape {
            SqlExpr::DataSourceRef(old) => {
                expansions.insert(*old, bindings.source_shape_expr(alias));
            }
            SqlExpr::Composite(c) => {
                for (path, leaf) in c.entries() {
                    if let SqlExpr::DataSourceRef(old) = leaf {
                        if inner_aliases.contains(old) {
                            let expanded = bindings.resolve_path(metadata, alias, path)?;
                            expansions.entry(*old).or_insert(expanded);
                        }
                    }
                }
            }
            _ => {}
        }
        bindings.remap_parameters(|value| remap(value, &replacements, &expansions));
        Ok(())
    }

    /// Closes the select into a derived table with a fixed column list.
    pub fn close(mut self, bindings: &mut Bindings, metadata: &dyn ModelMetadata) -> Result<SqlDerivedTable> {
        if self.projection.is_none() {
            if let Some(key) = &self.group_by {
                self.projection = Some(key.clone());
            }
        }
        let shape = self.current_shape(bindings);
        let mut leaves = Vec::new();
        bindings.flatten(metadata, &shape, &ModelPath::EMPTY, &mut leaves)?;
        let columns = name_columns(leaves);
        Ok(SqlDerivedTable {
            id: bindings.next_alias(),
            select: Box::new(self),
            columns,
        })
    }

    pub fn apply_filter(&mut self, predicate: SqlExpr) {
        let slot = if self.is_grouped() && self.projection.is_none() {
            &mut self.having
        } else {
            &mut self.filter
        };
        *slot = Some(match slot.take() {
            Some(existing) => SqlExpr::binary(BinaryOperator::And, existing, predicate),
            None => predicate,
        });
    }

    pub fn apply_projection(&mut self, projection: SqlExpr) {
        if matches!(projection, SqlExpr::Grouping(_)) && self.is_grouped() {
            return;
        }
        self.projection = Some(projection.into_scalar());
    }

    pub fn take_projection(&mut self) -> Option<SqlExpr> {
        self.projection.take()
    }

    pub fn apply_group_by(&mut self, key: SqlExpr, element: SqlExpr) {
        self.group_by = Some(key.into_scalar());
        self.group_element = Some(element);
    }

    /// `OrderBy` replaces the ordering; `ThenBy` (`append`) extends it.
    pub fn apply_order_by(&mut self, items: Vec<OrderItem>, append: bool) {
        if !append {
            self.order_by.clear();
        }
        self.order_by.extend(items);
    }

    pub fn apply_take(&mut self, count: SqlExpr) {
        self.top = Some(count);
    }

    pub fn apply_skip(&mut self, count: SqlExpr) {
        self.skip = Some(count);
    }

    pub fn apply_distinct(&mut self) {
        self.distinct = true;
    }

    pub fn set_default_if_empty(&mut self) {
        self.default_if_empty = true;
    }

    pub fn add_join(
        &mut self,
        source: QuerySource,
        kind: JoinKind,
        condition: Option<SqlExpr>,
        bindings: &mut Bindings,
    ) -> Alias {
        let alias = bindings.next_alias();
        bindings.register_source(alias, SourceShape::of(&source));
        self.sources.push(SqlDataSource {
            alias,
            source,
            join: Some(SqlJoin { kind, condition }),
            navigation: None,
        });
        alias
    }

    pub fn add_navigation_join(
        &mut self,
        tag: NavigationTag,
        table: SqlTable,
        kind: JoinKind,
        condition: SqlExpr,
        bindings: &mut Bindings,
    ) -> Alias {
        let alias = self.add_join(QuerySource::Table(table), kind, Some(condition), bindings);
        if let Some(source) = self.sources.last_mut() {
            source.navigation = Some(tag);
        }
        alias
    }

    pub fn find_navigation_join(&self, parent: Alias, name: &str) -> Option<Alias> {
        self.sources
            .iter()
            .find(|s| {
                s.navigation
                    .as_ref()
                    .is_some_and(|t| t.parent == parent && t.name == name)
            })
            .map(|s| s.alias)
    }

    /// Join kind of `alias`; `None` for the initial source or unknown aliases.
    pub fn join_kind(&self, alias: Alias) -> Option<JoinKind> {
        self.data_source(alias)
            .and_then(|s| s.join.as_ref())
            .map(|j| j.kind)
    }

    pub fn set_join_condition(&mut self, alias: Alias, condition: SqlExpr) -> Result<()> {
        let source = self
            .sources
            .iter_mut()
            .find(|s| s.alias == alias)
            .ok_or_else(|| TranslateError::invalid(format!("no data source {alias} to attach a join condition to")))?;
        let join = source
            .join
            .as_mut()
            .ok_or_else(|| TranslateError::invalid(format!("data source {alias} is not joined")))?;
        join.condition = Some(condition);
        Ok(())
    }

    pub fn add_cte(&mut self, cte: SqlCte) {
        self.ctes.push(cte);
    }
}

fn remap(value: &mut SqlExpr, replacements: &[(SqlExpr, SqlExpr)], expansions: &HashMap<Alias, SqlExpr>) {
    if let Some((_, new)) = replacements.iter().find(|(old, _)| old == value) {
        *value = new.clone();
        return;
    }
    match value {
        SqlExpr::DataSourceRef(alias) => {
            if let Some(expanded) = expansions.get(alias) {
                *value = expanded.clone();
            }
        }
        SqlExpr::Composite(c) => {
            for (_, leaf) in c.entries_mut() {
                remap(leaf, replacements, expansions);
            }
        }
        SqlExpr::Grouping(g) => {
            remap(&mut g.key, replacements, expansions);
            remap(&mut g.element, replacements, expansions);
        }
        _ => {}
    }
}

fn name_columns(leaves: Vec<(ModelPath, SqlExpr)>) -> Vec<OutputColumn> {
    let mut used = HashSet::new();
    leaves
        .into_iter()
        .map(|(path, expr)| {
            let base = if path.is_empty() {
                match &expr {
                    SqlExpr::Column(c) => c.name.clone(),
                    _ => "Value".to_string(),
                }
            } else {
                path.column_alias()
            };
            let mut alias = base.clone();
            let mut n = 1;
            while !used.insert(alias.clone()) {
                n += 1;
                alias = format!("{base}{n}");
            }
            OutputColumn { path, alias, expr }
        })
        .collect()
}

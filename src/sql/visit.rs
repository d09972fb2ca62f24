//! Mutable traversal over the SQL tree.
//!
//! Implement [`SqlVisitorMut`] and override the hooks you need; the `walk_*`
//! functions recurse into children so an override can choose to call them
//! before, after or instead of its own work.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use super::*;

pub trait SqlVisitorMut {
    fn visit_select(&mut self, select: &mut SqlSelect) {
        walk_select(self, select);
    }

    fn visit_source(&mut self, source: &mut QuerySource) {
        walk_source(self, source);
    }

    fn visit_derived(&mut self, derived: &mut SqlDerivedTable) {
        walk_derived(self, derived);
    }

    fn visit_cte(&mut self, cte: &mut SqlCte) {
        walk_cte(self, cte);
    }

    fn visit_expr(&mut self, expr: &mut SqlExpr) {
        walk_expr(self, expr);
    }
}

pub fn walk_select<V: SqlVisitorMut + ?Sized>(v: &mut V, select: &mut SqlSelect) {
    for cte in &mut select.ctes {
        v.visit_cte(cte);
    }
    for source in &mut select.sources {
        v.visit_source(&mut source.source);
        if let Some(condition) = source.join.as_mut().and_then(|j| j.condition.as_mut()) {
            v.visit_expr(condition);
        }
    }
    let clauses = [
        &mut select.projection,
        &mut select.filter,
        &mut select.group_by,
        &mut select.group_element,
        &mut select.having,
        &mut select.top,
        &mut select.skip,
    ];
    for expr in clauses.into_iter().flatten() {
        v.visit_expr(expr);
    }
    for item in &mut select.order_by {
        v.visit_expr(&mut item.expr);
    }
}

pub fn walk_source<V: SqlVisitorMut + ?Sized>(v: &mut V, source: &mut QuerySource) {
    match source {
        QuerySource::Derived(d) => v.visit_derived(d),
        QuerySource::Union(u) => {
            for item in &mut u.items {
                v.visit_derived(&mut item.query);
            }
        }
        QuerySource::Table(_) | QuerySource::Cte { .. } => {}
    }
}

pub fn walk_derived<V: SqlVisitorMut + ?Sized>(v: &mut V, derived: &mut SqlDerivedTable) {
    v.visit_select(&mut derived.select);
    for column in &mut derived.columns {
        v.visit_expr(&mut column.expr);
    }
}

pub fn walk_cte<V: SqlVisitorMut + ?Sized>(v: &mut V, cte: &mut SqlCte) {
    v.visit_derived(&mut cte.anchor);
    if let Some(recursive) = &mut cte.recursive {
        v.visit_derived(recursive);
    }
}

pub fn walk_expr<V: SqlVisitorMut + ?Sized>(v: &mut V, expr: &mut SqlExpr) {
    match expr {
        SqlExpr::Select(s) => v.visit_select(s),
        SqlExpr::DerivedTable(d) => v.visit_derived(d),
        SqlExpr::Queryable(d) | SqlExpr::Exists(d) | SqlExpr::Subquery(d) => v.visit_derived(d),
        SqlExpr::Union(u) => {
            for item in &mut u.items {
                v.visit_derived(&mut item.query);
            }
        }
        SqlExpr::Composite(c) => {
            for (_, leaf) in c.entries_mut() {
                v.visit_expr(leaf);
            }
        }
        SqlExpr::Grouping(g) => {
            v.visit_expr(&mut g.key);
            v.visit_expr(&mut g.element);
        }
        SqlExpr::List(items) => {
            for item in items {
                v.visit_expr(item);
            }
        }
        SqlExpr::Binary { left, right, .. } => {
            v.visit_expr(left);
            v.visit_expr(right);
        }
        SqlExpr::Unary { expr, .. } | SqlExpr::IsNull { expr, .. } | SqlExpr::Cast { expr, .. } => v.visit_expr(expr),
        SqlExpr::DatePart { expr, .. } => v.visit_expr(expr),
        SqlExpr::Case {
            test,
            if_true,
            if_false,
        } => {
            v.visit_expr(test);
            v.visit_expr(if_true);
            v.visit_expr(if_false);
        }
        SqlExpr::Function { args, .. } => {
            for arg in args {
                v.visit_expr(arg);
            }
        }
        SqlExpr::Aggregate { arg, .. } => {
            if let Some(arg) = arg {
                v.visit_expr(arg);
            }
        }
        SqlExpr::DateAdd { amount, expr, .. } => {
            v.visit_expr(amount);
            v.visit_expr(expr);
        }
        SqlExpr::DateDiff { start, end, .. } => {
            v.visit_expr(start);
            v.visit_expr(end);
        }
        SqlExpr::InValues { expr, values, .. } => {
            v.visit_expr(expr);
            for value in values {
                v.visit_expr(value);
            }
        }
        SqlExpr::Update(u) => {
            v.visit_select(&mut u.select);
            for (_, value) in &mut u.assignments {
                v.visit_expr(value);
            }
        }
        SqlExpr::Delete(d) => v.visit_select(&mut d.select),
        SqlExpr::Placeholder
        | SqlExpr::Table(_)
        | SqlExpr::DataSourceRef(_)
        | SqlExpr::Column(_)
        | SqlExpr::Literal(_)
        | SqlExpr::Parameter(_) => {}
    }
}

/// Replaces every data source reading the derived table `target` with
/// `replacement`.
pub struct DerivedSubstitution {
    target: Alias,
    replacement: QuerySource,
    replaced: usize,
}

impl DerivedSubstitution {
    pub fn new(target: Alias, replacement: QuerySource) -> Self {
        Self {
            target,
            replacement,
            replaced: 0,
        }
    }

    pub fn replaced(&self) -> usize {
        self.replaced
    }
}

impl SqlVisitorMut for DerivedSubstitution {
    fn visit_source(&mut self, source: &mut QuerySource) {
        if matches!(source, QuerySource::Derived(d) if d.id == self.target) {
            *source = self.replacement.clone();
            self.replaced += 1;
            return;
        }
        walk_source(self, source);
    }
}

/// Replaces the columns read from the derived table `source` with the
/// expressions that table selects for them.
pub struct ColumnInlining {
    source: Alias,
    columns: HashMap<String, SqlExpr>,
    missing: Option<String>,
}

impl ColumnInlining {
    pub fn new(source: Alias, derived: &SqlDerivedTable) -> Self {
        Self {
            source,
            columns: derived
                .columns
                .iter()
                .map(|c| (c.alias.clone(), c.expr.clone()))
                .collect(),
            missing: None,
        }
    }

    /// A column of `source` that the derived table does not expose.
    pub fn missing(&self) -> Option<&str> {
        self.missing.as_deref()
    }
}

impl SqlVisitorMut for ColumnInlining {
    fn visit_expr(&mut self, expr: &mut SqlExpr) {
        if let SqlExpr::Column(column) = expr {
            if column.source == self.source {
                match self.columns.get(&column.name) {
                    Some(inner) => *expr = inner.clone(),
                    None => self.missing = Some(column.name.clone()),
                }
            }
            return;
        }
        walk_expr(self, expr);
    }
}

/// Moves every CTE in a statement to its top-level WITH list.
///
/// CTEs nested inside another CTE's body are emitted first. Clones of the
/// same CTE (same alias) are emitted once.
#[derive(Default)]
struct CteHoister {
    hoisted: Vec<SqlCte>,
    seen: HashSet<Alias>,
}

impl SqlVisitorMut for CteHoister {
    fn visit_select(&mut self, select: &mut SqlSelect) {
        let mut own = std::mem::take(&mut select.ctes);
        for cte in &mut own {
            self.visit_cte(cte);
        }
        walk_select(self, select);
        for cte in own {
            if self.seen.insert(cte.alias) {
                self.hoisted.push(cte);
            }
        }
    }
}

pub fn hoist_ctes(statement: &mut SqlStatement) {
    let mut hoister = CteHoister::default();
    for cte in &statement.ctes {
        hoister.seen.insert(cte.alias);
    }
    match &mut statement.body {
        StatementBody::Query(d) => hoister.visit_derived(d),
        StatementBody::Update(u) => {
            hoister.visit_select(&mut u.select);
            for (_, value) in &mut u.assignments {
                hoister.visit_expr(value);
            }
        }
        StatementBody::Delete(d) => hoister.visit_select(&mut d.select),
    }
    if !hoister.hoisted.is_empty() {
        debug!(count = hoister.hoisted.len(), "hoisted common table expressions");
    }
    statement.ctes.extend(hoister.hoisted);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TableName;

    fn table_source() -> QuerySource {
        QuerySource::Table(SqlTable {
            entity: "Asset".into(),
            name: TableName::new("Asset"),
        })
    }

    fn derived(id: u32, select: SqlSelect) -> SqlDerivedTable {
        SqlDerivedTable {
            id: Alias(id),
            select: Box::new(select),
            columns: Vec::new(),
        }
    }

    fn select_over(source: QuerySource, alias: u32) -> SqlSelect {
        SqlSelect {
            sources: vec![SqlDataSource {
                alias: Alias(alias),
                source,
                join: None,
                navigation: None,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_substitution_replaces_nested_sources() {
        let anchor = derived(10, select_over(table_source(), 1));
        let inner = derived(11, select_over(QuerySource::Derived(anchor), 2));
        let mut outer = select_over(QuerySource::Derived(inner), 3);

        let cte = QuerySource::Cte {
            alias: Alias(20),
            columns: Vec::new(),
        };
        let mut sub = DerivedSubstitution::new(Alias(10), cte.clone());
        sub.visit_select(&mut outer);
        assert_eq!(sub.replaced(), 1);

        let QuerySource::Derived(inner) = &outer.sources[0].source else {
            panic!("outer source should stay derived");
        };
        assert_eq!(inner.select.sources[0].source, cte);
    }

    #[test]
    fn test_hoisting_orders_nested_ctes_first() {
        let inner_cte = SqlCte {
            alias: Alias(30),
            anchor: derived(31, select_over(table_source(), 1)),
            recursive: None,
        };
        let mut recursive_select = select_over(table_source(), 2);
        recursive_select.ctes.push(inner_cte);
        let outer_cte = SqlCte {
            alias: Alias(40),
            anchor: derived(41, select_over(table_source(), 3)),
            recursive: Some(derived(42, recursive_select)),
        };
        let mut root = select_over(
            QuerySource::Cte {
                alias: Alias(40),
                columns: Vec::new(),
            },
            4,
        );
        root.ctes.push(outer_cte.clone());
        root.ctes.push(outer_cte);

        let mut statement = SqlStatement {
            ctes: Vec::new(),
            body: StatementBody::Query(derived(50, root)),
        };
        hoist_ctes(&mut statement);

        let order: Vec<Alias> = statement.ctes.iter().map(|c| c.alias).collect();
        assert_eq!(order, vec![Alias(30), Alias(40)]);
        let StatementBody::Query(d) = &statement.body else {
            panic!("query body expected");
        };
        assert!(d.select.ctes.is_empty());
    }
}

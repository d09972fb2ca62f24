//! Set operators: `Union`, `Concat` and the recursive union that becomes a
//! recursive common table expression.

use tracing::debug;

use crate::convert::{close_query, take_child, ConversionContext, Converter};
use crate::error::{Result, TranslateError};
use crate::expr::{Expr, QueryMethod};
use crate::sql::visit::{DerivedSubstitution, SqlVisitorMut};
use crate::sql::{QuerySource, SqlDerivedTable, SqlExpr, SqlSelect, UnionItem, UnionKind};

pub(crate) struct UnionConverter {
    kind: UnionKind,
}

impl UnionConverter {
    pub(crate) fn new(method: QueryMethod) -> Self {
        let kind = if method == QueryMethod::UnionAll {
            UnionKind::UnionAll
        } else {
            UnionKind::Union
        };
        Self { kind }
    }

    fn items(&self, value: SqlExpr, side: &str, cx: &mut ConversionContext<'_>) -> Result<Vec<UnionItem>> {
        match close_query(value, cx)? {
            SqlExpr::Union(u) => Ok(u.items),
            SqlExpr::DerivedTable(query) => Ok(vec![UnionItem { query, kind: self.kind }]),
            other => Err(TranslateError::shape("query", other.kind_name(), format!("{side} side of a union"))),
        }
    }

    /// Right-hand items. A nested union splices in only when every one of
    /// its operators matches ours. A mixed one stays a single derived item
    /// on purpose: `a UNION (b UNION ALL c)` and `a UNION b UNION ALL c`
    /// return different rows.
    fn right_items(&self, value: SqlExpr, cx: &mut ConversionContext<'_>) -> Result<Vec<UnionItem>> {
        let value = match value {
            SqlExpr::Union(u) if u.items.iter().skip(1).any(|i| i.kind != self.kind) => {
                let metadata = cx.metadata();
                let select = SqlSelect::from_source(QuerySource::Union(u), cx.bindings_mut());
                SqlExpr::DerivedTable(select.close(cx.bindings_mut(), metadata)?)
            }
            other => other,
        };
        let mut items = self.items(value, "right", cx)?;
        if let Some(first) = items.first_mut() {
            first.kind = self.kind;
        }
        Ok(items)
    }
}

impl Converter for UnionConverter {
    fn name(&self) -> &'static str {
        match self.kind {
            UnionKind::Union => "Union",
            UnionKind::UnionAll => "Concat",
        }
    }

    fn convert(&mut self, _: &Expr, mut children: Vec<SqlExpr>, cx: &mut ConversionContext<'_>) -> Result<SqlExpr> {
        let left = take_child(&mut children, 0, "left side of a union")?;
        let right = take_child(&mut children, 1, "right side of a union")?;
        let mut items = self.items(left, "left", cx)?;
        let spliced = items.len();
        items.extend(self.right_items(right, cx)?);

        let expected = items.first().map_or(0, |i| i.query.columns.len());
        if let Some(mismatch) = items.iter().find(|i| i.query.columns.len() != expected) {
            return Err(TranslateError::Arity {
                context: "columns of a union member".into(),
                expected,
                actual: mismatch.query.columns.len(),
            });
        }
        debug!(items = items.len(), left = spliced, kind = ?self.kind, "built union");
        Ok(SqlExpr::Union(cx.factory().union(items)))
    }
}

/// `anchor.RecursiveUnion(a => recursive)`: `recursive` reads the rows
/// produced so far through `a`.
#[derive(Default)]
pub(crate) struct RecursiveUnionConverter {
    anchor: Option<SqlDerivedTable>,
}

impl RecursiveUnionConverter {
    fn anchor(&self) -> Result<&SqlDerivedTable> {
        self.anchor
            .as_ref()
            .ok_or_else(|| TranslateError::invalid("recursive member converted before its anchor"))
    }
}

impl Converter for RecursiveUnionConverter {
    fn name(&self) -> &'static str {
        "RecursiveUnion"
    }

    fn is_query_converter(&self) -> bool {
        true
    }

    fn chained_query_argument(&self) -> Option<usize> {
        Some(0)
    }

    fn child_bindings(
        &mut self,
        index: usize,
        child: &Expr,
        _: &mut ConversionContext<'_>,
    ) -> Result<Vec<(String, SqlExpr)>> {
        if index == 0 {
            return Ok(Vec::new());
        }
        let anchor = self.anchor()?.clone();
        Ok(super::bind_parameters(child, vec![SqlExpr::DerivedTable(anchor)]))
    }

    fn on_child_converted(
        &mut self,
        index: usize,
        _: &Expr,
        converted: &mut SqlExpr,
        cx: &mut ConversionContext<'_>,
    ) -> Result<()> {
        if index != 0 {
            return Ok(());
        }
        let SqlExpr::Select(select) = std::mem::replace(converted, SqlExpr::Placeholder) else {
            return Err(TranslateError::invalid("recursive union anchor did not convert to a select"));
        };
        let metadata = cx.metadata();
        self.anchor = Some(select.close(cx.bindings_mut(), metadata)?);
        Ok(())
    }

    fn convert(&mut self, _: &Expr, mut children: Vec<SqlExpr>, cx: &mut ConversionContext<'_>) -> Result<SqlExpr> {
        let anchor = self
            .anchor
            .take()
            .ok_or_else(|| TranslateError::invalid("recursive union without an anchor"))?;
        let mut recursive = match close_query(take_child(&mut children, 1, "recursive member")?, cx)? {
            SqlExpr::DerivedTable(dt) => dt,
            other => {
                return Err(TranslateError::shape(
                    "derived table",
                    other.kind_name(),
                    "recursive member of a recursive union",
                ))
            }
        };
        if recursive.columns.len() != anchor.columns.len() {
            return Err(TranslateError::Arity {
                context: "columns of the recursive member".into(),
                expected: anchor.columns.len(),
                actual: recursive.columns.len(),
            });
        }

        let alias = cx.bindings_mut().next_alias();
        let reference = QuerySource::Cte {
            alias,
            columns: anchor.column_paths(),
        };
        // Driven by the anchor: the anchor is the recursive member's own
        // initial source and is swapped in place. Otherwise the anchor is
        // joined in somewhere below and every occurrence is substituted.
        let driving = matches!(
            recursive.select.sources.first().map(|s| &s.source),
            Some(QuerySource::Derived(d)) if d.id == anchor.id
        );
        let mut references = 0;
        if driving {
            if let Some(first) = recursive.select.sources.first_mut() {
                first.source = reference.clone();
                references += 1;
            }
        }
        let mut substitution = DerivedSubstitution::new(anchor.id, reference.clone());
        substitution.visit_derived(&mut recursive);
        references += substitution.replaced();
        if references == 0 {
            return Err(TranslateError::unsupported(
                "recursive member that never reads the rows produced so far",
            ));
        }
        debug!(cte = %alias, driving, references, "built recursive common table expression");

        let cte = cx.factory().cte(alias, anchor, Some(recursive));
        let mut select = SqlSelect::from_source(reference, cx.bindings_mut());
        select.add_cte(cte);
        Ok(SqlExpr::Select(Box::new(select)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::build::*;
    use crate::sql::StatementBody;
    use crate::testing;

    fn query(expr: &Expr) -> SqlDerivedTable {
        match testing::translate(expr).unwrap().body {
            StatementBody::Query(dt) => dt,
            other => panic!("expected a query, got {other:?}"),
        }
    }

    fn names(entity: &str) -> Query {
        Query::from(entity).select("x", TypeRef::String, |x| member(x, "Name"))
    }

    #[test]
    fn test_union_chain_is_flat() {
        let q = names("Student").union(names("Employee")).union(names("Country"));
        let dt = query(&q.into_expr());
        let QuerySource::Union(u) = &dt.select.sources()[0].source else {
            panic!("expected a union source");
        };
        assert_eq!(u.items.len(), 3);
        assert!(u.items.iter().skip(1).all(|i| i.kind == UnionKind::Union));
    }

    #[test]
    fn test_mixed_right_union_stays_nested() {
        let right = names("Employee").union_all(names("Country"));
        let q = names("Student").union(right);
        let dt = query(&q.into_expr());
        let QuerySource::Union(u) = &dt.select.sources()[0].source else {
            panic!("expected a union source");
        };
        assert_eq!(u.items.len(), 2);
        assert_eq!(u.items[1].kind, UnionKind::Union);
        assert!(matches!(u.items[1].query.select.sources()[0].source, QuerySource::Union(_)));
    }

    #[test]
    fn test_union_column_count_mismatch() {
        let wide = Query::from("Student").select("x", TypeRef::Anonymous, |x| {
            new_anon(vec![("Name", member(x.clone(), "Name")), ("Age", member(x, "Age"))])
        });
        let err = testing::translate(&names("Country").union_all(wide).into_expr()).unwrap_err();
        assert!(matches!(err, TranslateError::Arity { .. }));
    }

    fn roots() -> Query {
        Query::from("Asset").where_("x", |x| eq(member(x, "ParentId"), null()))
    }

    #[test]
    fn test_recursive_member_driven_by_anchor() {
        let q = roots().recursive_union("a", |a| {
            a.join(
                Query::from("Asset"),
                |o| member(o, "RowId"),
                |i| member(i, "ParentId"),
                TypeRef::entity("Asset"),
                |_, i| i,
            )
        });
        let statement = testing::translate(&q.into_expr()).unwrap();
        assert_eq!(statement.ctes.len(), 1);
        let cte = &statement.ctes[0];
        let recursive = cte.recursive.as_ref().unwrap();
        assert!(matches!(
            &recursive.select.sources()[0].source,
            QuerySource::Cte { alias, .. } if *alias == cte.alias
        ));
        let StatementBody::Query(dt) = statement.body else {
            panic!("expected a query");
        };
        assert!(matches!(
            &dt.select.sources()[0].source,
            QuerySource::Cte { alias, .. } if *alias == cte.alias
        ));
        assert!(dt.select.ctes().is_empty());
    }

    #[test]
    fn test_recursive_member_joining_anchor() {
        let q = roots().recursive_union("a", |a| {
            Query::from("Asset").join(
                a,
                |o| member(o, "ParentId"),
                |i| member(i, "RowId"),
                TypeRef::entity("Asset"),
                |o, _| o,
            )
        });
        let statement = testing::translate(&q.into_expr()).unwrap();
        let cte = &statement.ctes[0];
        let recursive = cte.recursive.as_ref().unwrap();
        assert!(matches!(recursive.select.sources()[0].source, QuerySource::Table(_)));
        assert!(matches!(
            &recursive.select.sources()[1].source,
            QuerySource::Cte { alias, .. } if *alias == cte.alias
        ));
    }

    fn hierarchy() -> Query {
        roots().recursive_union("a", |a| {
            a.join(
                Query::from("Asset"),
                |o| member(o, "RowId"),
                |i| member(i, "ParentId"),
                TypeRef::entity("Asset"),
                |_, i| i,
            )
        })
    }

    #[test]
    fn test_independent_recursive_unions_get_distinct_ctes() {
        let q = hierarchy().union_all(hierarchy());
        let statement = testing::translate(&q.into_expr()).unwrap();
        assert_eq!(statement.ctes.len(), 2);
        assert_ne!(statement.ctes[0].alias, statement.ctes[1].alias);
        let StatementBody::Query(dt) = statement.body else {
            panic!("expected a query");
        };
        let QuerySource::Union(u) = &dt.select.sources()[0].source else {
            panic!("expected a union source");
        };
        let read: Vec<_> = u
            .items
            .iter()
            .map(|i| match &i.query.select.sources()[0].source {
                QuerySource::Cte { alias, .. } => *alias,
                other => panic!("expected a CTE reference, got {other:?}"),
            })
            .collect();
        assert_eq!(read, vec![statement.ctes[0].alias, statement.ctes[1].alias]);
    }

    #[test]
    fn test_recursive_union_in_projection_is_declared_before_use() {
        let q = hierarchy().select("h", TypeRef::Anonymous, |h| {
            new_anon(vec![("Name", member(h, "Name")), ("Total", hierarchy().count())])
        });
        let statement = testing::translate(&q.into_expr()).unwrap();
        assert_eq!(statement.ctes.len(), 2);
        let StatementBody::Query(dt) = statement.body else {
            panic!("expected a query");
        };
        let QuerySource::Cte { alias: outer, .. } = &dt.select.sources()[0].source else {
            panic!("expected a CTE reference");
        };
        let total = dt.columns.iter().find(|c| c.alias == "Total").unwrap();
        let SqlExpr::Subquery(sub) = &total.expr else {
            panic!("expected a scalar subquery, got {:?}", total.expr);
        };
        let QuerySource::Cte { alias: inner, .. } = &sub.select.sources()[0].source else {
            panic!("expected a CTE reference in the subquery");
        };
        assert_ne!(outer, inner);
        let declared: Vec<_> = statement.ctes.iter().map(|c| c.alias).collect();
        assert!(declared.contains(outer) && declared.contains(inner));
        assert!(sub.select.ctes().is_empty());
    }

    #[test]
    fn test_recursive_member_must_reference_anchor() {
        let q = roots().recursive_union("a", |_| Query::from("Asset"));
        let err = testing::translate(&q.into_expr()).unwrap_err();
        assert!(matches!(err, TranslateError::Unsupported { .. }));
    }
}

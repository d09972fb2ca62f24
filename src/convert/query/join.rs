//! Multi-source operators.
//!
//! Each join adds a data source to the lent select while the operator's
//! arguments convert, so that later lambdas (keys, conditions, result
//! selectors) can bind to the joined rows.

use tracing::debug;

use super::{bind_first_parameter, bind_parameters, source_shape, QueryOperator, QueryTicket};
use crate::convert::{as_query, into_source, shape, take_child, ConversionContext, Converter};
use crate::error::{Result, TranslateError};
use crate::expr::{ChildJoinKind, Expr, MethodCall, QueryMethod};
use crate::sql::{Alias, JoinKind, Operation, SqlExpr, SqlSelect};

pub(crate) fn operator(method: QueryMethod, _: &MethodCall) -> Option<Box<dyn QueryOperator>> {
    let op: Box<dyn QueryOperator> = match method {
        QueryMethod::Join => Box::new(JoinOp::default()),
        QueryMethod::GroupJoin => Box::new(GroupJoinOp::default()),
        QueryMethod::InnerJoin => Box::new(ExplicitJoinOp::new("InnerJoin", JoinKind::Inner)),
        QueryMethod::LeftJoin => Box::new(ExplicitJoinOp::new("LeftJoin", JoinKind::Left)),
        QueryMethod::RightJoin => Box::new(ExplicitJoinOp::new("RightJoin", JoinKind::Right)),
        QueryMethod::FullOuterJoin => Box::new(ExplicitJoinOp::new("FullOuterJoin", JoinKind::FullOuter)),
        QueryMethod::CrossJoin => Box::new(ExplicitJoinOp::new("CrossJoin", JoinKind::Cross)),
        QueryMethod::CrossApply => Box::new(ApplyOp::new("CrossApply", JoinKind::CrossApply)),
        QueryMethod::OuterApply => Box::new(ApplyOp::new("OuterApply", JoinKind::OuterApply)),
        QueryMethod::SelectMany => Box::new(SelectManyOp::default()),
        _ => return None,
    };
    Some(op)
}

fn joined(alias: Option<Alias>, operator: &str) -> Result<Alias> {
    alias.ok_or_else(|| TranslateError::invalid(format!("{operator} argument converted before its joined source")))
}

/// Adds `value` to the lent select as a joined data source.
fn join_source(
    value: &mut SqlExpr,
    kind: JoinKind,
    source: QueryTicket,
    cx: &mut ConversionContext<'_>,
    context: &str,
) -> Result<Alias> {
    let value = std::mem::replace(value, SqlExpr::Placeholder);
    let query_source = into_source(value, cx, context)?;
    cx.with_lent_query(source, |select, bindings, _| Ok(select.add_join(query_source, kind, None, bindings)))
}

/// `Join(inner, o => key, i => key, (o, i) => result)`
#[derive(Default)]
struct JoinOp {
    joined: Option<Alias>,
    outer_key: Option<SqlExpr>,
}

impl QueryOperator for JoinOp {
    fn name(&self) -> &'static str {
        "Join"
    }

    fn operation(&self) -> Operation {
        Operation::Join
    }

    fn argument_bindings(
        &mut self,
        index: usize,
        arg: &Expr,
        source: QueryTicket,
        cx: &mut ConversionContext<'_>,
    ) -> Result<Vec<(String, SqlExpr)>> {
        match index {
            1 => Ok(Vec::new()),
            2 => bind_first_parameter(arg, source, cx),
            3 => {
                let inner = cx.bindings_mut().source_shape_expr(joined(self.joined, "Join")?);
                Ok(bind_parameters(arg, vec![inner]))
            }
            _ => {
                let outer = source_shape(source, cx)?;
                let inner = cx.bindings_mut().source_shape_expr(joined(self.joined, "Join")?);
                Ok(bind_parameters(arg, vec![outer, inner]))
            }
        }
    }

    fn argument_converted(
        &mut self,
        index: usize,
        _: &Expr,
        converted: &mut SqlExpr,
        source: QueryTicket,
        cx: &mut ConversionContext<'_>,
    ) -> Result<()> {
        match index {
            1 => self.joined = Some(join_source(converted, JoinKind::Inner, source, cx, "Join inner query")?),
            2 => self.outer_key = Some(std::mem::replace(converted, SqlExpr::Placeholder)),
            3 => {
                let outer = self
                    .outer_key
                    .take()
                    .ok_or_else(|| TranslateError::invalid("Join inner key converted before the outer key"))?;
                let inner = std::mem::replace(converted, SqlExpr::Placeholder);
                let condition = shape::equality(outer, inner, cx)?;
                let alias = joined(self.joined, "Join")?;
                cx.with_lent_query(source, |select, _, _| select.set_join_condition(alias, condition))?;
            }
            _ => {}
        }
        Ok(())
    }

    fn apply(&mut self, mut select: SqlSelect, mut args: Vec<SqlExpr>, _: &mut ConversionContext<'_>) -> Result<SqlExpr> {
        select.apply_projection(take_child(&mut args, 4, "Join result")?);
        Ok(SqlExpr::Select(Box::new(select)))
    }
}

/// `GroupJoin(inner, o => key, i => key, (o, items) => result)`.
///
/// `items` is a correlated subquery over the inner source filtered by the
/// key equality; the outer select gets no join.
#[derive(Default)]
struct GroupJoinOp {
    inner: Option<SqlSelect>,
    outer_key: Option<SqlExpr>,
    items: Option<SqlExpr>,
}

impl GroupJoinOp {
    fn inner(&mut self) -> Result<&mut SqlSelect> {
        self.inner
            .as_mut()
            .ok_or_else(|| TranslateError::invalid("GroupJoin key converted before its inner query"))
    }
}

impl QueryOperator for GroupJoinOp {
    fn name(&self) -> &'static str {
        "GroupJoin"
    }

    fn operation(&self) -> Operation {
        Operation::Projection
    }

    fn argument_bindings(
        &mut self,
        index: usize,
        arg: &Expr,
        source: QueryTicket,
        cx: &mut ConversionContext<'_>,
    ) -> Result<Vec<(String, SqlExpr)>> {
        match index {
            1 => Ok(Vec::new()),
            2 => bind_first_parameter(arg, source, cx),
            3 => {
                let inner = self.inner()?.current_shape(cx.bindings_mut());
                Ok(bind_parameters(arg, vec![inner]))
            }
            _ => {
                let outer = source_shape(source, cx)?;
                let items = self
                    .items
                    .clone()
                    .ok_or_else(|| TranslateError::invalid("GroupJoin result converted before its keys"))?;
                Ok(bind_parameters(arg, vec![outer, items]))
            }
        }
    }

    fn argument_converted(
        &mut self,
        index: usize,
        arg: &Expr,
        converted: &mut SqlExpr,
        _: QueryTicket,
        cx: &mut ConversionContext<'_>,
    ) -> Result<()> {
        match index {
            1 => {
                let value = std::mem::replace(converted, SqlExpr::Placeholder);
                let SqlExpr::Select(mut inner) = as_query(value, cx, arg)? else {
                    return Err(TranslateError::invalid("GroupJoin inner query did not open"));
                };
                let metadata = cx.metadata();
                inner.prepare(Operation::Filter, cx.bindings_mut(), metadata)?;
                self.inner = Some(*inner);
            }
            2 => self.outer_key = Some(std::mem::replace(converted, SqlExpr::Placeholder)),
            3 => {
                let outer = self
                    .outer_key
                    .take()
                    .ok_or_else(|| TranslateError::invalid("GroupJoin inner key converted before the outer key"))?;
                let inner_key = std::mem::replace(converted, SqlExpr::Placeholder);
                let condition = shape::equality(outer, inner_key, cx)?;
                let mut inner = self
                    .inner
                    .take()
                    .ok_or_else(|| TranslateError::invalid("GroupJoin key converted before its inner query"))?;
                inner.apply_filter(condition);
                let metadata = cx.metadata();
                let items = inner.close(cx.bindings_mut(), metadata)?;
                self.items = Some(SqlExpr::Queryable(Box::new(items)));
            }
            _ => {}
        }
        Ok(())
    }

    fn apply(&mut self, mut select: SqlSelect, mut args: Vec<SqlExpr>, _: &mut ConversionContext<'_>) -> Result<SqlExpr> {
        select.apply_projection(take_child(&mut args, 4, "GroupJoin result")?);
        Ok(SqlExpr::Select(Box::new(select)))
    }
}

/// `InnerJoin(other, (a, b) => shape, n => condition)` and its left, right
/// and full outer forms; `CrossJoin(other, (a, b) => shape)`.
struct ExplicitJoinOp {
    name: &'static str,
    kind: JoinKind,
    joined: Option<Alias>,
    shape: Option<SqlExpr>,
}

impl ExplicitJoinOp {
    fn new(name: &'static str, kind: JoinKind) -> Self {
        Self {
            name,
            kind,
            joined: None,
            shape: None,
        }
    }
}

impl QueryOperator for ExplicitJoinOp {
    fn name(&self) -> &'static str {
        self.name
    }

    fn operation(&self) -> Operation {
        Operation::Join
    }

    fn argument_bindings(
        &mut self,
        index: usize,
        arg: &Expr,
        source: QueryTicket,
        cx: &mut ConversionContext<'_>,
    ) -> Result<Vec<(String, SqlExpr)>> {
        match index {
            1 => Ok(Vec::new()),
            2 => {
                let outer = source_shape(source, cx)?;
                let inner = cx.bindings_mut().source_shape_expr(joined(self.joined, self.name)?);
                Ok(bind_parameters(arg, vec![outer, inner]))
            }
            _ => {
                let shape = self
                    .shape
                    .clone()
                    .ok_or_else(|| TranslateError::invalid("join condition converted before the join shape"))?;
                Ok(bind_parameters(arg, vec![shape]))
            }
        }
    }

    fn argument_converted(
        &mut self,
        index: usize,
        _: &Expr,
        converted: &mut SqlExpr,
        source: QueryTicket,
        cx: &mut ConversionContext<'_>,
    ) -> Result<()> {
        match index {
            1 => self.joined = Some(join_source(converted, self.kind, source, cx, "joined query")?),
            2 => self.shape = Some(converted.clone()),
            3 => {
                let condition = cx
                    .factory()
                    .predicate(std::mem::replace(converted, SqlExpr::Placeholder).into_scalar());
                let alias = joined(self.joined, self.name)?;
                cx.with_lent_query(source, |select, _, _| select.set_join_condition(alias, condition))?;
            }
            _ => {}
        }
        Ok(())
    }

    fn apply(&mut self, mut select: SqlSelect, mut args: Vec<SqlExpr>, _: &mut ConversionContext<'_>) -> Result<SqlExpr> {
        if self.kind != JoinKind::Cross && args.len() < 4 {
            return Err(TranslateError::Arity {
                context: format!("{} arguments", self.name),
                expected: 4,
                actual: args.len(),
            });
        }
        select.apply_projection(take_child(&mut args, 2, "join shape")?);
        Ok(SqlExpr::Select(Box::new(select)))
    }
}

/// `CrossApply(a => correlated, (a, b) => shape)` and `OuterApply`.
struct ApplyOp {
    name: &'static str,
    kind: JoinKind,
    joined: Option<Alias>,
}

impl ApplyOp {
    fn new(name: &'static str, kind: JoinKind) -> Self {
        Self {
            name,
            kind,
            joined: None,
        }
    }
}

impl QueryOperator for ApplyOp {
    fn name(&self) -> &'static str {
        self.name
    }

    fn operation(&self) -> Operation {
        Operation::Join
    }

    fn argument_bindings(
        &mut self,
        index: usize,
        arg: &Expr,
        source: QueryTicket,
        cx: &mut ConversionContext<'_>,
    ) -> Result<Vec<(String, SqlExpr)>> {
        if index == 1 {
            return bind_first_parameter(arg, source, cx);
        }
        let outer = source_shape(source, cx)?;
        let inner = cx.bindings_mut().source_shape_expr(joined(self.joined, self.name)?);
        Ok(bind_parameters(arg, vec![outer, inner]))
    }

    fn argument_converted(
        &mut self,
        index: usize,
        _: &Expr,
        converted: &mut SqlExpr,
        source: QueryTicket,
        cx: &mut ConversionContext<'_>,
    ) -> Result<()> {
        if index == 1 {
            self.joined = Some(join_source(converted, self.kind, source, cx, "applied query")?);
        }
        Ok(())
    }

    fn apply(&mut self, mut select: SqlSelect, mut args: Vec<SqlExpr>, _: &mut ConversionContext<'_>) -> Result<SqlExpr> {
        select.apply_projection(take_child(&mut args, 2, "apply shape")?);
        Ok(SqlExpr::Select(Box::new(select)))
    }
}

/// `SelectMany(x => collection)` and `SelectMany(x => collection, (x, y) => result)`.
///
/// A to-many navigation in collection position has already been joined by
/// the navigation converter; any other collection is a correlated subquery
/// joined with an apply (outer apply when it is `DefaultIfEmpty`), and an
/// uncorrelated table is cross joined.
#[derive(Default)]
struct SelectManyOp {
    outer: Option<SqlExpr>,
    joined: Option<Alias>,
}

impl QueryOperator for SelectManyOp {
    fn name(&self) -> &'static str {
        "SelectMany"
    }

    fn operation(&self) -> Operation {
        Operation::Join
    }

    fn argument_bindings(
        &mut self,
        index: usize,
        arg: &Expr,
        source: QueryTicket,
        cx: &mut ConversionContext<'_>,
    ) -> Result<Vec<(String, SqlExpr)>> {
        if index == 1 {
            let bindings = bind_first_parameter(arg, source, cx)?;
            self.outer = Some(match bindings.first() {
                Some((_, value)) => value.clone(),
                None => source_shape(source, cx)?,
            });
            return Ok(bindings);
        }
        let outer = self
            .outer
            .clone()
            .ok_or_else(|| TranslateError::invalid("SelectMany result converted before its collection"))?;
        let inner = cx.bindings_mut().source_shape_expr(joined(self.joined, "SelectMany")?);
        Ok(bind_parameters(arg, vec![outer, inner]))
    }

    fn argument_converted(
        &mut self,
        index: usize,
        arg: &Expr,
        converted: &mut SqlExpr,
        source: QueryTicket,
        cx: &mut ConversionContext<'_>,
    ) -> Result<()> {
        if index != 1 {
            return Ok(());
        }
        let alias = match converted {
            SqlExpr::DataSourceRef(alias)
                if cx
                    .lent_query(source)?
                    .data_source(*alias)
                    .is_some_and(|s| s.navigation.is_some()) =>
            {
                *alias
            }
            SqlExpr::DerivedTable(dt) => {
                let kind = if dt.select.is_default_if_empty() {
                    JoinKind::OuterApply
                } else {
                    JoinKind::CrossApply
                };
                join_source(converted, kind, source, cx, "SelectMany collection")?
            }
            SqlExpr::Queryable(dt) => {
                let kind = if dt.select.is_default_if_empty() {
                    JoinKind::OuterApply
                } else {
                    JoinKind::CrossApply
                };
                join_source(converted, kind, source, cx, "SelectMany collection")?
            }
            SqlExpr::Table(_) => join_source(converted, JoinKind::Cross, source, cx, "SelectMany collection")?,
            other => {
                return Err(TranslateError::shape(
                    "query",
                    other.kind_name(),
                    format!("collection of {arg}"),
                ))
            }
        };
        debug!(joined = %alias, "SelectMany collection joined");
        self.joined = Some(alias);
        Ok(())
    }

    fn apply(&mut self, mut select: SqlSelect, mut args: Vec<SqlExpr>, cx: &mut ConversionContext<'_>) -> Result<SqlExpr> {
        let projection = match args.len() {
            0..=2 => cx.bindings_mut().source_shape_expr(joined(self.joined, "SelectMany")?),
            _ => take_child(&mut args, 2, "SelectMany result")?,
        };
        select.apply_projection(projection);
        Ok(SqlExpr::Select(Box::new(select)))
    }
}

/// The join marker left by the child-join rewrite. Children are the source,
/// the uncorrelated child query, then the optional condition and result
/// lambdas.
struct ChildJoinOp {
    kind: JoinKind,
    condition: Option<usize>,
    result: Option<usize>,
    joined: Option<Alias>,
}

impl QueryOperator for ChildJoinOp {
    fn name(&self) -> &'static str {
        "ChildJoin"
    }

    fn operation(&self) -> Operation {
        Operation::Join
    }

    fn argument_bindings(
        &mut self,
        index: usize,
        arg: &Expr,
        source: QueryTicket,
        cx: &mut ConversionContext<'_>,
    ) -> Result<Vec<(String, SqlExpr)>> {
        if index == 1 {
            return Ok(Vec::new());
        }
        let outer = source_shape(source, cx)?;
        let inner = cx.bindings_mut().source_shape_expr(joined(self.joined, "ChildJoin")?);
        Ok(bind_parameters(arg, vec![outer, inner]))
    }

    fn argument_converted(
        &mut self,
        index: usize,
        _: &Expr,
        converted: &mut SqlExpr,
        source: QueryTicket,
        cx: &mut ConversionContext<'_>,
    ) -> Result<()> {
        if index == 1 {
            self.joined = Some(join_source(converted, self.kind, source, cx, "child query")?);
        } else if Some(index) == self.condition {
            let condition = cx
                .factory()
                .predicate(std::mem::replace(converted, SqlExpr::Placeholder).into_scalar());
            let alias = joined(self.joined, "ChildJoin")?;
            cx.with_lent_query(source, |select, _, _| select.set_join_condition(alias, condition))?;
        }
        Ok(())
    }

    fn apply(&mut self, mut select: SqlSelect, mut args: Vec<SqlExpr>, cx: &mut ConversionContext<'_>) -> Result<SqlExpr> {
        let projection = match self.result {
            Some(index) => take_child(&mut args, index, "child join result")?,
            None => cx.bindings_mut().source_shape_expr(joined(self.joined, "ChildJoin")?),
        };
        select.apply_projection(projection);
        Ok(SqlExpr::Select(Box::new(select)))
    }
}

pub(crate) fn create_child_join(node: &Expr, _: &ConversionContext<'_>) -> Option<Box<dyn Converter>> {
    let Expr::ChildJoin(join) = node else {
        return None;
    };
    let condition = join.condition.as_ref().map(|_| 2);
    let result = join.result.as_ref().map(|_| 2 + condition.map_or(0, |_| 1));
    let kind = match (join.join, condition) {
        (ChildJoinKind::Inner, Some(_)) => JoinKind::Inner,
        _ => JoinKind::Cross,
    };
    Some(Box::new(super::QueryMethodConverter::new(Box::new(ChildJoinOp {
        kind,
        condition,
        result,
        joined: None,
    }))))
}

#[cfg(test)]
mod tests {
    use crate::expr::build::*;
    use crate::expr::{Expr, TypeRef};
    use crate::testing;

    fn pair(a: Expr, b: Expr) -> Expr {
        new_anon(vec![("E", a), ("D", b)])
    }

    #[test]
    fn test_left_join_condition_over_shape() {
        let q = Query::from("Employee").left_join(Query::from("Department"), TypeRef::Anonymous, pair, |n| {
            eq(
                member(member(n.clone(), "E"), "DepartmentId"),
                member(member(n, "D"), "DepartmentId"),
            )
        });
        let sql = testing::sqlserver(&q.into_expr());
        assert!(
            sql.contains("FROM [Employees] AS a1 LEFT JOIN [Department] AS a2 ON a1.[DepartmentId] = a2.[DepartmentId]"),
            "{sql}"
        );
    }

    #[test]
    fn test_cross_join_has_no_condition() {
        let q = Query::from("Student").cross_join(Query::from("Course"), TypeRef::Anonymous, |s, c| {
            new_anon(vec![("Name", member(s, "Name")), ("Title", member(c, "Title"))])
        });
        let sql = testing::sqlserver(&q.into_expr());
        assert!(sql.ends_with("FROM [Student] AS a1 CROSS JOIN [Course] AS a2"), "{sql}");
    }

    #[test]
    fn test_cross_apply_correlated_subquery() {
        let q = Query::from("Student").cross_apply(
            |s| {
                Query::from("Enrollment")
                    .where_("e", |e| eq(member(e, "StudentId"), member(s, "StudentId")))
                    .take(1)
            },
            TypeRef::Anonymous,
            |s, e| new_anon(vec![("Name", member(s, "Name")), ("Grade", member(e, "Grade"))]),
        );
        let sql = testing::sqlserver(&q.into_expr());
        assert!(sql.contains("CROSS APPLY (SELECT TOP (1) "), "{sql}");
        assert!(sql.contains("= a1.[StudentId]"), "{sql}");
    }

    #[test]
    fn test_default_if_empty_collection_is_outer_apply() {
        let q = Query::from("Student").select_many("x", TypeRef::entity("Enrollment"), |x| {
            Query::from("Enrollment")
                .where_("e", |e| eq(member(e, "StudentId"), member(x, "StudentId")))
                .default_if_empty()
                .into_expr()
        });
        let sql = testing::sqlserver(&q.into_expr());
        assert!(sql.contains("OUTER APPLY (SELECT "), "{sql}");
        assert!(!sql.contains("CROSS APPLY"), "{sql}");
    }
}

//! Grouping: `GroupBy` and aggregates computed over a group's elements.

use super::QueryOperator;
use crate::convert::{take_child, ConversionContext, Converter};
use crate::error::{Result, TranslateError};
use crate::expr::{Expr, MethodCall, QueryMethod};
use crate::sql::{AggregateFunction, Literal, Operation, SqlExpr, SqlGrouping, SqlSelect};

pub(crate) fn operator(method: QueryMethod, _: &MethodCall) -> Option<Box<dyn QueryOperator>> {
    (method == QueryMethod::GroupBy).then(|| Box::new(GroupByOp) as Box<dyn QueryOperator>)
}

/// `GroupBy(key)` or `GroupBy(key, element)`. The element selector only
/// changes what aggregates over the group see.
struct GroupByOp;

impl QueryOperator for GroupByOp {
    fn name(&self) -> &'static str {
        "GroupBy"
    }

    fn operation(&self) -> Operation {
        Operation::GroupBy
    }

    fn apply(&mut self, mut select: SqlSelect, mut args: Vec<SqlExpr>, cx: &mut ConversionContext<'_>) -> Result<SqlExpr> {
        let key = take_child(&mut args, 1, "GroupBy key")?;
        let element = match args.len() {
            0..=2 => select.current_shape(cx.bindings_mut()),
            _ => take_child(&mut args, 2, "GroupBy element")?,
        };
        select.take_projection();
        select.apply_group_by(key, element);
        Ok(SqlExpr::Select(Box::new(select)))
    }
}

/// `g.Count()`, `g.Sum(x => ..)`, `g.Select(x => ..)` and friends where `g`
/// is a group of the enclosing grouped select.
struct GroupAggregateConverter {
    method: QueryMethod,
    grouping: Option<SqlGrouping>,
}

impl GroupAggregateConverter {
    fn grouping(&self) -> Result<&SqlGrouping> {
        self.grouping
            .as_ref()
            .ok_or_else(|| TranslateError::invalid("group aggregate argument converted before its group"))
    }
}

impl Converter for GroupAggregateConverter {
    fn name(&self) -> &'static str {
        "GroupAggregate"
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
        let element = (*self.grouping()?.element).clone();
        Ok(super::bind_parameters(child, vec![element]))
    }

    fn on_child_converted(
        &mut self,
        index: usize,
        child: &Expr,
        converted: &mut SqlExpr,
        _: &mut ConversionContext<'_>,
    ) -> Result<()> {
        if index == 0 {
            match converted {
                SqlExpr::Grouping(g) => self.grouping = Some(g.clone()),
                other => {
                    return Err(TranslateError::shape(
                        "grouping",
                        other.kind_name(),
                        format!("source of {child}"),
                    ))
                }
            }
        }
        Ok(())
    }

    fn convert(&mut self, _: &Expr, mut children: Vec<SqlExpr>, cx: &mut ConversionContext<'_>) -> Result<SqlExpr> {
        let factory = cx.factory();
        let lambda = match children.len() {
            0 | 1 => None,
            _ => Some(take_child(&mut children, 1, "group aggregate argument")?),
        };
        let function = match self.method {
            QueryMethod::Select => {
                let grouping = self.grouping()?;
                let element = lambda.ok_or_else(|| TranslateError::Arity {
                    context: "Select over a group".into(),
                    expected: 2,
                    actual: 1,
                })?;
                return Ok(SqlExpr::Grouping(SqlGrouping {
                    key: grouping.key.clone(),
                    element: Box::new(element),
                }));
            }
            QueryMethod::Count | QueryMethod::LongCount => {
                let function = if self.method == QueryMethod::Count {
                    AggregateFunction::Count
                } else {
                    AggregateFunction::CountBig
                };
                return Ok(match lambda {
                    None => factory.aggregate(function, None),
                    // COUNT(*) cannot take a filter; count matching rows as a sum of flags.
                    Some(predicate) => {
                        let flag = factory.case(
                            predicate.into_scalar(),
                            SqlExpr::Literal(Literal::Integer(1)),
                            SqlExpr::Literal(Literal::Integer(0)),
                        );
                        factory.aggregate(AggregateFunction::Sum, Some(flag))
                    }
                });
            }
            QueryMethod::Sum => AggregateFunction::Sum,
            QueryMethod::Min => AggregateFunction::Min,
            QueryMethod::Max => AggregateFunction::Max,
            QueryMethod::Average => AggregateFunction::Avg,
            other => return Err(TranslateError::unsupported(format!("{} over a group", other.name()))),
        };
        let value = match lambda {
            Some(selector) => selector.into_scalar(),
            None => match &*self.grouping()?.element {
                SqlExpr::Composite(_) | SqlExpr::DataSourceRef(_) => {
                    return Err(TranslateError::unsupported(format!(
                        "{} over whole rows of a group",
                        self.method.name()
                    )))
                }
                element => element.clone(),
            },
        };
        Ok(factory.aggregate(function, Some(value)))
    }
}

pub(crate) fn create_group_aggregate(node: &Expr, _: &ConversionContext<'_>) -> Option<Box<dyn Converter>> {
    let call = node.as_method_call()?;
    let method = QueryMethod::from_call(call)?;
    if !(method.is_aggregate() || method == QueryMethod::Select) {
        return None;
    }
    if !call.args.first()?.ty().is_grouping() {
        return None;
    }
    Some(Box::new(GroupAggregateConverter {
        method,
        grouping: None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::build::*;
    use crate::sql::StatementBody;
    use crate::testing;

    fn by_age() -> Query {
        Query::from("Student").group_by("x", TypeRef::Int, |x| member(x, "Age"))
    }

    #[test]
    fn test_group_by_then_count_projects_key_and_aggregate() {
        let q = by_age().select("g", TypeRef::Anonymous, |g| {
            new_anon(vec![("Age", member(g.clone(), "Key")), ("Students", count(g))])
        });
        let statement = testing::translate(&q.into_expr()).unwrap();
        let StatementBody::Query(dt) = statement.body else {
            panic!("expected a query");
        };
        assert!(dt.select.group_by().is_some());
        let aliases: Vec<&str> = dt.columns.iter().map(|c| c.alias.as_str()).collect();
        assert_eq!(aliases, vec!["Age", "Students"]);
        assert_eq!(
            dt.columns[1].expr,
            SqlExpr::Aggregate {
                func: AggregateFunction::Count,
                arg: None
            }
        );
    }

    #[test]
    fn test_where_on_groups_becomes_having() {
        let g = param("g", TypeRef::grouping(TypeRef::Int, TypeRef::entity("Student")));
        let q = by_age().where_("g", |_| gt(count(p(&g)), constant(5)));
        let statement = testing::translate(&q.into_expr()).unwrap();
        let StatementBody::Query(dt) = statement.body else {
            panic!("expected a query");
        };
        assert!(dt.select.having().is_some());
        assert!(dt.select.filter().is_none());
    }

    #[test]
    fn test_conditional_count_sums_flags() {
        let q = by_age().select("g", TypeRef::Anonymous, |g| {
            let x = param("x", TypeRef::entity("Student"));
            new_anon(vec![(
                "Active",
                count_where(g, &x, member_typed(p(&x), "IsActive", TypeRef::Bool)),
            )])
        });
        let statement = testing::translate(&q.into_expr()).unwrap();
        let StatementBody::Query(dt) = statement.body else {
            panic!("expected a query");
        };
        assert!(matches!(
            dt.columns[0].expr,
            SqlExpr::Aggregate {
                func: AggregateFunction::Sum,
                ..
            }
        ));
    }

    #[test]
    fn test_sum_over_whole_rows_is_unsupported() {
        let q = by_age().select("g", TypeRef::Int, |g| call("Enumerable", "Sum", vec![g], TypeRef::Int));
        let err = testing::translate(&q.into_expr()).unwrap_err();
        assert!(matches!(err, TranslateError::Unsupported { .. }));
    }
}

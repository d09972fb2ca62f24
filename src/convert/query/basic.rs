//! Single-source operators: filtering, projection, ordering, paging and the
//! terminal operators that reduce a query to a value.

use super::QueryOperator;
use crate::convert::{scalar, shape, take_child, ConversionContext, Converter};
use crate::error::{Result, TranslateError};
use crate::expr::{Expr, MethodCall, QueryMethod};
use crate::sql::{AggregateFunction, BinaryOperator, Literal, Operation, OrderItem, SqlExpr, SqlSelect};

pub(crate) fn operator(method: QueryMethod, call: &MethodCall) -> Option<Box<dyn QueryOperator>> {
    let has_lambda = call.args.len() > 1;
    let op: Box<dyn QueryOperator> = match method {
        QueryMethod::Where => Box::new(WhereOp),
        QueryMethod::Select => Box::new(SelectOp),
        QueryMethod::OrderBy => Box::new(OrderByOp::new(false, false)),
        QueryMethod::OrderByDescending => Box::new(OrderByOp::new(true, false)),
        QueryMethod::ThenBy => Box::new(OrderByOp::new(false, true)),
        QueryMethod::ThenByDescending => Box::new(OrderByOp::new(true, true)),
        QueryMethod::Take => Box::new(TakeOp),
        QueryMethod::Skip => Box::new(SkipOp),
        QueryMethod::Paging => Box::new(PagingOp),
        QueryMethod::Distinct => Box::new(DistinctOp),
        QueryMethod::DefaultIfEmpty => Box::new(DefaultIfEmptyOp),
        QueryMethod::First | QueryMethod::FirstOrDefault | QueryMethod::Single | QueryMethod::SingleOrDefault => {
            Box::new(FirstOp {
                method,
                predicate: has_lambda,
            })
        }
        m if m.is_aggregate() => Box::new(AggregateOp { method: m }),
        QueryMethod::Any => Box::new(ExistsOp {
            negate: false,
            predicate: has_lambda,
        }),
        QueryMethod::All => Box::new(ExistsOp {
            negate: true,
            predicate: has_lambda,
        }),
        QueryMethod::Contains => Box::new(ContainsOp),
        _ => return None,
    };
    Some(op)
}

struct WhereOp;

impl QueryOperator for WhereOp {
    fn name(&self) -> &'static str {
        "Where"
    }

    fn operation(&self) -> Operation {
        Operation::Filter
    }

    fn apply(&mut self, mut select: SqlSelect, mut args: Vec<SqlExpr>, cx: &mut ConversionContext<'_>) -> Result<SqlExpr> {
        let predicate = take_child(&mut args, 1, "Where predicate")?.into_scalar();
        select.apply_filter(cx.factory().predicate(predicate));
        Ok(SqlExpr::Select(Box::new(select)))
    }
}

struct SelectOp;

impl QueryOperator for SelectOp {
    fn name(&self) -> &'static str {
        "Select"
    }

    fn operation(&self) -> Operation {
        Operation::Projection
    }

    fn apply(&mut self, mut select: SqlSelect, mut args: Vec<SqlExpr>, _: &mut ConversionContext<'_>) -> Result<SqlExpr> {
        let projection = take_child(&mut args, 1, "Select projection")?;
        select.apply_projection(projection);
        Ok(SqlExpr::Select(Box::new(select)))
    }
}

struct OrderByOp {
    descending: bool,
    append: bool,
}

impl OrderByOp {
    fn new(descending: bool, append: bool) -> Self {
        Self { descending, append }
    }
}

impl QueryOperator for OrderByOp {
    fn name(&self) -> &'static str {
        match (self.append, self.descending) {
            (false, false) => "OrderBy",
            (false, true) => "OrderByDescending",
            (true, false) => "ThenBy",
            (true, true) => "ThenByDescending",
        }
    }

    fn operation(&self) -> Operation {
        if self.append {
            Operation::ThenBy
        } else {
            Operation::OrderBy
        }
    }

    fn apply(&mut self, mut select: SqlSelect, mut args: Vec<SqlExpr>, cx: &mut ConversionContext<'_>) -> Result<SqlExpr> {
        let key = take_child(&mut args, 1, "ordering key")?;
        let keys = if shape::is_multi_column(&key) {
            let metadata = cx.metadata();
            let mut leaves = Vec::new();
            cx.bindings_mut()
                .flatten(metadata, &key, &crate::binding::ModelPath::EMPTY, &mut leaves)?;
            leaves.into_iter().map(|(_, leaf)| leaf).collect()
        } else {
            vec![key.into_scalar()]
        };
        let items = keys
            .into_iter()
            .map(|expr| OrderItem {
                expr,
                descending: self.descending,
            })
            .collect();
        select.apply_order_by(items, self.append);
        Ok(SqlExpr::Select(Box::new(select)))
    }
}

struct TakeOp;

impl QueryOperator for TakeOp {
    fn name(&self) -> &'static str {
        "Take"
    }

    fn operation(&self) -> Operation {
        Operation::Take
    }

    fn apply(&mut self, mut select: SqlSelect, mut args: Vec<SqlExpr>, _: &mut ConversionContext<'_>) -> Result<SqlExpr> {
        select.apply_take(take_child(&mut args, 1, "Take count")?.into_scalar());
        Ok(SqlExpr::Select(Box::new(select)))
    }
}

struct SkipOp;

impl QueryOperator for SkipOp {
    fn name(&self) -> &'static str {
        "Skip"
    }

    fn operation(&self) -> Operation {
        Operation::Skip
    }

    fn apply(&mut self, mut select: SqlSelect, mut args: Vec<SqlExpr>, _: &mut ConversionContext<'_>) -> Result<SqlExpr> {
        select.apply_skip(take_child(&mut args, 1, "Skip count")?.into_scalar());
        Ok(SqlExpr::Select(Box::new(select)))
    }
}

/// `Paging(page, size)` with a one-based page number.
struct PagingOp;

impl QueryOperator for PagingOp {
    fn name(&self) -> &'static str {
        "Paging"
    }

    fn operation(&self) -> Operation {
        Operation::Skip
    }

    fn apply(&mut self, mut select: SqlSelect, mut args: Vec<SqlExpr>, cx: &mut ConversionContext<'_>) -> Result<SqlExpr> {
        let page = take_child(&mut args, 1, "Paging page")?.into_scalar();
        let size = take_child(&mut args, 2, "Paging size")?.into_scalar();
        let folded = match (&page, &size) {
            (SqlExpr::Literal(Literal::Integer(page)), SqlExpr::Literal(Literal::Integer(size))) => {
                Some((page - 1).max(0) * size)
            }
            _ => None,
        };
        let skip = match folded {
            Some(rows) => SqlExpr::Literal(Literal::Integer(rows)),
            None => {
                let factory = cx.factory();
                let previous = factory.binary(BinaryOperator::Minus, page, SqlExpr::Literal(Literal::Integer(1)));
                factory.binary(BinaryOperator::Multiply, previous, size.clone())
            }
        };
        select.apply_skip(skip);
        select.apply_take(size);
        Ok(SqlExpr::Select(Box::new(select)))
    }
}

struct DistinctOp;

impl QueryOperator for DistinctOp {
    fn name(&self) -> &'static str {
        "Distinct"
    }

    fn operation(&self) -> Operation {
        Operation::Distinct
    }

    fn apply(&mut self, mut select: SqlSelect, _: Vec<SqlExpr>, _: &mut ConversionContext<'_>) -> Result<SqlExpr> {
        select.apply_distinct();
        Ok(SqlExpr::Select(Box::new(select)))
    }
}

/// Marks the query so that joining it produces an outer apply.
struct DefaultIfEmptyOp;

impl QueryOperator for DefaultIfEmptyOp {
    fn name(&self) -> &'static str {
        "DefaultIfEmpty"
    }

    fn operation(&self) -> Operation {
        Operation::Inspect
    }

    fn apply(&mut self, mut select: SqlSelect, _: Vec<SqlExpr>, _: &mut ConversionContext<'_>) -> Result<SqlExpr> {
        select.set_default_if_empty();
        Ok(SqlExpr::Select(Box::new(select)))
    }
}

/// `First`, `Single` and their `OrDefault` forms all read one row.
struct FirstOp {
    method: QueryMethod,
    predicate: bool,
}

impl QueryOperator for FirstOp {
    fn name(&self) -> &'static str {
        self.method.name()
    }

    fn operation(&self) -> Operation {
        if self.predicate {
            Operation::Filter
        } else {
            Operation::Take
        }
    }

    fn apply(&mut self, mut select: SqlSelect, mut args: Vec<SqlExpr>, cx: &mut ConversionContext<'_>) -> Result<SqlExpr> {
        if self.predicate {
            let predicate = take_child(&mut args, 1, "First predicate")?.into_scalar();
            select.apply_filter(cx.factory().predicate(predicate));
        }
        select.apply_take(SqlExpr::Literal(Literal::Integer(1)));
        Ok(SqlExpr::Select(Box::new(select)))
    }
}

struct AggregateOp {
    method: QueryMethod,
}

impl AggregateOp {
    fn function(&self) -> AggregateFunction {
        match self.method {
            QueryMethod::LongCount => AggregateFunction::CountBig,
            QueryMethod::Sum => AggregateFunction::Sum,
            QueryMethod::Min => AggregateFunction::Min,
            QueryMethod::Max => AggregateFunction::Max,
            QueryMethod::Average => AggregateFunction::Avg,
            _ => AggregateFunction::Count,
        }
    }

    fn is_count(&self) -> bool {
        matches!(self.method, QueryMethod::Count | QueryMethod::LongCount)
    }
}

impl QueryOperator for AggregateOp {
    fn name(&self) -> &'static str {
        self.method.name()
    }

    fn operation(&self) -> Operation {
        Operation::Aggregate
    }

    fn apply(&mut self, mut select: SqlSelect, mut args: Vec<SqlExpr>, cx: &mut ConversionContext<'_>) -> Result<SqlExpr> {
        let factory = cx.factory();
        let lambda = match args.len() {
            0 | 1 => None,
            _ => Some(take_child(&mut args, 1, "aggregate argument")?.into_scalar()),
        };
        let argument = if self.is_count() {
            if let Some(predicate) = lambda {
                select.apply_filter(factory.predicate(predicate));
            }
            None
        } else {
            let value = lambda.or_else(|| select.take_projection()).ok_or_else(|| {
                TranslateError::unsupported(format!("{} without a selector over whole rows", self.method.name()))
            })?;
            if shape::is_multi_column(&value) {
                return Err(TranslateError::unsupported(format!(
                    "{} over a multi-column value",
                    self.method.name()
                )));
            }
            Some(value)
        };
        select.order_by.clear();
        select.projection = Some(factory.aggregate(self.function(), argument));
        Ok(SqlExpr::Select(Box::new(select)))
    }
}

/// `Any` and `All` as `[NOT] EXISTS`.
struct ExistsOp {
    negate: bool,
    predicate: bool,
}

impl QueryOperator for ExistsOp {
    fn name(&self) -> &'static str {
        if self.negate {
            "All"
        } else {
            "Any"
        }
    }

    fn operation(&self) -> Operation {
        if self.predicate {
            Operation::Filter
        } else {
            Operation::Inspect
        }
    }

    fn produces_query(&self) -> bool {
        false
    }

    fn apply(&mut self, mut select: SqlSelect, mut args: Vec<SqlExpr>, cx: &mut ConversionContext<'_>) -> Result<SqlExpr> {
        let factory = cx.factory();
        if self.predicate {
            let predicate = factory.predicate(take_child(&mut args, 1, "Any predicate")?.into_scalar());
            select.apply_filter(if self.negate { factory.not(predicate) } else { predicate });
        } else if self.negate {
            return Err(TranslateError::Arity {
                context: "All predicate".into(),
                expected: 2,
                actual: args.len(),
            });
        }
        exists(select, self.negate, cx)
    }
}

fn exists(mut select: SqlSelect, negate: bool, cx: &mut ConversionContext<'_>) -> Result<SqlExpr> {
    if !select.is_paged() {
        select.order_by.clear();
    }
    select.projection = Some(SqlExpr::Literal(Literal::Integer(1)));
    let metadata = cx.metadata();
    let query = select.close(cx.bindings_mut(), metadata)?;
    let factory = cx.factory();
    let test = factory.exists(query);
    Ok(if negate { factory.not(test) } else { test })
}

/// `query.Contains(item)`: an `EXISTS` over the rows equal to `item`.
struct ContainsOp;

impl QueryOperator for ContainsOp {
    fn name(&self) -> &'static str {
        "Contains"
    }

    fn operation(&self) -> Operation {
        Operation::Filter
    }

    fn produces_query(&self) -> bool {
        false
    }

    fn apply(&mut self, mut select: SqlSelect, mut args: Vec<SqlExpr>, cx: &mut ConversionContext<'_>) -> Result<SqlExpr> {
        let item = take_child(&mut args, 1, "Contains item")?.into_scalar();
        let row = match select.take_projection() {
            Some(projection) => projection,
            None => select.current_shape(cx.bindings_mut()),
        };
        let predicate = shape::equality(row, item, cx)?;
        select.apply_filter(predicate);
        exists(select, false, cx)
    }
}

/// `DataSet<T>(provider)`: the table of `T`. The provider argument is never
/// converted.
pub(crate) struct DataSetConverter;

impl Converter for DataSetConverter {
    fn name(&self) -> &'static str {
        "DataSet"
    }

    fn try_override_child(&mut self, _: usize, _: &Expr, _: &mut ConversionContext<'_>) -> Result<Option<SqlExpr>> {
        Ok(Some(SqlExpr::Placeholder))
    }

    fn convert(&mut self, node: &Expr, _: Vec<SqlExpr>, cx: &mut ConversionContext<'_>) -> Result<SqlExpr> {
        let call = node
            .as_method_call()
            .ok_or_else(|| TranslateError::invalid("data set converter on a non-call node"))?;
        let entity = call
            .method
            .generic_args
            .first()
            .or_else(|| call.ty.element_type())
            .and_then(|t| t.entity_name())
            .ok_or_else(|| TranslateError::unsupported(format!("{} without an entity type argument", call.method)))?;
        scalar::table(entity, cx)
    }
}

#[cfg(test)]
mod tests {
    use crate::error::TranslateError;
    use crate::expr::build::*;
    use crate::expr::TypeRef;
    use crate::testing;

    #[test]
    fn test_paging_folds_constant_page() {
        let q = Query::from("Student").order_by("x", |x| member(x, "Age")).paging(3, 10);
        let sql = testing::sqlserver(&q.into_expr());
        assert!(sql.ends_with("ORDER BY a1.[Age] OFFSET 20 ROWS FETCH NEXT 10 ROWS ONLY"), "{sql}");
    }

    #[test]
    fn test_first_reads_one_row() {
        let expr = Query::from("Student").first_where("x", |x| gt(member(x, "Age"), constant(30)));
        let sql = testing::sqlserver(&expr);
        assert!(sql.starts_with("SELECT TOP (1) "), "{sql}");
        assert!(sql.ends_with("WHERE a1.[Age] > 30"), "{sql}");
    }

    #[test]
    fn test_distinct_projection() {
        let q = Query::from("Student")
            .select("x", TypeRef::Int, |x| member(x, "Age"))
            .distinct();
        let sql = testing::sqlserver(&q.into_expr());
        assert!(sql.starts_with("SELECT DISTINCT a1.[Age]"), "{sql}");
    }

    #[test]
    fn test_sum_over_multiple_columns_is_unsupported() {
        let expr = Query::from("Student").sum("x", TypeRef::Int, |x| {
            new_anon(vec![("A", member(x.clone(), "Age")), ("B", member(x, "CourseId"))])
        });
        let err = testing::translate(&expr).unwrap_err();
        assert!(matches!(err, TranslateError::Unsupported { .. }), "{err}");
    }
}

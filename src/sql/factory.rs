//! Construction of SQL nodes.
//!
//! Converters never build [`SqlExpr`] operator nodes directly; they go
//! through a [`SqlFactory`] so that a host can swap in its own node
//! construction (a different NULL comparison policy, vendor functions)
//! without touching any converter. [`DefaultSqlFactory`] uses every default.

use super::*;
use crate::error::{Result, TranslateError};
use crate::expr::TypeRef;

pub trait SqlFactory {
    fn table(&self, entity: &str, name: TableName) -> SqlTable {
        SqlTable {
            entity: entity.to_string(),
            name,
        }
    }

    fn literal(&self, value: &Value) -> Result<SqlExpr> {
        let literal = match value {
            Value::Null => Literal::Null,
            Value::Bool(b) => Literal::Boolean(*b),
            Value::Int(i) => Literal::Integer(*i),
            Value::Float(f) => Literal::Float(*f),
            Value::String(s) => Literal::String(s.clone()),
            Value::DateTime(d) => Literal::DateTime(*d),
            Value::List(items) => {
                return Ok(SqlExpr::List(
                    items.iter().map(|i| self.literal(i)).collect::<Result<_>>()?,
                ))
            }
            Value::Object(_) => return Err(TranslateError::unsupported("an object constant as a SQL value")),
            Value::Table(entity) => {
                return Err(TranslateError::unsupported(format!(
                    "query over '{entity}' in a scalar position"
                )))
            }
        };
        Ok(SqlExpr::Literal(literal))
    }

    /// A captured value. Lists become one parameter per element.
    fn parameter(&self, name: &str, value: Value) -> SqlExpr {
        match value {
            Value::List(items) => SqlExpr::List(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| self.parameter(&format!("{name}_{i}"), v))
                    .collect(),
            ),
            value => SqlExpr::Parameter(SqlParameter {
                name: name.to_string(),
                value,
            }),
        }
    }

    /// Binary operator. Equality against a NULL literal becomes `IS NULL`.
    fn binary(&self, op: BinaryOperator, left: SqlExpr, right: SqlExpr) -> SqlExpr {
        let is_null = |e: &SqlExpr| matches!(e, SqlExpr::Literal(Literal::Null));
        match op {
            BinaryOperator::Eq | BinaryOperator::NotEq if is_null(&right) || is_null(&left) => {
                let operand = if is_null(&right) { left } else { right };
                SqlExpr::IsNull {
                    expr: Box::new(operand),
                    negated: op == BinaryOperator::NotEq,
                }
            }
            _ => SqlExpr::binary(op, left, right),
        }
    }

    /// Chains predicates with AND; `None` for an empty list.
    fn and_all(&self, predicates: Vec<SqlExpr>) -> Option<SqlExpr> {
        predicates
            .into_iter()
            .reduce(|acc, p| self.binary(BinaryOperator::And, acc, p))
    }

    fn not(&self, expr: SqlExpr) -> SqlExpr {
        match expr {
            SqlExpr::IsNull { expr, negated } => SqlExpr::IsNull {
                expr,
                negated: !negated,
            },
            SqlExpr::InValues { expr, values, negated } => SqlExpr::InValues {
                expr,
                values,
                negated: !negated,
            },
            SqlExpr::Unary {
                op: UnaryOperator::Not,
                expr,
            } => *expr,
            other => SqlExpr::Unary {
                op: UnaryOperator::Not,
                expr: Box::new(self.predicate(other)),
            },
        }
    }

    fn negate(&self, expr: SqlExpr) -> SqlExpr {
        SqlExpr::Unary {
            op: UnaryOperator::Minus,
            expr: Box::new(expr),
        }
    }

    /// Turns a boolean value into a condition: `flag` becomes `flag = TRUE`.
    fn predicate(&self, expr: SqlExpr) -> SqlExpr {
        if expr.is_predicate() {
            expr
        } else {
            SqlExpr::binary(BinaryOperator::Eq, expr, SqlExpr::Literal(Literal::Boolean(true)))
        }
    }

    fn case(&self, test: SqlExpr, if_true: SqlExpr, if_false: SqlExpr) -> SqlExpr {
        SqlExpr::Case {
            test: Box::new(self.predicate(test)),
            if_true: Box::new(if_true),
            if_false: Box::new(if_false),
        }
    }

    fn function(&self, name: &str, args: Vec<SqlExpr>) -> SqlExpr {
        SqlExpr::Function {
            name: name.to_string(),
            args,
        }
    }

    fn aggregate(&self, func: AggregateFunction, arg: Option<SqlExpr>) -> SqlExpr {
        SqlExpr::Aggregate {
            func,
            arg: arg.map(Box::new),
        }
    }

    /// `CAST`; `None` when `ty` has no SQL counterpart.
    fn cast(&self, expr: SqlExpr, ty: &TypeRef) -> Option<SqlExpr> {
        let data_type = match ty.underlying() {
            TypeRef::Bool => DataType::Boolean,
            TypeRef::Int => DataType::Integer,
            TypeRef::Long => DataType::BigInt,
            TypeRef::Decimal => DataType::Decimal,
            TypeRef::Double => DataType::Float,
            TypeRef::String => DataType::Text,
            TypeRef::DateTime => DataType::DateTime,
            TypeRef::Guid => DataType::Uuid,
            _ => return None,
        };
        Some(SqlExpr::Cast {
            expr: Box::new(expr),
            data_type,
        })
    }

    fn date_part(&self, part: DatePart, expr: SqlExpr) -> SqlExpr {
        SqlExpr::DatePart {
            part,
            expr: Box::new(expr),
        }
    }

    fn date_add(&self, part: DatePart, amount: SqlExpr, expr: SqlExpr) -> SqlExpr {
        SqlExpr::DateAdd {
            part,
            amount: Box::new(amount),
            expr: Box::new(expr),
        }
    }

    fn date_subtract(&self, part: DatePart, start: SqlExpr, end: SqlExpr) -> SqlExpr {
        SqlExpr::DateDiff {
            part,
            start: Box::new(start),
            end: Box::new(end),
        }
    }

    /// `expr IN (..)`. An empty list is constant false (true when negated).
    fn in_values(&self, expr: SqlExpr, values: Vec<SqlExpr>, negated: bool) -> SqlExpr {
        if values.is_empty() {
            let always = SqlExpr::Literal(Literal::Integer(1));
            let never = SqlExpr::Literal(Literal::Integer(if negated { 1 } else { 0 }));
            return SqlExpr::binary(BinaryOperator::Eq, always, never);
        }
        SqlExpr::InValues {
            expr: Box::new(expr),
            values,
            negated,
        }
    }

    fn exists(&self, query: SqlDerivedTable) -> SqlExpr {
        SqlExpr::Exists(Box::new(query))
    }

    fn subquery(&self, query: SqlDerivedTable) -> SqlExpr {
        SqlExpr::Subquery(Box::new(query))
    }

    fn union(&self, items: Vec<UnionItem>) -> SqlUnion {
        SqlUnion { items }
    }

    fn cte(&self, alias: Alias, anchor: SqlDerivedTable, recursive: Option<SqlDerivedTable>) -> SqlCte {
        SqlCte {
            alias,
            anchor,
            recursive,
        }
    }

    fn update(&self, target: Alias, select: SqlSelect, assignments: Vec<(String, SqlExpr)>) -> SqlUpdate {
        SqlUpdate {
            target,
            select,
            assignments,
        }
    }

    fn delete(&self, target: Alias, select: SqlSelect) -> SqlDelete {
        SqlDelete { target, select }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSqlFactory;

impl SqlFactory for DefaultSqlFactory {}

#[cfg(test)]
mod tests {
    use super::*;

    fn col() -> SqlExpr {
        SqlExpr::column(Alias(1), "ParentId")
    }

    #[test]
    fn test_equality_with_null_becomes_is_null() {
        let f = DefaultSqlFactory;
        let e = f.binary(BinaryOperator::Eq, col(), SqlExpr::Literal(Literal::Null));
        assert_eq!(
            e,
            SqlExpr::IsNull {
                expr: Box::new(col()),
                negated: false
            }
        );
        let e = f.binary(BinaryOperator::NotEq, SqlExpr::Literal(Literal::Null), col());
        assert!(matches!(e, SqlExpr::IsNull { negated: true, .. }));
    }

    #[test]
    fn test_not_folds_into_is_null_and_in() {
        let f = DefaultSqlFactory;
        let is_null = f.binary(BinaryOperator::Eq, col(), SqlExpr::Literal(Literal::Null));
        assert!(matches!(f.not(is_null), SqlExpr::IsNull { negated: true, .. }));
        let within = f.in_values(col(), vec![SqlExpr::Literal(Literal::Integer(1))], false);
        assert!(matches!(f.not(within), SqlExpr::InValues { negated: true, .. }));
    }

    #[test]
    fn test_parameter_list_expands_per_element() {
        let f = DefaultSqlFactory;
        let e = f.parameter("ids", Value::List(vec![Value::Int(1), Value::Int(2)]));
        match e {
            SqlExpr::List(items) => {
                assert_eq!(items.len(), 2);
                assert!(matches!(&items[1], SqlExpr::Parameter(p) if p.name == "ids_1"));
            }
            other => panic!("expected list, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_in_list_is_constant() {
        let f = DefaultSqlFactory;
        assert!(matches!(f.in_values(col(), vec![], false), SqlExpr::Binary { .. }));
    }

    #[test]
    fn test_cast_unknown_type_is_none() {
        let f = DefaultSqlFactory;
        assert!(f.cast(col(), &TypeRef::Anonymous).is_none());
        assert!(f.cast(col(), &TypeRef::nullable(TypeRef::Int)).is_some());
    }
}

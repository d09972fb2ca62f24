//! Method calls on scalar values: string, date and math functions.

use super::{ConversionContext, Converter};
use crate::error::{Result, TranslateError};
use crate::expr::{Expr, MethodCall, TypeRef, Value};
use crate::sql::{BinaryOperator, DatePart, Literal, SqlExpr, SqlFactory, SqlParameter};

struct FunctionConverter;

enum Wildcards {
    Both,
    Trailing,
    Leading,
}

/// Builds a LIKE pattern around `value`. Literal and captured strings are
/// rewritten in place; anything else is concatenated with `%`.
fn like_pattern(value: SqlExpr, wildcards: Wildcards, factory: &dyn SqlFactory) -> SqlExpr {
    let wrap = |s: &str| match wildcards {
        Wildcards::Both => format!("%{s}%"),
        Wildcards::Trailing => format!("{s}%"),
        Wildcards::Leading => format!("%{s}"),
    };
    match value {
        SqlExpr::Literal(Literal::String(s)) => SqlExpr::Literal(Literal::String(wrap(&s))),
        SqlExpr::Parameter(SqlParameter {
            name,
            value: Value::String(s),
        }) => SqlExpr::Parameter(SqlParameter {
            name,
            value: Value::String(wrap(&s)),
        }),
        other => {
            let percent = || SqlExpr::Literal(Literal::String("%".into()));
            match wildcards {
                Wildcards::Both => factory.binary(
                    BinaryOperator::Concat,
                    factory.binary(BinaryOperator::Concat, percent(), other),
                    percent(),
                ),
                Wildcards::Trailing => factory.binary(BinaryOperator::Concat, other, percent()),
                Wildcards::Leading => factory.binary(BinaryOperator::Concat, percent(), other),
            }
        }
    }
}

fn add_part(name: &str) -> Option<DatePart> {
    Some(match name {
        "AddYears" => DatePart::Year,
        "AddMonths" => DatePart::Month,
        "AddDays" => DatePart::Day,
        "AddHours" => DatePart::Hour,
        "AddMinutes" => DatePart::Minute,
        "AddSeconds" => DatePart::Second,
        "AddMilliseconds" => DatePart::Millisecond,
        _ => return None,
    })
}

fn arity(call: &MethodCall, args: &[SqlExpr], expected: usize) -> Result<()> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(TranslateError::Arity {
            context: format!("arguments of {}", call.method),
            expected,
            actual: args.len(),
        })
    }
}

impl Converter for FunctionConverter {
    fn name(&self) -> &'static str {
        "Function"
    }

    fn convert(&mut self, node: &Expr, children: Vec<SqlExpr>, cx: &mut ConversionContext<'_>) -> Result<SqlExpr> {
        let call = node
            .as_method_call()
            .ok_or_else(|| TranslateError::invalid("function converter on a non-call node"))?;
        let factory = cx.factory();
        let mut args: Vec<SqlExpr> = children.into_iter().map(SqlExpr::into_scalar).collect();
        let instance = call.instance.is_some();
        let one = || SqlExpr::Literal(Literal::Integer(1));

        let result = match (call.method.declaring_type.as_str(), call.method.name.as_str(), instance) {
            ("String", name @ ("Contains" | "StartsWith" | "EndsWith"), true) => {
                arity(call, &args, 2)?;
                let wildcards = match name {
                    "Contains" => Wildcards::Both,
                    "StartsWith" => Wildcards::Trailing,
                    _ => Wildcards::Leading,
                };
                let pattern = args.pop().unwrap_or(SqlExpr::Placeholder);
                let target = args.pop().unwrap_or(SqlExpr::Placeholder);
                factory.binary(BinaryOperator::Like, target, like_pattern(pattern, wildcards, factory))
            }
            ("String", name @ ("ToUpper" | "ToLower" | "Trim" | "TrimStart" | "TrimEnd"), true) => {
                arity(call, &args, 1)?;
                let function = match name {
                    "ToUpper" => "UPPER",
                    "ToLower" => "LOWER",
                    "Trim" => "TRIM",
                    "TrimStart" => "LTRIM",
                    _ => "RTRIM",
                };
                factory.function(function, args)
            }
            ("String", "Substring", true) => {
                if !(2..=3).contains(&args.len()) {
                    arity(call, &args, 3)?;
                }
                let mut args = args.into_iter();
                let target = args.next().unwrap_or(SqlExpr::Placeholder);
                let start = args.next().unwrap_or(SqlExpr::Placeholder);
                let start = match start {
                    SqlExpr::Literal(Literal::Integer(i)) => SqlExpr::Literal(Literal::Integer(i + 1)),
                    other => factory.binary(BinaryOperator::Plus, other, one()),
                };
                let length = args
                    .next()
                    .unwrap_or_else(|| factory.function("LEN", vec![target.clone()]));
                factory.function("SUBSTRING", vec![target, start, length])
            }
            ("String", "IsNullOrEmpty", false) => {
                arity(call, &args, 1)?;
                let value = args.pop().unwrap_or(SqlExpr::Placeholder);
                factory.binary(
                    BinaryOperator::Or,
                    factory.binary(BinaryOperator::Eq, value.clone(), SqlExpr::Literal(Literal::Null)),
                    factory.binary(BinaryOperator::Eq, value, SqlExpr::Literal(Literal::String(String::new()))),
                )
            }
            ("String", "Concat", false) => args
                .into_iter()
                .reduce(|acc, a| factory.binary(BinaryOperator::Concat, acc, a))
                .ok_or_else(|| TranslateError::unsupported("String.Concat without arguments"))?,
            ("DateTime", name, true) if add_part(name).is_some() => {
                arity(call, &args, 2)?;
                let amount = args.pop().unwrap_or(SqlExpr::Placeholder);
                let date = args.pop().unwrap_or(SqlExpr::Placeholder);
                let part = add_part(name).unwrap_or(DatePart::Day);
                factory.date_add(part, amount, date)
            }
            ("DateTime", "Subtract", true) => {
                arity(call, &args, 2)?;
                let other = args.pop().unwrap_or(SqlExpr::Placeholder);
                let date = args.pop().unwrap_or(SqlExpr::Placeholder);
                factory.date_subtract(DatePart::Day, other, date)
            }
            ("Math", name @ ("Abs" | "Floor" | "Ceiling" | "Sign"), false) => {
                arity(call, &args, 1)?;
                let function = match name {
                    "Abs" => "ABS",
                    "Floor" => "FLOOR",
                    "Ceiling" => "CEILING",
                    _ => "SIGN",
                };
                factory.function(function, args)
            }
            ("Math", "Round", false) => {
                if args.len() == 1 {
                    args.push(SqlExpr::Literal(Literal::Integer(0)));
                }
                arity(call, &args, 2)?;
                factory.function("ROUND", args)
            }
            (_, "Equals", _) => {
                arity(call, &args, 2)?;
                let right = args.pop().unwrap_or(SqlExpr::Placeholder);
                let left = args.pop().unwrap_or(SqlExpr::Placeholder);
                factory.binary(BinaryOperator::Eq, left, right)
            }
            (_, "ToString", true) => {
                arity(call, &args, 1)?;
                let value = args.pop().unwrap_or(SqlExpr::Placeholder);
                factory.cast(value.clone(), &TypeRef::String).unwrap_or(value)
            }
            _ => return Err(TranslateError::unsupported(format!("method {}", call.method))),
        };
        Ok(result)
    }
}

pub(crate) fn create_function(node: &Expr, _: &ConversionContext<'_>) -> Option<Box<dyn Converter>> {
    match node {
        Expr::MethodCall(_) if node.query_method().is_none() => Some(Box::new(FunctionConverter)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::SourceShape;
    use crate::convert::{ConverterRegistry, Dispatcher};
    use crate::expr::build::*;
    use crate::sql::DefaultSqlFactory;
    use crate::testing;

    fn convert_over_student(body: Expr) -> Result<SqlExpr> {
        let model = testing::model();
        let registry = ConverterRegistry::default();
        let mut cx = ConversionContext::new(&model, &DefaultSqlFactory);
        let a = cx.bindings_mut().next_alias();
        cx.bindings_mut().register_source(a, SourceShape::Entity("Student".into()));
        let mut scope = cx.bind_parameters(vec![("x".into(), SqlExpr::DataSourceRef(a))]);
        let out = Dispatcher::new(&registry).convert(&body, &mut scope);
        out
    }

    fn name() -> Expr {
        member_typed(p(&param("x", TypeRef::entity("Student"))), "Name", TypeRef::String)
    }

    #[test]
    fn test_string_contains_becomes_like() {
        let body = call_instance("String", "Contains", name(), vec![constant("ann")], TypeRef::Bool);
        let out = convert_over_student(body).unwrap();
        let SqlExpr::Binary {
            op: BinaryOperator::Like,
            right,
            ..
        } = out
        else {
            panic!("expected LIKE");
        };
        assert_eq!(*right, SqlExpr::Literal(Literal::String("%ann%".into())));
    }

    #[test]
    fn test_starts_with_captured_value_keeps_parameter() {
        let body = call_instance("String", "StartsWith", name(), vec![variable("prefix", "Jo")], TypeRef::Bool);
        let out = convert_over_student(body).unwrap();
        let SqlExpr::Binary { right, .. } = out else {
            panic!("expected LIKE");
        };
        assert!(matches!(*right, SqlExpr::Parameter(ref p) if p.value == Value::String("Jo%".into())));
    }

    #[test]
    fn test_substring_is_one_based() {
        let body = call_instance("String", "Substring", name(), vec![constant(0), constant(3)], TypeRef::String);
        let out = convert_over_student(body).unwrap();
        let SqlExpr::Function { name, args } = out else {
            panic!("expected function");
        };
        assert_eq!(name, "SUBSTRING");
        assert_eq!(args[1], SqlExpr::Literal(Literal::Integer(1)));
    }

    #[test]
    fn test_add_days_becomes_date_add() {
        let enrolled = member_typed(p(&param("x", TypeRef::entity("Student"))), "EnrolledOn", TypeRef::DateTime);
        let body = call_instance("DateTime", "AddDays", enrolled, vec![constant(7)], TypeRef::DateTime);
        let out = convert_over_student(body).unwrap();
        assert!(matches!(out, SqlExpr::DateAdd { part: DatePart::Day, .. }));
    }

    #[test]
    fn test_unknown_method_is_unsupported() {
        let body = call_instance("String", "PadLeft", name(), vec![constant(4)], TypeRef::String);
        let err = convert_over_student(body).unwrap_err();
        assert_eq!(err, TranslateError::unsupported("method String.PadLeft"));
    }
}

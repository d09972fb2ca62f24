//! Leaf and operator converters: variables, constants, parameters, member
//! access and the binary/unary/conditional operators.

use super::{shape, take_child, ConversionContext, Converter};
use crate::error::{Result, TranslateError};
use crate::expr::{BinaryOp, Expr, MemberAccess, TypeRef, UnaryOp, Value};
use crate::sql::{BinaryOperator, DatePart, SqlExpr};

/// Converter that always returns its first child. Used for lambdas and
/// quotes, whose parameters are bound by the parent.
struct Passthrough(&'static str);

impl Converter for Passthrough {
    fn name(&self) -> &'static str {
        self.0
    }

    fn convert(&mut self, _: &Expr, mut children: Vec<SqlExpr>, _: &mut ConversionContext<'_>) -> Result<SqlExpr> {
        take_child(&mut children, 0, self.0)
    }
}

pub(crate) fn create_lambda(node: &Expr, _: &ConversionContext<'_>) -> Option<Box<dyn Converter>> {
    match node {
        Expr::Lambda(_) => Some(Box::new(Passthrough("Lambda"))),
        Expr::Unary(u) if u.op == UnaryOp::Quote => Some(Box::new(Passthrough("Quote"))),
        _ => None,
    }
}

/// A captured value: evaluated on the spot and emitted as a parameter.
struct VariableConverter;

impl Converter for VariableConverter {
    fn name(&self) -> &'static str {
        "Variable"
    }

    fn try_override_child(&mut self, _: usize, _: &Expr, _: &mut ConversionContext<'_>) -> Result<Option<SqlExpr>> {
        Ok(Some(SqlExpr::Placeholder))
    }

    fn convert(&mut self, node: &Expr, _: Vec<SqlExpr>, cx: &mut ConversionContext<'_>) -> Result<SqlExpr> {
        match cx.metadata().evaluate(node)? {
            Value::Table(entity) => table(&entity, cx),
            value => Ok(cx.factory().parameter(&variable_name(node), value)),
        }
    }
}

fn variable_name(node: &Expr) -> String {
    match node {
        Expr::Variable(v) => v.name.clone(),
        Expr::Member(MemberAccess {
            target: Some(target),
            member,
            ..
        }) => format!("{}_{}", variable_name(target), member),
        _ => "p".to_string(),
    }
}

pub(crate) fn create_variable(node: &Expr, cx: &ConversionContext<'_>) -> Option<Box<dyn Converter>> {
    cx.metadata()
        .is_variable(node)
        .then(|| Box::new(VariableConverter) as Box<dyn Converter>)
}

pub(crate) fn table(entity: &str, cx: &ConversionContext<'_>) -> Result<SqlExpr> {
    let name = cx.metadata().table_name(entity)?;
    Ok(SqlExpr::Table(cx.factory().table(entity, name)))
}

struct ConstantConverter;

impl Converter for ConstantConverter {
    fn name(&self) -> &'static str {
        "Constant"
    }

    fn convert(&mut self, node: &Expr, _: Vec<SqlExpr>, cx: &mut ConversionContext<'_>) -> Result<SqlExpr> {
        let Expr::Constant(c) = node else {
            return Err(TranslateError::invalid("constant converter on a non-constant node"));
        };
        match &c.value {
            Value::Table(entity) => table(entity, cx),
            value => cx.factory().literal(value),
        }
    }
}

pub(crate) fn create_constant(node: &Expr, _: &ConversionContext<'_>) -> Option<Box<dyn Converter>> {
    matches!(node, Expr::Constant(_)).then(|| Box::new(ConstantConverter) as Box<dyn Converter>)
}

struct ParameterConverter;

impl Converter for ParameterConverter {
    fn name(&self) -> &'static str {
        "Parameter"
    }

    fn convert(&mut self, node: &Expr, _: Vec<SqlExpr>, cx: &mut ConversionContext<'_>) -> Result<SqlExpr> {
        let Expr::Parameter(p) = node else {
            return Err(TranslateError::invalid("parameter converter on a non-parameter node"));
        };
        cx.bindings()
            .lookup_parameter(&p.name)
            .cloned()
            .ok_or_else(|| TranslateError::UnboundParameter(p.name.clone()))
    }
}

pub(crate) fn create_parameter(node: &Expr, _: &ConversionContext<'_>) -> Option<Box<dyn Converter>> {
    matches!(node, Expr::Parameter(_)).then(|| Box::new(ParameterConverter) as Box<dyn Converter>)
}

struct MemberConverter;

impl MemberConverter {
    fn static_member(&self, m: &MemberAccess, cx: &ConversionContext<'_>) -> Result<SqlExpr> {
        let name = m.member.strip_prefix("DateTime.").unwrap_or(&m.member);
        let function = match name {
            "Now" => "CURRENT_TIMESTAMP",
            "UtcNow" => "CURRENT_UTC_TIMESTAMP",
            "Today" => "CURRENT_DATE",
            _ => return Err(TranslateError::unsupported(format!("static member '{}'", m.member))),
        };
        Ok(cx.factory().function(function, Vec::new()))
    }
}

fn date_part(member: &str) -> Option<DatePart> {
    Some(match member {
        "Year" => DatePart::Year,
        "Month" => DatePart::Month,
        "Day" => DatePart::Day,
        "Hour" => DatePart::Hour,
        "Minute" => DatePart::Minute,
        "Second" => DatePart::Second,
        "Millisecond" => DatePart::Millisecond,
        _ => return None,
    })
}

fn interval_part(member: &str) -> Option<DatePart> {
    Some(match member {
        "Days" | "TotalDays" => DatePart::Day,
        "Hours" | "TotalHours" => DatePart::Hour,
        "Minutes" | "TotalMinutes" => DatePart::Minute,
        "Seconds" | "TotalSeconds" => DatePart::Second,
        "Milliseconds" | "TotalMilliseconds" => DatePart::Millisecond,
        _ => return None,
    })
}

impl Converter for MemberConverter {
    fn name(&self) -> &'static str {
        "Member"
    }

    fn convert(&mut self, node: &Expr, mut children: Vec<SqlExpr>, cx: &mut ConversionContext<'_>) -> Result<SqlExpr> {
        let Expr::Member(m) = node else {
            return Err(TranslateError::invalid("member converter on a non-member node"));
        };
        let Some(target_expr) = &m.target else {
            return self.static_member(m, cx);
        };
        let target = take_child(&mut children, 0, "member access")?;
        let factory = cx.factory();
        let member = m.member.as_str();

        match (target_expr.ty(), member) {
            (TypeRef::String, "Length") => return Ok(factory.function("LEN", vec![target.into_scalar()])),
            (TypeRef::Nullable(_), "Value") => return Ok(target),
            (TypeRef::Nullable(_), "HasValue") => {
                return Ok(factory.not(factory.binary(
                    BinaryOperator::Eq,
                    target.into_scalar(),
                    SqlExpr::Literal(crate::sql::Literal::Null),
                )))
            }
            (ty, _) if *ty.underlying() == TypeRef::DateTime => {
                if let Some(part) = date_part(member) {
                    return Ok(factory.date_part(part, target.into_scalar()));
                }
            }
            _ => {}
        }
        if let SqlExpr::DateDiff { start, end, .. } = &target {
            if let Some(part) = interval_part(member) {
                return Ok(factory.date_subtract(part, (**start).clone(), (**end).clone()));
            }
        }
        cx.resolve_member(&target, member)
    }
}

pub(crate) fn create_member(node: &Expr, _: &ConversionContext<'_>) -> Option<Box<dyn Converter>> {
    matches!(node, Expr::Member(_)).then(|| Box::new(MemberConverter) as Box<dyn Converter>)
}

struct BinaryConverter;

impl Converter for BinaryConverter {
    fn name(&self) -> &'static str {
        "Binary"
    }

    fn convert(&mut self, node: &Expr, mut children: Vec<SqlExpr>, cx: &mut ConversionContext<'_>) -> Result<SqlExpr> {
        let Expr::Binary(b) = node else {
            return Err(TranslateError::invalid("binary converter on a non-binary node"));
        };
        let left = take_child(&mut children, 0, "binary operator")?.into_scalar();
        let right = take_child(&mut children, 1, "binary operator")?.into_scalar();
        let factory = cx.factory();
        let logical = *b.ty.underlying() == TypeRef::Bool;
        let textual = *b.left.ty().underlying() == TypeRef::String || *b.right.ty().underlying() == TypeRef::String;

        let op = match b.op {
            BinaryOp::Equal | BinaryOp::NotEqual if shape::is_multi_column(&left) || shape::is_multi_column(&right) => {
                let equal = shape::equality(left, right, cx)?;
                return Ok(if b.op == BinaryOp::Equal { equal } else { factory.not(equal) });
            }
            BinaryOp::Equal => BinaryOperator::Eq,
            BinaryOp::NotEqual => BinaryOperator::NotEq,
            BinaryOp::LessThan => BinaryOperator::Lt,
            BinaryOp::LessThanOrEqual => BinaryOperator::LtEq,
            BinaryOp::GreaterThan => BinaryOperator::Gt,
            BinaryOp::GreaterThanOrEqual => BinaryOperator::GtEq,
            BinaryOp::AndAlso => BinaryOperator::And,
            BinaryOp::OrElse => BinaryOperator::Or,
            BinaryOp::And if logical => BinaryOperator::And,
            BinaryOp::Or if logical => BinaryOperator::Or,
            BinaryOp::Add if textual => BinaryOperator::Concat,
            BinaryOp::Add => BinaryOperator::Plus,
            BinaryOp::Subtract
                if *b.left.ty().underlying() == TypeRef::DateTime && *b.right.ty().underlying() == TypeRef::DateTime =>
            {
                return Ok(factory.date_subtract(DatePart::Day, right, left));
            }
            BinaryOp::Subtract => BinaryOperator::Minus,
            BinaryOp::Multiply => BinaryOperator::Multiply,
            BinaryOp::Divide => BinaryOperator::Divide,
            BinaryOp::Modulo => BinaryOperator::Modulo,
            BinaryOp::Coalesce => return Ok(factory.function("COALESCE", vec![left, right])),
            BinaryOp::And | BinaryOp::Or | BinaryOp::ExclusiveOr => {
                return Err(TranslateError::unsupported(format!("binary operator '{}'", b.op)))
            }
        };
        if matches!(op, BinaryOperator::And | BinaryOperator::Or) {
            return Ok(factory.binary(op, factory.predicate(left), factory.predicate(right)));
        }
        Ok(factory.binary(op, left, right))
    }
}

pub(crate) fn create_binary(node: &Expr, _: &ConversionContext<'_>) -> Option<Box<dyn Converter>> {
    matches!(node, Expr::Binary(_)).then(|| Box::new(BinaryConverter) as Box<dyn Converter>)
}

struct UnaryConverter;

impl Converter for UnaryConverter {
    fn name(&self) -> &'static str {
        "Unary"
    }

    fn convert(&mut self, node: &Expr, mut children: Vec<SqlExpr>, cx: &mut ConversionContext<'_>) -> Result<SqlExpr> {
        let Expr::Unary(u) = node else {
            return Err(TranslateError::invalid("unary converter on a non-unary node"));
        };
        let operand = take_child(&mut children, 0, "unary operator")?;
        let factory = cx.factory();
        match u.op {
            UnaryOp::Not => Ok(factory.not(operand.into_scalar())),
            UnaryOp::Negate => Ok(factory.negate(operand.into_scalar())),
            UnaryOp::Convert => {
                if u.operand.ty().underlying() == u.ty.underlying() || !u.ty.is_scalar() {
                    return Ok(operand);
                }
                let operand = operand.into_scalar();
                Ok(factory.cast(operand.clone(), &u.ty).unwrap_or(operand))
            }
            UnaryOp::Quote => Err(TranslateError::invalid("quote reached the unary converter")),
        }
    }
}

pub(crate) fn create_unary(node: &Expr, _: &ConversionContext<'_>) -> Option<Box<dyn Converter>> {
    matches!(node, Expr::Unary(_)).then(|| Box::new(UnaryConverter) as Box<dyn Converter>)
}

struct ConditionalConverter;

impl Converter for ConditionalConverter {
    fn name(&self) -> &'static str {
        "Conditional"
    }

    fn convert(&mut self, _: &Expr, mut children: Vec<SqlExpr>, cx: &mut ConversionContext<'_>) -> Result<SqlExpr> {
        let test = take_child(&mut children, 0, "conditional")?.into_scalar();
        let if_true = take_child(&mut children, 1, "conditional")?.into_scalar();
        let if_false = take_child(&mut children, 2, "conditional")?.into_scalar();
        Ok(cx.factory().case(test, if_true, if_false))
    }
}

pub(crate) fn create_conditional(node: &Expr, _: &ConversionContext<'_>) -> Option<Box<dyn Converter>> {
    matches!(node, Expr::Conditional(_)).then(|| Box::new(ConditionalConverter) as Box<dyn Converter>)
}

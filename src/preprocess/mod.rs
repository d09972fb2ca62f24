//! Expression rewrites that run before conversion.
//!
//! Each pass takes an expression tree and returns a tree the converters
//! understand more directly, without changing what the query means.
//! Passes compose in registration order.

mod child_join;

use anyhow::{Context, Result};

use crate::expr::{Expr, InValuesExpr, Lambda, MethodCall, QueryMethod, TypeRef, UnaryExpr, UnaryOp, Value};

pub use child_join::ChildJoinRewrite;

/// A single rewrite over an expression tree.
pub trait ExpressionPass: Send + Sync {
    /// Unique name identifying this pass.
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Rewrites `expr`, returning it unchanged when nothing applies.
    fn transform(&self, expr: Expr) -> Result<Expr>;
}

/// Ordered pipeline of [`ExpressionPass`]es.
#[derive(Default)]
pub struct Preprocessor {
    passes: Vec<Box<dyn ExpressionPass>>,
}

impl Preprocessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pipeline with every built-in pass.
    pub fn with_defaults() -> Self {
        let mut pre = Self::new();
        pre.add_pass(Box::new(AllToNotAny));
        pre.add_pass(Box::new(ContainsToInValues));
        pre.add_pass(Box::new(ChildJoinRewrite));
        pre
    }

    pub fn add_pass(&mut self, pass: Box<dyn ExpressionPass>) {
        self.passes.push(pass);
    }

    /// Runs every pass in order.
    pub fn run(&self, expr: Expr) -> Result<Expr> {
        let mut current = expr;
        for pass in &self.passes {
            current = pass
                .transform(current)
                .with_context(|| format!("preprocessing pass '{}' failed", pass.name()))?;
        }
        Ok(current)
    }

    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.iter().map(|p| p.name()).collect()
    }
}

fn unary(op: UnaryOp, operand: Expr, ty: TypeRef) -> Expr {
    Expr::Unary(UnaryExpr {
        op,
        operand: Box::new(operand),
        ty,
    })
}

/// `q.All(x => p)` becomes `NOT q.Any(x => NOT p)`.
pub struct AllToNotAny;

impl AllToNotAny {
    fn rewrite(expr: Expr) -> Expr {
        let Expr::MethodCall(call) = expr else {
            return expr;
        };
        if QueryMethod::from_call(&call) != Some(QueryMethod::All) || call.args.len() != 2 {
            return Expr::MethodCall(call);
        }
        let MethodCall {
            mut method,
            instance,
            mut args,
            ty,
        } = call;
        let predicate = args.pop().map(Expr::strip_quotes);
        let Some(Expr::Lambda(Lambda { params, body })) = predicate else {
            // Leave anything but a plain predicate lambda to the converters.
            args.extend(predicate);
            return Expr::MethodCall(MethodCall {
                method,
                instance,
                args,
                ty,
            });
        };
        let negated = Expr::Lambda(Lambda {
            params,
            body: Box::new(unary(UnaryOp::Not, *body, TypeRef::Bool)),
        });
        args.push(unary(UnaryOp::Quote, negated, TypeRef::Unknown));
        method.name = "Any".to_string();
        let any = Expr::MethodCall(MethodCall {
            method,
            instance,
            args,
            ty: ty.clone(),
        });
        unary(UnaryOp::Not, any, ty)
    }
}

impl ExpressionPass for AllToNotAny {
    fn name(&self) -> &str {
        "all_to_not_any"
    }

    fn description(&self) -> &str {
        "Rewrites All(p) as NOT Any(NOT p)"
    }

    fn transform(&self, expr: Expr) -> Result<Expr> {
        Ok(expr.transform_up(&mut |e| Ok(Self::rewrite(e)))?)
    }
}

/// `collection.Contains(item)` over an in-memory collection becomes an
/// [`InValuesExpr`] marker.
pub struct ContainsToInValues;

impl ContainsToInValues {
    fn is_value_collection(expr: &Expr) -> bool {
        match expr {
            Expr::NewArray(_) | Expr::Variable(_) => true,
            Expr::Constant(c) => matches!(c.value, Value::List(_)),
            _ => false,
        }
    }

    fn rewrite(expr: Expr) -> Expr {
        let Expr::MethodCall(call) = expr else {
            return expr;
        };
        let qualifies = QueryMethod::from_call(&call) == Some(QueryMethod::Contains)
            && call.args.first().is_some_and(Self::is_value_collection);
        if !qualifies {
            return Expr::MethodCall(call);
        }
        let MethodCall {
            method,
            instance,
            args,
            ty,
        } = call;
        match <[Expr; 2]>::try_from(args) {
            Ok([values, item]) => Expr::InValues(InValuesExpr {
                item: Box::new(item),
                values: Box::new(values),
                negated: false,
            }),
            Err(args) => Expr::MethodCall(MethodCall {
                method,
                instance,
                args,
                ty,
            }),
        }
    }
}

impl ExpressionPass for ContainsToInValues {
    fn name(&self) -> &str {
        "contains_to_in_values"
    }

    fn description(&self) -> &str {
        "Turns Contains over in-memory values into an IN test"
    }

    fn transform(&self, expr: Expr) -> Result<Expr> {
        Ok(expr.transform_up(&mut |e| Ok(Self::rewrite(e)))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::build::*;

    #[test]
    fn test_default_pass_order() {
        let pre = Preprocessor::with_defaults();
        assert_eq!(
            pre.pass_names(),
            vec!["all_to_not_any", "contains_to_in_values", "child_join_rewrite"]
        );
    }

    #[test]
    fn test_all_becomes_negated_any() {
        let q = Query::from("Student").all("x", |x| gt(member(x, "Age"), constant(18)));
        let out = AllToNotAny.transform(q).unwrap();
        let Expr::Unary(UnaryExpr {
            op: UnaryOp::Not,
            operand,
            ..
        }) = out
        else {
            panic!("expected NOT");
        };
        assert_eq!(operand.query_method(), Some(QueryMethod::Any));
        let call = operand.as_method_call().unwrap();
        let lambda = call.args[1].as_lambda().unwrap();
        assert!(matches!(
            &*lambda.body,
            Expr::Unary(UnaryExpr {
                op: UnaryOp::Not,
                ..
            })
        ));
    }

    #[test]
    fn test_contains_over_array_becomes_in_values() {
        let q = Query::from("Student").where_("x", |x| {
            contains(new_array(TypeRef::Int, vec![constant(1), constant(2)]), member(x, "Age"))
        });
        let out = ContainsToInValues.transform(q.into_expr()).unwrap();
        assert!(out.any(&mut |e| matches!(e, Expr::InValues(_))));
        assert!(!out.any(&mut |e| e.query_method() == Some(QueryMethod::Contains)));
    }

    #[test]
    fn test_contains_over_query_is_kept() {
        let ids = Query::from("Enrollment").select("e", TypeRef::Int, |e| member(e, "StudentId"));
        let q = Query::from("Student").where_("x", |x| contains(ids.into_expr(), member(x, "StudentId")));
        let expr = q.into_expr();
        let out = ContainsToInValues.transform(expr.clone()).unwrap();
        assert_eq!(out, expr);
    }
}

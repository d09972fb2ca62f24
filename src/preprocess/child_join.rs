//! `SelectMany` over an uncorrelated query becomes a join.
//!
//! `SelectMany(x => other)` where `other` never mentions `x` is a cross
//! join. `SelectMany(x => other.Where(y => ..))` whose only references to
//! `x` are equalities between an `x`-side and a `y`-side value is an inner
//! join on those equalities. Anything else stays a `SelectMany` and
//! converts to an APPLY.

use anyhow::Result;
use tracing::debug;

use super::ExpressionPass;
use crate::expr::build::{and, lambda, quote};
use crate::expr::{BinaryExpr, BinaryOp, ChildJoinExpr, ChildJoinKind, Expr, MethodCall, QueryMethod, Value};

pub struct ChildJoinRewrite;

/// The parts of the join a `SelectMany` call rewrites to.
struct Plan {
    source: Expr,
    child: Expr,
    condition: Option<Expr>,
    result: Option<Expr>,
    join: ChildJoinKind,
}

fn is_query(expr: &Expr) -> bool {
    match expr {
        Expr::Constant(c) => matches!(c.value, Value::Table(_)),
        other => other.query_method().is_some(),
    }
}

fn conjuncts(expr: &Expr, out: &mut Vec<Expr>) {
    match expr {
        Expr::Binary(BinaryExpr {
            op: BinaryOp::AndAlso,
            left,
            right,
            ..
        }) => {
            conjuncts(left, out);
            conjuncts(right, out);
        }
        other => out.push(other.clone()),
    }
}

fn and_all(predicates: Vec<Expr>) -> Option<Expr> {
    predicates.into_iter().reduce(and)
}

/// `a == b` with one side reading only `outer` and the other only `inner`.
fn is_key_equality(expr: &Expr, outer: &str, inner: &str) -> bool {
    let Expr::Binary(BinaryExpr {
        op: BinaryOp::Equal,
        left,
        right,
        ..
    }) = expr
    else {
        return false;
    };
    let side = |e: &Expr, own: &str, other: &str| e.references_parameter(own) && !e.references_parameter(other);
    (side(left, outer, inner) && side(right, inner, outer)) || (side(left, inner, outer) && side(right, outer, inner))
}

impl ChildJoinRewrite {
    fn classify(call: &MethodCall) -> Option<Plan> {
        if QueryMethod::from_call(call) != Some(QueryMethod::SelectMany) || !(2..=3).contains(&call.args.len()) {
            return None;
        }
        let source = call.args[0].clone();
        let result = call.args.get(2).cloned();
        let collection = call.args[1].as_lambda()?;
        let [outer] = collection.params.as_slice() else {
            return None;
        };
        let body = &*collection.body;
        if !body.references_parameter(&outer.name) {
            if !is_query(body) {
                return None;
            }
            debug!("SelectMany over an uncorrelated query becomes a cross join");
            return Some(Plan {
                source,
                child: body.clone(),
                condition: None,
                result,
                join: ChildJoinKind::Cross,
            });
        }

        let where_call = body.as_method_call()?;
        if QueryMethod::from_call(where_call) != Some(QueryMethod::Where) || where_call.args.len() != 2 {
            return None;
        }
        let filtered = &where_call.args[0];
        if filtered.references_parameter(&outer.name) || !is_query(filtered) {
            return None;
        }
        let predicate = where_call.args[1].as_lambda()?;
        let [inner] = predicate.params.as_slice() else {
            return None;
        };
        if inner.name == outer.name {
            return None;
        }
        let mut all = Vec::new();
        conjuncts(&predicate.body, &mut all);
        let (correlated, local): (Vec<Expr>, Vec<Expr>) =
            all.into_iter().partition(|c| c.references_parameter(&outer.name));
        if correlated.is_empty() || !correlated.iter().all(|c| is_key_equality(c, &outer.name, &inner.name)) {
            return None;
        }
        debug!(
            keys = correlated.len(),
            local = local.len(),
            "SelectMany over a key-correlated query becomes an inner join"
        );

        let child = match and_all(local) {
            Some(filter) => {
                let mut remaining = where_call.clone();
                remaining.args = vec![filtered.clone(), quote(lambda(&[inner], filter))];
                Expr::MethodCall(remaining)
            }
            None => filtered.clone(),
        };
        let condition = and_all(correlated).map(|c| quote(lambda(&[outer, inner], c)));
        Some(Plan {
            source,
            child,
            condition,
            result,
            join: ChildJoinKind::Inner,
        })
    }

    fn rewrite(expr: Expr) -> Expr {
        let Expr::MethodCall(call) = expr else {
            return expr;
        };
        match Self::classify(&call) {
            Some(plan) => Expr::ChildJoin(ChildJoinExpr {
                source: Box::new(plan.source),
                child: Box::new(plan.child),
                condition: plan.condition.map(Box::new),
                result: plan.result.map(Box::new),
                join: plan.join,
                ty: call.ty,
            }),
            None => Expr::MethodCall(call),
        }
    }
}

impl ExpressionPass for ChildJoinRewrite {
    fn name(&self) -> &str {
        "child_join_rewrite"
    }

    fn description(&self) -> &str {
        "Turns SelectMany over uncorrelated queries into joins"
    }

    fn transform(&self, expr: Expr) -> Result<Expr> {
        Ok(expr.transform_up(&mut |e| Ok(Self::rewrite(e)))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::build::*;
    use crate::testing;

    fn rewritten(q: Query) -> Expr {
        ChildJoinRewrite.transform(q.into_expr()).unwrap()
    }

    #[test]
    fn test_uncorrelated_collection_is_cross_join() {
        let q = Query::from("Student").select_many("x", TypeRef::entity("Course"), |_| {
            Query::from("Course").into_expr()
        });
        let Expr::ChildJoin(join) = rewritten(q) else {
            panic!("expected a child join");
        };
        assert_eq!(join.join, ChildJoinKind::Cross);
        assert!(join.condition.is_none());
    }

    #[test]
    fn test_key_correlated_filter_is_inner_join() {
        let q = Query::from("Student").select_many_with(
            ("x", "y"),
            TypeRef::entity("Enrollment"),
            |x| {
                Query::from("Enrollment")
                    .where_("e", |e| {
                        and(
                            eq(member(e.clone(), "StudentId"), member(x, "StudentId")),
                            gt(member(e, "Grade"), constant(2)),
                        )
                    })
                    .into_expr()
            },
            TypeRef::Anonymous,
            |x, y| new_anon(vec![("S", x), ("E", y)]),
        );
        let Expr::ChildJoin(join) = rewritten(q) else {
            panic!("expected a child join");
        };
        assert_eq!(join.join, ChildJoinKind::Inner);
        let condition = join.condition.as_ref().and_then(|c| c.as_lambda()).unwrap();
        assert_eq!(condition.params.len(), 2);
        assert_eq!(join.child.query_method(), Some(QueryMethod::Where));
        assert!(join.result.is_some());
    }

    #[test]
    fn test_non_equality_correlation_is_left_alone() {
        let q = Query::from("Student").select_many("x", TypeRef::entity("Enrollment"), |x| {
            Query::from("Enrollment")
                .where_("e", |e| gt(member(e, "StudentId"), member(x, "StudentId")))
                .into_expr()
        });
        let expr = q.into_expr();
        let out = ChildJoinRewrite.transform(expr.clone()).unwrap();
        assert_eq!(out, expr);
    }

    fn enrollments_of(x: Expr, filter: impl FnOnce(Expr, Expr) -> Expr) -> Query {
        Query::from("Enrollment").where_("e", |e| filter(e, x))
    }

    #[test]
    fn test_top_level_or_stays_apply() {
        let q = Query::from("Student").select_many("x", TypeRef::entity("Enrollment"), |x| {
            enrollments_of(x, |e, x| {
                or(
                    eq(member(e.clone(), "StudentId"), member(x, "StudentId")),
                    gt(member(e, "Grade"), constant(2)),
                )
            })
            .into_expr()
        });
        let expr = q.into_expr();
        assert_eq!(ChildJoinRewrite.transform(expr.clone()).unwrap(), expr);
        let sql = testing::sqlserver(&expr);
        assert!(sql.contains("CROSS APPLY (SELECT "), "{sql}");
        assert!(sql.contains(" OR "), "{sql}");
    }

    #[test]
    fn test_outer_parameter_in_projection_stays_apply() {
        let q = Query::from("Student").select_many("x", TypeRef::Anonymous, |x| {
            let name = member(x.clone(), "Name");
            enrollments_of(x, |e, x| eq(member(e, "StudentId"), member(x, "StudentId")))
                .select("e", TypeRef::Anonymous, |e| {
                    new_anon(vec![("Grade", member(e, "Grade")), ("Student", name)])
                })
                .into_expr()
        });
        let expr = q.into_expr();
        assert_eq!(ChildJoinRewrite.transform(expr.clone()).unwrap(), expr);
        let sql = testing::sqlserver(&expr);
        assert!(sql.contains("CROSS APPLY (SELECT "), "{sql}");
        assert!(!sql.contains("INNER JOIN"), "{sql}");
    }

    #[test]
    fn test_navigation_collection_is_left_alone() {
        let q = Query::from("Employee").select_many("x", TypeRef::entity("EmployeeDegree"), |x| {
            nav(x, "NavDegrees", TypeRef::enumerable(TypeRef::entity("EmployeeDegree")))
        });
        let expr = q.into_expr();
        assert_eq!(ChildJoinRewrite.transform(expr.clone()).unwrap(), expr);
    }
}

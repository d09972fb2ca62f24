//! Builder DSL for expression trees.
//!
//! Free functions build individual nodes; [`Query`] chains operator calls
//! with correctly typed lambda parameters:
//!
//! ```
//! use linqsql::expr::build::*;
//!
//! let q = Query::from("Student")
//!     .where_("x", |x| eq(member(x, "StudentId"), constant("123")))
//!     .select("x", TypeRef::Anonymous, |x| {
//!         new_anon(vec![("StudentId", member(x.clone(), "StudentId")), ("Name", member(x, "Name"))])
//!     })
//!     .into_expr();
//! assert!(q.query_method().is_some());
//! ```

use super::methods::{ENUMERABLE, QUERYABLE, QUERY_EXTENSIONS};
use super::*;

pub use super::TypeRef;

pub fn param(name: &str, ty: TypeRef) -> ParamRef {
    ParamRef {
        name: name.to_string(),
        ty,
    }
}

/// Reference to a lambda parameter.
pub fn p(param: &ParamRef) -> Expr {
    Expr::Parameter(param.clone())
}

pub fn lambda(params: &[&ParamRef], body: Expr) -> Expr {
    Expr::Lambda(Lambda {
        params: params.iter().map(|p| (*p).clone()).collect(),
        body: Box::new(body),
    })
}

pub fn quote(e: Expr) -> Expr {
    Expr::Unary(UnaryExpr {
        op: UnaryOp::Quote,
        operand: Box::new(e),
        ty: TypeRef::Unknown,
    })
}

pub fn member(target: Expr, name: &str) -> Expr {
    member_typed(target, name, TypeRef::Unknown)
}

pub fn member_typed(target: Expr, name: &str, ty: TypeRef) -> Expr {
    Expr::Member(MemberAccess {
        target: Some(Box::new(target)),
        member: name.to_string(),
        ty,
    })
}

/// Static member such as `DateTime.Now`.
pub fn static_member(name: &str, ty: TypeRef) -> Expr {
    Expr::Member(MemberAccess {
        target: None,
        member: name.to_string(),
        ty,
    })
}

pub fn constant(v: impl Into<Value>) -> Expr {
    let value = v.into();
    let ty = value.type_ref();
    Expr::Constant(ConstantExpr { value, ty })
}

pub fn null() -> Expr {
    Expr::null()
}

/// A value captured from the caller's scope.
pub fn variable(name: &str, v: impl Into<Value>) -> Expr {
    let value = v.into();
    let ty = value.type_ref();
    Expr::Variable(VariableExpr {
        name: name.to_string(),
        value,
        ty,
    })
}

pub fn table(entity: &str) -> Expr {
    constant(Value::Table(entity.to_string()))
}

pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    let ty = match op {
        BinaryOp::Equal
        | BinaryOp::NotEqual
        | BinaryOp::LessThan
        | BinaryOp::LessThanOrEqual
        | BinaryOp::GreaterThan
        | BinaryOp::GreaterThanOrEqual
        | BinaryOp::AndAlso
        | BinaryOp::OrElse => TypeRef::Bool,
        _ => match left.ty() {
            TypeRef::Unknown => right.ty().clone(),
            ty => ty.clone(),
        },
    };
    binary_typed(op, left, right, ty)
}

pub fn binary_typed(op: BinaryOp, left: Expr, right: Expr, ty: TypeRef) -> Expr {
    Expr::Binary(BinaryExpr {
        op,
        left: Box::new(left),
        right: Box::new(right),
        ty,
    })
}

pub fn eq(l: Expr, r: Expr) -> Expr {
    binary(BinaryOp::Equal, l, r)
}

pub fn ne(l: Expr, r: Expr) -> Expr {
    binary(BinaryOp::NotEqual, l, r)
}

pub fn gt(l: Expr, r: Expr) -> Expr {
    binary(BinaryOp::GreaterThan, l, r)
}

pub fn ge(l: Expr, r: Expr) -> Expr {
    binary(BinaryOp::GreaterThanOrEqual, l, r)
}

pub fn lt(l: Expr, r: Expr) -> Expr {
    binary(BinaryOp::LessThan, l, r)
}

pub fn le(l: Expr, r: Expr) -> Expr {
    binary(BinaryOp::LessThanOrEqual, l, r)
}

pub fn and(l: Expr, r: Expr) -> Expr {
    binary(BinaryOp::AndAlso, l, r)
}

pub fn or(l: Expr, r: Expr) -> Expr {
    binary(BinaryOp::OrElse, l, r)
}

pub fn add(l: Expr, r: Expr) -> Expr {
    binary(BinaryOp::Add, l, r)
}

pub fn sub(l: Expr, r: Expr) -> Expr {
    binary(BinaryOp::Subtract, l, r)
}

pub fn mul(l: Expr, r: Expr) -> Expr {
    binary(BinaryOp::Multiply, l, r)
}

pub fn coalesce(l: Expr, r: Expr) -> Expr {
    binary(BinaryOp::Coalesce, l, r)
}

pub fn not(e: Expr) -> Expr {
    Expr::Unary(UnaryExpr {
        op: UnaryOp::Not,
        operand: Box::new(e),
        ty: TypeRef::Bool,
    })
}

pub fn negate(e: Expr) -> Expr {
    let ty = e.ty().clone();
    Expr::Unary(UnaryExpr {
        op: UnaryOp::Negate,
        operand: Box::new(e),
        ty,
    })
}

pub fn convert(e: Expr, ty: TypeRef) -> Expr {
    Expr::Unary(UnaryExpr {
        op: UnaryOp::Convert,
        operand: Box::new(e),
        ty,
    })
}

pub fn conditional(test: Expr, if_true: Expr, if_false: Expr) -> Expr {
    let ty = if_true.ty().clone();
    Expr::Conditional(ConditionalExpr {
        test: Box::new(test),
        if_true: Box::new(if_true),
        if_false: Box::new(if_false),
        ty,
    })
}

/// Anonymous object `new { A = .., B = .. }`.
pub fn new_anon(members: Vec<(&str, Expr)>) -> Expr {
    new_typed(TypeRef::Anonymous, members)
}

/// Member-init of a named entity, as used by `Update` assignments.
pub fn new_entity(entity: &str, members: Vec<(&str, Expr)>) -> Expr {
    new_typed(TypeRef::entity(entity), members)
}

pub fn new_typed(ty: TypeRef, members: Vec<(&str, Expr)>) -> Expr {
    Expr::New(NewExpr {
        ty,
        members: members
            .into_iter()
            .map(|(member, value)| MemberBinding {
                member: member.to_string(),
                value,
            })
            .collect(),
    })
}

pub fn new_array(element: TypeRef, items: Vec<Expr>) -> Expr {
    Expr::NewArray(NewArrayExpr { element, items })
}

/// Navigation-property access, `source.Name()`.
pub fn nav(source: Expr, name: &str, ty: TypeRef) -> Expr {
    Expr::Navigation(NavigationExpr {
        source: Box::new(source),
        navigation: name.to_string(),
        ty,
    })
}

pub fn call(declaring: &str, name: &str, args: Vec<Expr>, ty: TypeRef) -> Expr {
    Expr::MethodCall(MethodCall {
        method: MethodId {
            declaring_type: declaring.to_string(),
            name: name.to_string(),
            generic_args: Vec::new(),
        },
        instance: None,
        args,
        ty,
    })
}

pub fn call_instance(declaring: &str, name: &str, instance: Expr, args: Vec<Expr>, ty: TypeRef) -> Expr {
    Expr::MethodCall(MethodCall {
        method: MethodId {
            declaring_type: declaring.to_string(),
            name: name.to_string(),
            generic_args: Vec::new(),
        },
        instance: Some(Box::new(instance)),
        args,
        ty,
    })
}

pub fn in_values(item: Expr, values: Expr, negated: bool) -> Expr {
    Expr::InValues(InValuesExpr {
        item: Box::new(item),
        values: Box::new(values),
        negated,
    })
}

/// `Enumerable.Contains(collection, item)`.
pub fn contains(collection: Expr, item: Expr) -> Expr {
    call(ENUMERABLE, "Contains", vec![collection, item], TypeRef::Bool)
}

fn seq_call(name: &str, source: Expr, selector: Option<Expr>, ty: TypeRef) -> Expr {
    let mut args = vec![source];
    args.extend(selector);
    call(ENUMERABLE, name, args, ty)
}

/// `seq.Count()` over a grouping or an in-memory sequence.
pub fn count(seq: Expr) -> Expr {
    seq_call("Count", seq, None, TypeRef::Int)
}

pub fn count_where(seq: Expr, x: &ParamRef, pred: Expr) -> Expr {
    seq_call("Count", seq, Some(lambda(&[x], pred)), TypeRef::Int)
}

pub fn sum(seq: Expr, x: &ParamRef, selector: Expr) -> Expr {
    let ty = selector.ty().clone();
    seq_call("Sum", seq, Some(lambda(&[x], selector)), ty)
}

pub fn max(seq: Expr, x: &ParamRef, selector: Expr) -> Expr {
    let ty = selector.ty().clone();
    seq_call("Max", seq, Some(lambda(&[x], selector)), ty)
}

pub fn min(seq: Expr, x: &ParamRef, selector: Expr) -> Expr {
    let ty = selector.ty().clone();
    seq_call("Min", seq, Some(lambda(&[x], selector)), ty)
}

pub fn average(seq: Expr, x: &ParamRef, selector: Expr) -> Expr {
    seq_call("Average", seq, Some(lambda(&[x], selector)), TypeRef::Double)
}

/// A typed query under construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    expr: Expr,
    element: TypeRef,
}

impl Query {
    /// Root over the entity's table.
    pub fn from(entity: &str) -> Self {
        Self {
            expr: table(entity),
            element: TypeRef::entity(entity),
        }
    }

    /// `provider.DataSet<T>()` style root whose provider argument carries no
    /// information.
    pub fn data_set(entity: &str) -> Self {
        let provider = Expr::Constant(ConstantExpr {
            value: Value::Null,
            ty: TypeRef::Object("IQueryProvider".into()),
        });
        let call = MethodCall {
            method: MethodId {
                declaring_type: QUERY_EXTENSIONS.to_string(),
                name: "DataSet".to_string(),
                generic_args: vec![TypeRef::entity(entity)],
            },
            instance: None,
            args: vec![provider],
            ty: TypeRef::queryable(TypeRef::entity(entity)),
        };
        Self {
            expr: Expr::MethodCall(call),
            element: TypeRef::entity(entity),
        }
    }

    pub fn new(expr: Expr, element: TypeRef) -> Self {
        Self { expr, element }
    }

    pub fn element(&self) -> &TypeRef {
        &self.element
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    pub fn into_expr(self) -> Expr {
        self.expr
    }

    pub fn ty(&self) -> TypeRef {
        TypeRef::queryable(self.element.clone())
    }

    /// A parameter typed as this query's element.
    pub fn param(&self, name: &str) -> ParamRef {
        param(name, self.element.clone())
    }

    fn chain(self, declaring: &str, name: &str, mut rest: Vec<Expr>, element: TypeRef) -> Query {
        let mut args = vec![self.expr];
        args.append(&mut rest);
        let expr = call(declaring, name, args, TypeRef::queryable(element.clone()));
        Query { expr, element }
    }

    fn op(self, name: &str, rest: Vec<Expr>, element: TypeRef) -> Query {
        self.chain(QUERYABLE, name, rest, element)
    }

    fn ext(self, name: &str, rest: Vec<Expr>, element: TypeRef) -> Query {
        self.chain(QUERY_EXTENSIONS, name, rest, element)
    }

    fn terminal(self, name: &str, rest: Vec<Expr>, ty: TypeRef) -> Expr {
        let mut args = vec![self.expr];
        args.extend(rest);
        call(QUERYABLE, name, args, ty)
    }

    fn unary_lambda(&self, name: &str, body: impl FnOnce(Expr) -> Expr) -> Expr {
        let x = self.param(name);
        quote(lambda(&[&x], body(p(&x))))
    }

    fn pair_lambda(a: ParamRef, b: ParamRef, body: impl FnOnce(Expr, Expr) -> Expr) -> Expr {
        let out = body(p(&a), p(&b));
        quote(lambda(&[&a, &b], out))
    }

    pub fn where_(self, name: &str, pred: impl FnOnce(Expr) -> Expr) -> Query {
        let l = self.unary_lambda(name, pred);
        let element = self.element.clone();
        self.op("Where", vec![l], element)
    }

    pub fn select(self, name: &str, result: TypeRef, body: impl FnOnce(Expr) -> Expr) -> Query {
        let l = self.unary_lambda(name, body);
        self.op("Select", vec![l], result)
    }

    /// `SelectMany(x => collection)`; `element` is the collection's element.
    pub fn select_many(self, name: &str, element: TypeRef, collection: impl FnOnce(Expr) -> Expr) -> Query {
        let l = self.unary_lambda(name, collection);
        self.op("SelectMany", vec![l], element)
    }

    /// `SelectMany(x => collection, (x, y) => result)`.
    pub fn select_many_with(
        self,
        names: (&str, &str),
        collection_element: TypeRef,
        collection: impl FnOnce(Expr) -> Expr,
        result_ty: TypeRef,
        result: impl FnOnce(Expr, Expr) -> Expr,
    ) -> Query {
        let coll = self.unary_lambda(names.0, collection);
        let res = Self::pair_lambda(self.param(names.0), param(names.1, collection_element), result);
        self.op("SelectMany", vec![coll, res], result_ty)
    }

    pub fn order_by(self, name: &str, key: impl FnOnce(Expr) -> Expr) -> Query {
        self.ordering("OrderBy", name, key)
    }

    pub fn order_by_desc(self, name: &str, key: impl FnOnce(Expr) -> Expr) -> Query {
        self.ordering("OrderByDescending", name, key)
    }

    pub fn then_by(self, name: &str, key: impl FnOnce(Expr) -> Expr) -> Query {
        self.ordering("ThenBy", name, key)
    }

    pub fn then_by_desc(self, name: &str, key: impl FnOnce(Expr) -> Expr) -> Query {
        self.ordering("ThenByDescending", name, key)
    }

    fn ordering(self, method: &str, name: &str, key: impl FnOnce(Expr) -> Expr) -> Query {
        let l = self.unary_lambda(name, key);
        let element = self.element.clone();
        self.op(method, vec![l], element)
    }

    pub fn take(self, n: i64) -> Query {
        self.take_expr(constant(n))
    }

    pub fn take_expr(self, n: Expr) -> Query {
        let element = self.element.clone();
        self.op("Take", vec![n], element)
    }

    pub fn skip(self, n: i64) -> Query {
        let element = self.element.clone();
        self.op("Skip", vec![constant(n)], element)
    }

    /// One-based page number and page size.
    pub fn paging(self, page: i64, size: i64) -> Query {
        let element = self.element.clone();
        self.ext("Paging", vec![constant(page), constant(size)], element)
    }

    pub fn distinct(self) -> Query {
        let element = self.element.clone();
        self.op("Distinct", vec![], element)
    }

    pub fn default_if_empty(self) -> Query {
        let element = self.element.clone();
        self.op("DefaultIfEmpty", vec![], element)
    }

    pub fn group_by(self, name: &str, key_ty: TypeRef, key: impl FnOnce(Expr) -> Expr) -> Query {
        let l = self.unary_lambda(name, key);
        let element = TypeRef::grouping(key_ty, self.element.clone());
        self.op("GroupBy", vec![l], element)
    }

    pub fn group_by_element(
        self,
        name: &str,
        key_ty: TypeRef,
        key: impl FnOnce(Expr) -> Expr,
        element_ty: TypeRef,
        element: impl FnOnce(Expr) -> Expr,
    ) -> Query {
        let k = self.unary_lambda(name, key);
        let e = self.unary_lambda(name, element);
        self.op("GroupBy", vec![k, e], TypeRef::grouping(key_ty, element_ty))
    }

    /// Equi-join; outer parameter is `o`, inner is `i`.
    pub fn join(
        self,
        inner: Query,
        outer_key: impl FnOnce(Expr) -> Expr,
        inner_key: impl FnOnce(Expr) -> Expr,
        result_ty: TypeRef,
        result: impl FnOnce(Expr, Expr) -> Expr,
    ) -> Query {
        let ok = self.unary_lambda("o", outer_key);
        let ik = inner.unary_lambda("i", inner_key);
        let res = Self::pair_lambda(self.param("o"), inner.param("i"), result);
        self.op("Join", vec![inner.expr, ok, ik, res], result_ty)
    }

    /// Group join; the result selector receives the outer row and the
    /// matching inner rows.
    pub fn group_join(
        self,
        inner: Query,
        outer_key: impl FnOnce(Expr) -> Expr,
        inner_key: impl FnOnce(Expr) -> Expr,
        result_ty: TypeRef,
        result: impl FnOnce(Expr, Expr) -> Expr,
    ) -> Query {
        let ok = self.unary_lambda("o", outer_key);
        let ik = inner.unary_lambda("i", inner_key);
        let items = param("items", TypeRef::enumerable(inner.element.clone()));
        let res = Self::pair_lambda(self.param("o"), items, result);
        self.op("GroupJoin", vec![inner.expr, ok, ik, res], result_ty)
    }

    /// `InnerJoin(other, (a, b) => shape, n => condition)`.
    pub fn inner_join(
        self,
        other: Query,
        shape_ty: TypeRef,
        shape: impl FnOnce(Expr, Expr) -> Expr,
        condition: impl FnOnce(Expr) -> Expr,
    ) -> Query {
        self.explicit_join("InnerJoin", other, shape_ty, shape, condition)
    }

    pub fn left_join(
        self,
        other: Query,
        shape_ty: TypeRef,
        shape: impl FnOnce(Expr, Expr) -> Expr,
        condition: impl FnOnce(Expr) -> Expr,
    ) -> Query {
        self.explicit_join("LeftJoin", other, shape_ty, shape, condition)
    }

    pub fn right_join(
        self,
        other: Query,
        shape_ty: TypeRef,
        shape: impl FnOnce(Expr, Expr) -> Expr,
        condition: impl FnOnce(Expr) -> Expr,
    ) -> Query {
        self.explicit_join("RightJoin", other, shape_ty, shape, condition)
    }

    pub fn full_outer_join(
        self,
        other: Query,
        shape_ty: TypeRef,
        shape: impl FnOnce(Expr, Expr) -> Expr,
        condition: impl FnOnce(Expr) -> Expr,
    ) -> Query {
        self.explicit_join("FullOuterJoin", other, shape_ty, shape, condition)
    }

    fn explicit_join(
        self,
        method: &str,
        other: Query,
        shape_ty: TypeRef,
        shape: impl FnOnce(Expr, Expr) -> Expr,
        condition: impl FnOnce(Expr) -> Expr,
    ) -> Query {
        let s = Self::pair_lambda(self.param("a"), other.param("b"), shape);
        let n = param("n", shape_ty.clone());
        let c = quote(lambda(&[&n], condition(p(&n))));
        self.ext(method, vec![other.expr, s, c], shape_ty)
    }

    pub fn cross_join(self, other: Query, shape_ty: TypeRef, shape: impl FnOnce(Expr, Expr) -> Expr) -> Query {
        let s = Self::pair_lambda(self.param("a"), other.param("b"), shape);
        self.ext("CrossJoin", vec![other.expr, s], shape_ty)
    }

    /// `CrossApply(a => correlated, (a, b) => shape)`.
    pub fn cross_apply(
        self,
        correlated: impl FnOnce(Expr) -> Query,
        shape_ty: TypeRef,
        shape: impl FnOnce(Expr, Expr) -> Expr,
    ) -> Query {
        self.apply("CrossApply", correlated, shape_ty, shape)
    }

    pub fn outer_apply(
        self,
        correlated: impl FnOnce(Expr) -> Query,
        shape_ty: TypeRef,
        shape: impl FnOnce(Expr, Expr) -> Expr,
    ) -> Query {
        self.apply("OuterApply", correlated, shape_ty, shape)
    }

    fn apply(
        self,
        method: &str,
        correlated: impl FnOnce(Expr) -> Query,
        shape_ty: TypeRef,
        shape: impl FnOnce(Expr, Expr) -> Expr,
    ) -> Query {
        let a = self.param("a");
        let inner = correlated(p(&a));
        let b = inner.param("b");
        let c = quote(lambda(&[&a], inner.expr));
        let s = Self::pair_lambda(self.param("a"), b, shape);
        self.ext(method, vec![c, s], shape_ty)
    }

    pub fn union(self, other: Query) -> Query {
        let element = self.element.clone();
        self.op("Union", vec![other.expr], element)
    }

    pub fn union_all(self, other: Query) -> Query {
        let element = self.element.clone();
        self.op("Concat", vec![other.expr], element)
    }

    /// Recursive union; `body` receives the anchor as a query parameter.
    pub fn recursive_union(self, name: &str, body: impl FnOnce(Query) -> Query) -> Query {
        let a = param(name, self.ty());
        let recursive = body(Query::new(p(&a), self.element.clone()));
        let l = quote(lambda(&[&a], recursive.expr));
        let element = self.element.clone();
        self.ext("RecursiveUnion", vec![l], element)
    }

    pub fn count(self) -> Expr {
        self.terminal("Count", vec![], TypeRef::Int)
    }

    pub fn count_where(self, name: &str, pred: impl FnOnce(Expr) -> Expr) -> Expr {
        let l = self.unary_lambda(name, pred);
        self.terminal("Count", vec![l], TypeRef::Int)
    }

    pub fn sum(self, name: &str, ty: TypeRef, selector: impl FnOnce(Expr) -> Expr) -> Expr {
        let l = self.unary_lambda(name, selector);
        self.terminal("Sum", vec![l], ty)
    }

    pub fn max(self, name: &str, ty: TypeRef, selector: impl FnOnce(Expr) -> Expr) -> Expr {
        let l = self.unary_lambda(name, selector);
        self.terminal("Max", vec![l], ty)
    }

    pub fn any(self) -> Expr {
        self.terminal("Any", vec![], TypeRef::Bool)
    }

    pub fn any_where(self, name: &str, pred: impl FnOnce(Expr) -> Expr) -> Expr {
        let l = self.unary_lambda(name, pred);
        self.terminal("Any", vec![l], TypeRef::Bool)
    }

    pub fn all(self, name: &str, pred: impl FnOnce(Expr) -> Expr) -> Expr {
        let l = self.unary_lambda(name, pred);
        self.terminal("All", vec![l], TypeRef::Bool)
    }

    pub fn first(self) -> Expr {
        let element = self.element.clone();
        self.terminal("First", vec![], element)
    }

    pub fn first_where(self, name: &str, pred: impl FnOnce(Expr) -> Expr) -> Expr {
        let l = self.unary_lambda(name, pred);
        let element = self.element.clone();
        self.terminal("FirstOrDefault", vec![l], element)
    }

    /// `Update(x => target, x => new T { .. })`.
    pub fn update(
        self,
        name: &str,
        target: impl FnOnce(Expr) -> Expr,
        assignments: impl FnOnce(Expr) -> Expr,
    ) -> Expr {
        let t = self.unary_lambda(name, target);
        let a = self.unary_lambda(name, assignments);
        call(QUERY_EXTENSIONS, "Update", vec![self.expr, t, a], TypeRef::Int)
    }

    /// Deletes rows of the query's root table.
    pub fn delete(self) -> Expr {
        call(QUERY_EXTENSIONS, "Delete", vec![self.expr], TypeRef::Int)
    }

    /// Deletes rows of the table selected by `target`.
    pub fn delete_target(self, name: &str, target: impl FnOnce(Expr) -> Expr) -> Expr {
        let t = self.unary_lambda(name, target);
        call(QUERY_EXTENSIONS, "Delete", vec![self.expr, t], TypeRef::Int)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_by_changes_element_to_grouping() {
        let q = Query::from("Student").group_by("x", TypeRef::Int, |x| member(x, "Age"));
        assert!(q.element().is_grouping());
    }

    #[test]
    fn test_join_lambdas_carry_element_types() {
        let q = Query::from("Student").join(
            Query::from("Enrollment"),
            |o| member(o, "StudentId"),
            |i| member(i, "StudentId"),
            TypeRef::Anonymous,
            |o, i| new_anon(vec![("S", o), ("E", i)]),
        );
        let call = q.expr().as_method_call().unwrap();
        assert_eq!(call.args.len(), 5);
        let res = call.args[4].as_lambda().unwrap();
        assert_eq!(res.params[0].ty, TypeRef::entity("Student"));
        assert_eq!(res.params[1].ty, TypeRef::entity("Enrollment"));
    }

    #[test]
    fn test_data_set_root_carries_generic_argument() {
        let q = Query::data_set("Student").into_expr();
        let call = q.as_method_call().unwrap();
        assert_eq!(call.method.generic_args, vec![TypeRef::entity("Student")]);
    }
}

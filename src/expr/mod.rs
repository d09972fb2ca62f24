//! Input expression trees.
//!
//! A query arrives as a tree of [`Expr`] nodes describing a chain of query
//! operator calls whose arguments are lambdas, member accesses, constants
//! and captured variables. The model is closed (one enum) and serializable so
//! the CLI can read it from JSON; programmatic callers use [`build`].

pub mod build;
pub mod methods;

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use methods::QueryMethod;

/// A node in the input expression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expr {
    MethodCall(MethodCall),
    Member(MemberAccess),
    Binary(BinaryExpr),
    Unary(UnaryExpr),
    Conditional(ConditionalExpr),
    Constant(ConstantExpr),
    /// A captured variable from the caller's scope.
    Variable(VariableExpr),
    Parameter(ParamRef),
    Lambda(Lambda),
    /// Object construction with member bindings (anonymous or named type).
    New(NewExpr),
    NewArray(NewArrayExpr),
    /// Navigation-property access, `x.NavDepartment()`.
    Navigation(NavigationExpr),
    /// Join marker produced by the child-join rewrite.
    ChildJoin(ChildJoinExpr),
    /// Membership test produced by the `Contains` rewrite.
    InValues(InValuesExpr),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodId {
    pub declaring_type: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub generic_args: Vec<TypeRef>,
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.declaring_type, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodCall {
    pub method: MethodId,
    /// Receiver for instance methods; `None` for static and extension calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<Box<Expr>>,
    #[serde(default)]
    pub args: Vec<Expr>,
    #[serde(default)]
    pub ty: TypeRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberAccess {
    /// `None` for static members such as `DateTime.Now`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Box<Expr>>,
    pub member: String,
    #[serde(default)]
    pub ty: TypeRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    AndAlso,
    OrElse,
    And,
    Or,
    ExclusiveOr,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Coalesce,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::LessThan => "<",
            BinaryOp::LessThanOrEqual => "<=",
            BinaryOp::GreaterThan => ">",
            BinaryOp::GreaterThanOrEqual => ">=",
            BinaryOp::AndAlso => "&&",
            BinaryOp::OrElse => "||",
            BinaryOp::And => "&",
            BinaryOp::Or => "|",
            BinaryOp::ExclusiveOr => "^",
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::Coalesce => "??",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryExpr {
    pub op: BinaryOp,
    pub left: Box<Expr>,
    pub right: Box<Expr>,
    #[serde(default)]
    pub ty: TypeRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Not,
    Negate,
    /// Type conversion; `ty` on the node is the target type.
    Convert,
    /// Marks a lambda passed as an expression argument.
    Quote,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnaryExpr {
    pub op: UnaryOp,
    pub operand: Box<Expr>,
    #[serde(default)]
    pub ty: TypeRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalExpr {
    pub test: Box<Expr>,
    pub if_true: Box<Expr>,
    pub if_false: Box<Expr>,
    #[serde(default)]
    pub ty: TypeRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstantExpr {
    pub value: Value,
    #[serde(default)]
    pub ty: TypeRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableExpr {
    pub name: String,
    pub value: Value,
    #[serde(default)]
    pub ty: TypeRef,
}

/// A lambda parameter. Parameters are identified by name; an inner lambda
/// reusing a name shadows the outer binding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParamRef {
    pub name: String,
    #[serde(default)]
    pub ty: TypeRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lambda {
    pub params: Vec<ParamRef>,
    pub body: Box<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberBinding {
    pub member: String,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewExpr {
    pub ty: TypeRef,
    pub members: Vec<MemberBinding>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewArrayExpr {
    pub element: TypeRef,
    pub items: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationExpr {
    pub source: Box<Expr>,
    pub navigation: String,
    #[serde(default)]
    pub ty: TypeRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChildJoinKind {
    Inner,
    Cross,
}

/// `source` joined with an uncorrelated `child` query.
///
/// `condition` is a two-parameter lambda `(outer, inner) => predicate`,
/// present for inner joins. `result` is the optional two-parameter result
/// selector carried over from `SelectMany`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildJoinExpr {
    pub source: Box<Expr>,
    pub child: Box<Expr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Box<Expr>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Box<Expr>>,
    pub join: ChildJoinKind,
    #[serde(default)]
    pub ty: TypeRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InValuesExpr {
    pub item: Box<Expr>,
    pub values: Box<Expr>,
    #[serde(default)]
    pub negated: bool,
}

/// Static type information carried by the expression tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeRef {
    #[default]
    Unknown,
    Bool,
    Int,
    Long,
    Decimal,
    Double,
    String,
    DateTime,
    Guid,
    Entity(String),
    /// Compiler-generated anonymous type.
    Anonymous,
    /// Any other named type (query providers, DTOs).
    Object(String),
    Queryable(Box<TypeRef>),
    Enumerable(Box<TypeRef>),
    /// `(key, element)`
    Grouping(Box<TypeRef>, Box<TypeRef>),
    Nullable(Box<TypeRef>),
    Array(Box<TypeRef>),
}

impl TypeRef {
    pub fn entity(name: impl Into<String>) -> Self {
        TypeRef::Entity(name.into())
    }

    pub fn queryable(element: TypeRef) -> Self {
        TypeRef::Queryable(Box::new(element))
    }

    pub fn enumerable(element: TypeRef) -> Self {
        TypeRef::Enumerable(Box::new(element))
    }

    pub fn grouping(key: TypeRef, element: TypeRef) -> Self {
        TypeRef::Grouping(Box::new(key), Box::new(element))
    }

    pub fn nullable(inner: TypeRef) -> Self {
        TypeRef::Nullable(Box::new(inner))
    }

    /// Strips one level of `Nullable`.
    pub fn underlying(&self) -> &TypeRef {
        match self {
            TypeRef::Nullable(inner) => inner,
            other => other,
        }
    }

    /// Element type of a sequence type.
    pub fn element_type(&self) -> Option<&TypeRef> {
        match self {
            TypeRef::Queryable(e) | TypeRef::Enumerable(e) | TypeRef::Array(e) => Some(e),
            TypeRef::Grouping(_, e) => Some(e),
            _ => None,
        }
    }

    pub fn is_sequence(&self) -> bool {
        self.element_type().is_some()
    }

    pub fn is_grouping(&self) -> bool {
        matches!(self, TypeRef::Grouping(..))
    }

    pub fn is_scalar(&self) -> bool {
        matches!(
            self.underlying(),
            TypeRef::Bool
                | TypeRef::Int
                | TypeRef::Long
                | TypeRef::Decimal
                | TypeRef::Double
                | TypeRef::String
                | TypeRef::DateTime
                | TypeRef::Guid
        )
    }

    pub fn entity_name(&self) -> Option<&str> {
        match self {
            TypeRef::Entity(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Unknown => f.write_str("?"),
            TypeRef::Bool => f.write_str("bool"),
            TypeRef::Int => f.write_str("int"),
            TypeRef::Long => f.write_str("long"),
            TypeRef::Decimal => f.write_str("decimal"),
            TypeRef::Double => f.write_str("double"),
            TypeRef::String => f.write_str("string"),
            TypeRef::DateTime => f.write_str("DateTime"),
            TypeRef::Guid => f.write_str("Guid"),
            TypeRef::Entity(name) | TypeRef::Object(name) => f.write_str(name),
            TypeRef::Anonymous => f.write_str("<anonymous>"),
            TypeRef::Queryable(e) => write!(f, "IQueryable<{e}>"),
            TypeRef::Enumerable(e) => write!(f, "IEnumerable<{e}>"),
            TypeRef::Grouping(k, e) => write!(f, "IGrouping<{k}, {e}>"),
            TypeRef::Nullable(e) => write!(f, "{e}?"),
            TypeRef::Array(e) => write!(f, "{e}[]"),
        }
    }
}

/// A constant or captured value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    DateTime(NaiveDateTime),
    List(Vec<Value>),
    Object(BTreeMap<String, Value>),
    /// A query root over the named entity.
    Table(String),
}

impl Value {
    pub fn type_ref(&self) -> TypeRef {
        match self {
            Value::Null => TypeRef::Unknown,
            Value::Bool(_) => TypeRef::Bool,
            Value::Int(_) => TypeRef::Int,
            Value::Float(_) => TypeRef::Double,
            Value::String(_) => TypeRef::String,
            Value::DateTime(_) => TypeRef::DateTime,
            Value::List(items) => TypeRef::Array(Box::new(
                items.first().map(Value::type_ref).unwrap_or_default(),
            )),
            Value::Object(_) => TypeRef::Anonymous,
            Value::Table(entity) => TypeRef::queryable(TypeRef::entity(entity.clone())),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::DateTime(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

static UNKNOWN: TypeRef = TypeRef::Unknown;
static BOOL: TypeRef = TypeRef::Bool;

impl Expr {
    /// Short node-kind name for diagnostics and converter frames.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Expr::MethodCall(_) => "method call",
            Expr::Member(_) => "member access",
            Expr::Binary(_) => "binary",
            Expr::Unary(_) => "unary",
            Expr::Conditional(_) => "conditional",
            Expr::Constant(_) => "constant",
            Expr::Variable(_) => "variable",
            Expr::Parameter(_) => "parameter",
            Expr::Lambda(_) => "lambda",
            Expr::New(_) => "new",
            Expr::NewArray(_) => "new array",
            Expr::Navigation(_) => "navigation",
            Expr::ChildJoin(_) => "child join",
            Expr::InValues(_) => "in values",
        }
    }

    pub fn ty(&self) -> &TypeRef {
        match self {
            Expr::MethodCall(c) => &c.ty,
            Expr::Member(m) => &m.ty,
            Expr::Binary(b) => &b.ty,
            Expr::Unary(u) => &u.ty,
            Expr::Conditional(c) => &c.ty,
            Expr::Constant(c) => &c.ty,
            Expr::Variable(v) => &v.ty,
            Expr::Parameter(p) => &p.ty,
            Expr::New(n) => &n.ty,
            Expr::Navigation(n) => &n.ty,
            Expr::ChildJoin(j) => &j.ty,
            Expr::InValues(_) => &BOOL,
            Expr::Lambda(_) | Expr::NewArray(_) => &UNKNOWN,
        }
    }

    /// Direct children in conversion order.
    ///
    /// Converters address their arguments by the index into this list, so
    /// the order is part of the contract: receiver before arguments, left
    /// before right, and for [`ChildJoinExpr`] source, child, then the
    /// optional condition and result lambdas when present.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::MethodCall(c) => c.instance.iter().map(|i| &**i).chain(c.args.iter()).collect(),
            Expr::Member(m) => m.target.iter().map(|t| &**t).collect(),
            Expr::Binary(b) => vec![&b.left, &b.right],
            Expr::Unary(u) => vec![&u.operand],
            Expr::Conditional(c) => vec![&c.test, &c.if_true, &c.if_false],
            Expr::Constant(_) | Expr::Variable(_) | Expr::Parameter(_) => Vec::new(),
            Expr::Lambda(l) => vec![&l.body],
            Expr::New(n) => n.members.iter().map(|m| &m.value).collect(),
            Expr::NewArray(a) => a.items.iter().collect(),
            Expr::Navigation(n) => vec![&n.source],
            Expr::ChildJoin(j) => {
                let mut out: Vec<&Expr> = vec![&j.source, &j.child];
                out.extend(j.condition.iter().map(|c| &**c));
                out.extend(j.result.iter().map(|r| &**r));
                out
            }
            Expr::InValues(v) => vec![&v.item, &v.values],
        }
    }

    /// The lambda under any number of `Quote` wrappers.
    pub fn as_lambda(&self) -> Option<&Lambda> {
        match self {
            Expr::Lambda(l) => Some(l),
            Expr::Unary(UnaryExpr {
                op: UnaryOp::Quote,
                operand,
                ..
            }) => operand.as_lambda(),
            _ => None,
        }
    }

    pub fn as_method_call(&self) -> Option<&MethodCall> {
        match self {
            Expr::MethodCall(c) => Some(c),
            _ => None,
        }
    }

    /// The query operator this node invokes, if any.
    pub fn query_method(&self) -> Option<QueryMethod> {
        self.as_method_call().and_then(QueryMethod::from_call)
    }

    /// Removes `Quote` wrappers.
    pub fn strip_quotes(self) -> Expr {
        match self {
            Expr::Unary(UnaryExpr {
                op: UnaryOp::Quote,
                operand,
                ..
            }) => operand.strip_quotes(),
            other => other,
        }
    }

    /// Pre-order walk over this node and all descendants.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Expr)) {
        f(self);
        for child in self.children() {
            child.walk(f);
        }
    }

    pub fn any(&self, pred: &mut impl FnMut(&Expr) -> bool) -> bool {
        let mut found = false;
        self.walk(&mut |e| {
            if !found && pred(e) {
                found = true;
            }
        });
        found
    }

    pub fn references_parameter(&self, name: &str) -> bool {
        self.any(&mut |e| matches!(e, Expr::Parameter(p) if p.name == name))
    }

    /// Rebuilds this node with every direct child replaced by `f(child)`.
    pub fn map_children(self, f: &mut impl FnMut(Expr) -> Result<Expr>) -> Result<Expr> {
        fn boxed(b: Box<Expr>, f: &mut impl FnMut(Expr) -> Result<Expr>) -> Result<Box<Expr>> {
            Ok(Box::new(f(*b)?))
        }
        Ok(match self {
            Expr::MethodCall(mut c) => {
                c.instance = c.instance.map(|i| boxed(i, f)).transpose()?;
                c.args = c.args.into_iter().map(&mut *f).collect::<Result<_>>()?;
                Expr::MethodCall(c)
            }
            Expr::Member(mut m) => {
                m.target = m.target.map(|t| boxed(t, f)).transpose()?;
                Expr::Member(m)
            }
            Expr::Binary(mut b) => {
                b.left = boxed(b.left, f)?;
                b.right = boxed(b.right, f)?;
                Expr::Binary(b)
            }
            Expr::Unary(mut u) => {
                u.operand = boxed(u.operand, f)?;
                Expr::Unary(u)
            }
            Expr::Conditional(mut c) => {
                c.test = boxed(c.test, f)?;
                c.if_true = boxed(c.if_true, f)?;
                c.if_false = boxed(c.if_false, f)?;
                Expr::Conditional(c)
            }
            leaf @ (Expr::Constant(_) | Expr::Variable(_) | Expr::Parameter(_)) => leaf,
            Expr::Lambda(mut l) => {
                l.body = boxed(l.body, f)?;
                Expr::Lambda(l)
            }
            Expr::New(mut n) => {
                for binding in &mut n.members {
                    let value = std::mem::replace(&mut binding.value, Expr::null());
                    binding.value = f(value)?;
                }
                Expr::New(n)
            }
            Expr::NewArray(mut a) => {
                a.items = a.items.into_iter().map(&mut *f).collect::<Result<_>>()?;
                Expr::NewArray(a)
            }
            Expr::Navigation(mut n) => {
                n.source = boxed(n.source, f)?;
                Expr::Navigation(n)
            }
            Expr::ChildJoin(mut j) => {
                j.source = boxed(j.source, f)?;
                j.child = boxed(j.child, f)?;
                j.condition = j.condition.map(|c| boxed(c, f)).transpose()?;
                j.result = j.result.map(|r| boxed(r, f)).transpose()?;
                Expr::ChildJoin(j)
            }
            Expr::InValues(mut v) => {
                v.item = boxed(v.item, f)?;
                v.values = boxed(v.values, f)?;
                Expr::InValues(v)
            }
        })
    }

    /// Bottom-up rewrite: children first, then `f` on the rebuilt node.
    pub fn transform_up(self, f: &mut impl FnMut(Expr) -> Result<Expr>) -> Result<Expr> {
        let rebuilt = self.map_children(&mut |child| child.transform_up(f))?;
        f(rebuilt)
    }

    pub fn null() -> Expr {
        Expr::Constant(ConstantExpr {
            value: Value::Null,
            ty: TypeRef::Unknown,
        })
    }

    pub fn is_null_constant(&self) -> bool {
        matches!(
            self,
            Expr::Constant(ConstantExpr {
                value: Value::Null,
                ..
            })
        )
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::MethodCall(c) => write!(f, "{}(..)", c.method),
            Expr::Member(m) => write!(f, ".{}", m.member),
            Expr::Binary(b) => write!(f, "binary '{}'", b.op),
            Expr::Unary(u) => write!(f, "unary {:?}", u.op),
            Expr::Parameter(p) => write!(f, "parameter '{}'", p.name),
            Expr::Variable(v) => write!(f, "variable '{}'", v.name),
            Expr::Navigation(n) => write!(f, "navigation '{}'", n.navigation),
            other => f.write_str(other.kind_name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::build::*;
    use super::*;

    #[test]
    fn test_children_order_puts_receiver_first() {
        let s = param("s", TypeRef::String);
        let call = call_instance(
            "String",
            "StartsWith",
            p(&s),
            vec![constant("ab")],
            TypeRef::Bool,
        );
        let kids = call.children();
        assert_eq!(kids.len(), 2);
        assert!(matches!(kids[0], Expr::Parameter(_)));
        assert!(matches!(kids[1], Expr::Constant(_)));
    }

    #[test]
    fn test_references_parameter_sees_nested_lambdas() {
        let x = param("x", TypeRef::entity("Student"));
        let y = param("y", TypeRef::entity("Course"));
        let body = eq(member(p(&x), "CourseId"), member(p(&y), "CourseId"));
        let inner = lambda(&[&y], body);
        assert!(inner.references_parameter("x"));
        assert!(!inner.references_parameter("z"));
    }

    #[test]
    fn test_transform_up_rewrites_leaves_before_parents() {
        let e = add(constant(1), constant(2));
        let mut seen = Vec::new();
        let out = e
            .transform_up(&mut |node| {
                seen.push(node.kind_name());
                Ok(node)
            })
            .unwrap();
        assert_eq!(seen, vec!["constant", "constant", "binary"]);
        assert!(matches!(out, Expr::Binary(_)));
    }

    #[test]
    fn test_expr_json_round_trip() {
        let q = Query::from("Student")
            .where_("x", |x| gt(member(x, "Age"), constant(20)))
            .into_expr();
        let json = serde_json::to_string(&q).unwrap();
        let back: Expr = serde_json::from_str(&json).unwrap();
        assert_eq!(q, back);
    }

    #[test]
    fn test_as_lambda_sees_through_quote() {
        let x = param("x", TypeRef::Int);
        let quoted = quote(lambda(&[&x], p(&x)));
        assert!(quoted.as_lambda().is_some());
    }
}

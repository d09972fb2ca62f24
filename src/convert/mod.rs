//! Converter framework: the expression-tree-to-SQL compiler core.
//!
//! A [`ConverterRegistry`] holds an ordered list of [`ConverterFactory`]
//! values. For each input node the [`Dispatcher`] asks the factories in
//! order whether they claim the node, instantiates the winning
//! [`Converter`] and drives it through the per-node protocol:
//!
//! 1. for each child, [`Converter::try_override_child`] may supply the
//!    child's value without visiting it;
//! 2. otherwise the child is visited with the parameter bindings returned by
//!    [`Converter::child_bindings`] in scope;
//! 3. a child the converter chains its query through is normalized into an
//!    open [`SqlSelect`];
//! 4. [`Converter::on_child_converted`] reacts to each finished child;
//! 5. [`Converter::convert`] builds the node's own value;
//! 6. the result of a query converter is closed into a derived table unless
//!    the parent chains through it.

pub mod context;
pub mod functions;
pub mod query;
pub mod scalar;
pub mod shape;

use tracing::trace;

use crate::error::{Result, TranslateError};
use crate::expr::Expr;
use crate::sql::{QuerySource, SqlExpr, SqlSelect};

pub use context::{ConversionContext, Frame, ParameterScope, QueryTicket};

/// Per-node conversion state machine. Instances are short-lived: one per
/// converted node.
pub trait Converter {
    fn name(&self) -> &'static str;

    /// Whether [`convert`](Converter::convert) yields an open select that
    /// must be closed when nothing chains onto it.
    fn is_query_converter(&self) -> bool {
        false
    }

    /// Index of the child that must arrive as an open select, if any.
    fn chained_query_argument(&self) -> Option<usize> {
        None
    }

    fn try_override_child(
        &mut self,
        _index: usize,
        _child: &Expr,
        _cx: &mut ConversionContext<'_>,
    ) -> Result<Option<SqlExpr>> {
        Ok(None)
    }

    /// Lambda-parameter bindings in scope while `child` is visited.
    fn child_bindings(
        &mut self,
        _index: usize,
        _child: &Expr,
        _cx: &mut ConversionContext<'_>,
    ) -> Result<Vec<(String, SqlExpr)>> {
        Ok(Vec::new())
    }

    fn on_child_converted(
        &mut self,
        _index: usize,
        _child: &Expr,
        _converted: &mut SqlExpr,
        _cx: &mut ConversionContext<'_>,
    ) -> Result<()> {
        Ok(())
    }

    fn convert(&mut self, node: &Expr, children: Vec<SqlExpr>, cx: &mut ConversionContext<'_>) -> Result<SqlExpr>;
}

pub trait ConverterFactory {
    fn name(&self) -> &'static str;

    /// A converter for `node`, or `None` when this factory does not claim it.
    fn try_create(&self, node: &Expr, cx: &ConversionContext<'_>) -> Option<Box<dyn Converter>>;
}

type CreateFn = fn(&Expr, &ConversionContext<'_>) -> Option<Box<dyn Converter>>;

/// A factory backed by a plain function.
pub struct FnFactory {
    name: &'static str,
    create: CreateFn,
}

impl FnFactory {
    pub fn new(name: &'static str, create: CreateFn) -> Self {
        Self { name, create }
    }
}

impl ConverterFactory for FnFactory {
    fn name(&self) -> &'static str {
        self.name
    }

    fn try_create(&self, node: &Expr, cx: &ConversionContext<'_>) -> Option<Box<dyn Converter>> {
        (self.create)(node, cx)
    }
}

/// Ordered converter factories; the first factory that claims a node wins.
pub struct ConverterRegistry {
    factories: Vec<Box<dyn ConverterFactory>>,
}

impl Default for ConverterRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ConverterRegistry {
    pub fn new() -> Self {
        Self { factories: Vec::new() }
    }

    /// Registry with every built-in converter.
    ///
    /// Order matters: captured variables must win over member access,
    /// grouping aggregates over query operators, and value-list `Contains`
    /// over the query form of `Contains`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(FnFactory::new("Variable", scalar::create_variable)));
        registry.register(Box::new(FnFactory::new("Constant", scalar::create_constant)));
        registry.register(Box::new(FnFactory::new("Parameter", scalar::create_parameter)));
        registry.register(Box::new(FnFactory::new("Lambda", scalar::create_lambda)));
        registry.register(Box::new(FnFactory::new("GroupAggregate", query::group::create_group_aggregate)));
        registry.register(Box::new(FnFactory::new("InValues", shape::create_in_values)));
        registry.register(Box::new(FnFactory::new("QueryMethod", query::create_query_method)));
        registry.register(Box::new(FnFactory::new("Navigation", query::navigation::create_navigation)));
        registry.register(Box::new(FnFactory::new("ChildJoin", query::join::create_child_join)));
        registry.register(Box::new(FnFactory::new("New", shape::create_new)));
        registry.register(Box::new(FnFactory::new("Function", functions::create_function)));
        registry.register(Box::new(FnFactory::new("Member", scalar::create_member)));
        registry.register(Box::new(FnFactory::new("Binary", scalar::create_binary)));
        registry.register(Box::new(FnFactory::new("Unary", scalar::create_unary)));
        registry.register(Box::new(FnFactory::new("Conditional", scalar::create_conditional)));
        registry
    }

    /// Appends a factory after every registered one.
    pub fn register(&mut self, factory: Box<dyn ConverterFactory>) {
        self.factories.push(factory);
    }

    /// Inserts a factory ahead of every registered one.
    pub fn register_first(&mut self, factory: Box<dyn ConverterFactory>) {
        self.factories.insert(0, factory);
    }

    pub fn factory_names(&self) -> Vec<&str> {
        self.factories.iter().map(|f| f.name()).collect()
    }

    pub fn create(&self, node: &Expr, cx: &ConversionContext<'_>) -> Result<Box<dyn Converter>> {
        self.factories
            .iter()
            .find_map(|f| f.try_create(node, cx))
            .ok_or_else(|| TranslateError::unsupported(node))
    }
}

/// Walks an expression tree through a registry.
pub struct Dispatcher<'r> {
    registry: &'r ConverterRegistry,
}

impl<'r> Dispatcher<'r> {
    pub fn new(registry: &'r ConverterRegistry) -> Self {
        Self { registry }
    }

    /// Converts a root node. A root query is closed into a derived table.
    pub fn convert(&self, node: &Expr, cx: &mut ConversionContext<'_>) -> Result<SqlExpr> {
        self.visit(node, cx, false, None)
    }

    fn visit(
        &self,
        node: &Expr,
        cx: &mut ConversionContext<'_>,
        chained: bool,
        index: Option<usize>,
    ) -> Result<SqlExpr> {
        let mut converter = self.registry.create(node, cx)?;
        trace!(
            converter = converter.name(),
            node = node.kind_name(),
            depth = cx.frames().len(),
            "selected converter"
        );
        let mut cx = cx.enter(Frame {
            converter: converter.name(),
            node: node.kind_name(),
            child_index: index,
        });

        let chained_argument = converter.chained_query_argument();
        let children = node.children();
        let mut converted = Vec::with_capacity(children.len());
        for (i, child) in children.into_iter().enumerate() {
            let is_chained = chained_argument == Some(i);
            let mut value = match converter.try_override_child(i, child, &mut cx)? {
                Some(value) => value,
                None => {
                    let bindings = converter.child_bindings(i, child, &mut cx)?;
                    let mut scope = cx.bind_parameters(bindings);
                    self.visit(child, &mut scope, is_chained, Some(i))?
                }
            };
            if is_chained {
                value = as_query(value, &mut cx, child)?;
            }
            converter.on_child_converted(i, child, &mut value, &mut cx)?;
            converted.push(value);
        }

        let result = converter.convert(node, converted, &mut cx)?;
        if converter.is_query_converter() && !chained {
            return close_query(result, &mut cx);
        }
        Ok(result)
    }
}

/// Normalizes a chained child into an open select.
pub(crate) fn as_query(value: SqlExpr, cx: &mut ConversionContext<'_>, child: &Expr) -> Result<SqlExpr> {
    let source = match value {
        SqlExpr::Select(_) => return Ok(value),
        // A correlated collection is reopened so operators keep composing
        // inside the same subquery.
        SqlExpr::Queryable(dt) => return Ok(SqlExpr::Select(dt.select)),
        SqlExpr::Table(t) => QuerySource::Table(t),
        SqlExpr::DerivedTable(dt) => QuerySource::Derived(dt),
        SqlExpr::Union(u) => QuerySource::Union(u),
        other => {
            return Err(TranslateError::shape(
                "query",
                other.kind_name(),
                format!("chained argument {child}"),
            ))
        }
    };
    Ok(SqlExpr::Select(Box::new(SqlSelect::from_source(source, cx.bindings_mut()))))
}

/// Closes an open select (or bare table) into a derived table; other values
/// pass through.
pub(crate) fn close_query(value: SqlExpr, cx: &mut ConversionContext<'_>) -> Result<SqlExpr> {
    let metadata = cx.metadata();
    match value {
        SqlExpr::Select(select) => Ok(SqlExpr::DerivedTable(select.close(cx.bindings_mut(), metadata)?)),
        SqlExpr::Table(t) => {
            let select = SqlSelect::from_source(QuerySource::Table(t), cx.bindings_mut());
            Ok(SqlExpr::DerivedTable(select.close(cx.bindings_mut(), metadata)?))
        }
        other => Ok(other),
    }
}

/// The data source a joined argument contributes.
pub(crate) fn into_source(value: SqlExpr, cx: &mut ConversionContext<'_>, context: &str) -> Result<QuerySource> {
    if let SqlExpr::Table(t) = value {
        return Ok(QuerySource::Table(t));
    }
    match close_query(value, cx)? {
        SqlExpr::DerivedTable(dt) => Ok(QuerySource::Derived(dt)),
        SqlExpr::Queryable(dt) => Ok(QuerySource::Derived(*dt)),
        SqlExpr::Union(u) => Ok(QuerySource::Union(u)),
        other => Err(TranslateError::shape("query", other.kind_name(), context)),
    }
}

/// Takes a converted child out of the children list.
pub(crate) fn take_child(children: &mut [SqlExpr], index: usize, context: &str) -> Result<SqlExpr> {
    let len = children.len();
    let slot = children.get_mut(index).ok_or_else(|| TranslateError::Arity {
        context: context.to_string(),
        expected: index + 1,
        actual: len,
    })?;
    Ok(std::mem::replace(slot, SqlExpr::Placeholder))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::build::*;
    use crate::sql::DefaultSqlFactory;
    use crate::testing;

    #[test]
    fn test_default_registry_order() {
        let registry = ConverterRegistry::default();
        let names = registry.factory_names();
        assert_eq!(names.first(), Some(&"Variable"));
        let pos = |n: &str| names.iter().position(|x| *x == n).unwrap();
        assert!(pos("GroupAggregate") < pos("QueryMethod"));
        assert!(pos("InValues") < pos("QueryMethod"));
        assert!(pos("Function") < pos("Member"));
    }

    #[test]
    fn test_take_child_reports_missing_argument() {
        let mut children = vec![SqlExpr::Placeholder, SqlExpr::column(crate::sql::Alias(1), "Age")];
        assert_eq!(
            take_child(&mut children, 1, "key").unwrap(),
            SqlExpr::column(crate::sql::Alias(1), "Age")
        );
        assert_eq!(children[1], SqlExpr::Placeholder);
        let err = take_child(&mut children, 3, "result").unwrap_err();
        assert!(matches!(
            err,
            TranslateError::Arity {
                expected: 4,
                actual: 2,
                ..
            }
        ));
    }

    #[test]
    fn test_unclaimed_node_is_unsupported() {
        let model = testing::model();
        let registry = ConverterRegistry::new();
        let mut cx = ConversionContext::new(&model, &DefaultSqlFactory);
        let err = Dispatcher::new(&registry).convert(&constant(1), &mut cx).unwrap_err();
        assert!(matches!(err, TranslateError::Unsupported { .. }));
    }

    #[test]
    fn test_register_first_takes_priority() {
        struct Fixed;
        impl Converter for Fixed {
            fn name(&self) -> &'static str {
                "Fixed"
            }

            fn convert(&mut self, _: &Expr, _: Vec<SqlExpr>, _: &mut ConversionContext<'_>) -> Result<SqlExpr> {
                Ok(SqlExpr::Placeholder)
            }
        }

        let model = testing::model();
        let mut registry = ConverterRegistry::with_defaults();
        registry.register_first(Box::new(FnFactory::new("Fixed", |_, _| Some(Box::new(Fixed)))));
        let mut cx = ConversionContext::new(&model, &DefaultSqlFactory);
        let out = Dispatcher::new(&registry).convert(&constant(1), &mut cx).unwrap();
        assert_eq!(out, SqlExpr::Placeholder);
    }

    #[test]
    fn test_root_query_is_closed() {
        let model = testing::model();
        let registry = ConverterRegistry::default();
        let mut cx = ConversionContext::new(&model, &DefaultSqlFactory);
        let q = Query::from("Student").where_("x", |x| gt(member(x, "Age"), constant(18)));
        let out = Dispatcher::new(&registry).convert(q.expr(), &mut cx).unwrap();
        assert!(matches!(out, SqlExpr::DerivedTable(_)));
        assert!(cx.frames().is_empty());
        assert_eq!(cx.bindings().parameter_depth(), 0);
    }

    #[test]
    fn test_bindings_are_released_after_failure() {
        let model = testing::model();
        let registry = ConverterRegistry::default();
        let mut cx = ConversionContext::new(&model, &DefaultSqlFactory);
        let q = Query::from("Student").where_("x", |x| eq(member(x, "NoSuchMember"), constant(1)));
        assert!(Dispatcher::new(&registry).convert(q.expr(), &mut cx).is_err());
        assert!(cx.frames().is_empty());
        assert_eq!(cx.bindings().parameter_depth(), 0);
    }
}

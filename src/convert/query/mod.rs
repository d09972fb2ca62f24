//! Query-method converters.
//!
//! Every query operator call takes its source query as argument 0. The
//! shared [`QueryMethodConverter`] receives that source as an open select,
//! prepares it for the operator's [`Operation`] (wrapping when the current
//! shape is incompatible), and lends it to the context while the remaining
//! arguments convert so lambdas and navigation joins can see it. The
//! operator-specific part is a [`QueryOperator`].

pub mod basic;
pub mod group;
pub mod join;
pub mod modify;
pub mod navigation;
pub mod set;

use tracing::trace;

use super::{ConversionContext, Converter, QueryTicket};
use crate::error::{Result, TranslateError};
use crate::expr::{Expr, QueryMethod};
use crate::sql::{Operation, SqlExpr, SqlSelect};

pub(crate) trait QueryOperator {
    fn name(&self) -> &'static str;

    /// The change this operator applies to its source select.
    fn operation(&self) -> Operation;

    /// `false` for operators that turn their source into something other
    /// than a query (`EXISTS`, UPDATE, ...).
    fn produces_query(&self) -> bool {
        true
    }

    /// Bindings for argument `index` (> 0). Binds a lambda's first
    /// parameter to the source's current shape by default.
    fn argument_bindings(
        &mut self,
        _index: usize,
        arg: &Expr,
        source: QueryTicket,
        cx: &mut ConversionContext<'_>,
    ) -> Result<Vec<(String, SqlExpr)>> {
        bind_first_parameter(arg, source, cx)
    }

    fn argument_converted(
        &mut self,
        _index: usize,
        _arg: &Expr,
        _converted: &mut SqlExpr,
        _source: QueryTicket,
        _cx: &mut ConversionContext<'_>,
    ) -> Result<()> {
        Ok(())
    }

    /// Applies the operator. `args[0]` is a placeholder for the source.
    fn apply(&mut self, select: SqlSelect, args: Vec<SqlExpr>, cx: &mut ConversionContext<'_>) -> Result<SqlExpr>;
}

pub(crate) struct QueryMethodConverter {
    op: Box<dyn QueryOperator>,
    source: Option<QueryTicket>,
}

impl QueryMethodConverter {
    pub(crate) fn new(op: Box<dyn QueryOperator>) -> Self {
        Self { op, source: None }
    }

    fn source(&self) -> Result<QueryTicket> {
        self.source
            .ok_or_else(|| TranslateError::invalid(format!("{} argument converted before its source", self.op.name())))
    }
}

impl Converter for QueryMethodConverter {
    fn name(&self) -> &'static str {
        self.op.name()
    }

    fn is_query_converter(&self) -> bool {
        self.op.produces_query()
    }

    fn chained_query_argument(&self) -> Option<usize> {
        Some(0)
    }

    fn child_bindings(
        &mut self,
        index: usize,
        child: &Expr,
        cx: &mut ConversionContext<'_>,
    ) -> Result<Vec<(String, SqlExpr)>> {
        if index == 0 {
            return Ok(Vec::new());
        }
        let source = self.source()?;
        self.op.argument_bindings(index, child, source, cx)
    }

    fn on_child_converted(
        &mut self,
        index: usize,
        child: &Expr,
        converted: &mut SqlExpr,
        cx: &mut ConversionContext<'_>,
    ) -> Result<()> {
        if index > 0 {
            let source = self.source()?;
            return self.op.argument_converted(index, child, converted, source, cx);
        }
        let SqlExpr::Select(mut select) = std::mem::replace(converted, SqlExpr::Placeholder) else {
            return Err(TranslateError::invalid("query source did not convert to a select"));
        };
        let metadata = cx.metadata();
        select.prepare(self.op.operation(), cx.bindings_mut(), metadata)?;
        self.source = Some(cx.lend_query(*select));
        Ok(())
    }

    fn convert(&mut self, _: &Expr, children: Vec<SqlExpr>, cx: &mut ConversionContext<'_>) -> Result<SqlExpr> {
        let select = cx.reclaim_query(self.source()?)?;
        trace!(operator = self.op.name(), "applying query operator");
        self.op.apply(select, children, cx)
    }
}

/// Parameter names of the lambda behind `arg`, if it is one.
pub(crate) fn lambda_params(arg: &Expr) -> Vec<String> {
    arg.as_lambda()
        .map(|l| l.params.iter().map(|p| p.name.clone()).collect())
        .unwrap_or_default()
}

/// The value a lambda over the lent select sees for its row.
pub(crate) fn source_shape(source: QueryTicket, cx: &mut ConversionContext<'_>) -> Result<SqlExpr> {
    cx.with_lent_query(source, |select, bindings, _| Ok(select.current_shape(bindings)))
}

/// Binds the first lambda parameter of `arg` to the source's shape, or to
/// its groups when the parameter is typed as a grouping.
pub(crate) fn bind_first_parameter(
    arg: &Expr,
    source: QueryTicket,
    cx: &mut ConversionContext<'_>,
) -> Result<Vec<(String, SqlExpr)>> {
    let Some(param) = arg.as_lambda().and_then(|l| l.params.first()) else {
        return Ok(Vec::new());
    };
    let grouping = cx.metadata().is_grouping_type(&param.ty);
    let shape = cx.with_lent_query(source, |select, bindings, _| {
        if grouping && select.is_grouped() {
            select.grouping_shape(bindings)
        } else {
            Ok(select.current_shape(bindings))
        }
    })?;
    Ok(vec![(param.name.clone(), shape)])
}

/// Binds the parameters of `arg`, in order, to `values`.
pub(crate) fn bind_parameters(arg: &Expr, values: Vec<SqlExpr>) -> Vec<(String, SqlExpr)> {
    lambda_params(arg).into_iter().zip(values).collect()
}

pub(crate) fn create_query_method(node: &Expr, _: &ConversionContext<'_>) -> Option<Box<dyn Converter>> {
    let Expr::MethodCall(call) = node else {
        return None;
    };
    let method = QueryMethod::from_call(call)?;
    match method {
        QueryMethod::DataSet => return Some(Box::new(basic::DataSetConverter)),
        QueryMethod::Union | QueryMethod::UnionAll => return Some(Box::new(set::UnionConverter::new(method))),
        QueryMethod::RecursiveUnion => return Some(Box::new(set::RecursiveUnionConverter::default())),
        _ => {}
    }
    let op = basic::operator(method, call)
        .or_else(|| group::operator(method, call))
        .or_else(|| join::operator(method, call))
        .or_else(|| modify::operator(method, call))?;
    Some(Box::new(QueryMethodConverter::new(op)))
}

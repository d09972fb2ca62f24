//! Per-compilation state shared by all converters.

use std::ops::{Deref, DerefMut};

use crate::binding::Bindings;
use crate::error::{Result, TranslateError};
use crate::model::ModelMetadata;
use crate::sql::{Alias, SqlExpr, SqlFactory, SqlSelect};

/// One entry of the converter stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub converter: &'static str,
    pub node: &'static str,
    /// Position of this node among its parent's children.
    pub child_index: Option<usize>,
}

/// Handle for a select lent to the context by a query-method converter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryTicket(u32);

pub struct ConversionContext<'m> {
    metadata: &'m dyn ModelMetadata,
    factory: &'m dyn SqlFactory,
    pub(crate) bindings: Bindings,
    frames: Vec<Frame>,
    /// Selects under construction, innermost last. Navigation converters
    /// attach joins to the select that owns the navigated data source.
    queries: Vec<(QueryTicket, SqlSelect)>,
    last_ticket: u32,
}

impl<'m> ConversionContext<'m> {
    pub fn new(metadata: &'m dyn ModelMetadata, factory: &'m dyn SqlFactory) -> Self {
        Self {
            metadata,
            factory,
            bindings: Bindings::new(),
            frames: Vec::new(),
            queries: Vec::new(),
            last_ticket: 0,
        }
    }

    pub fn metadata(&self) -> &'m dyn ModelMetadata {
        self.metadata
    }

    pub fn factory(&self) -> &'m dyn SqlFactory {
        self.factory
    }

    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    pub fn bindings_mut(&mut self) -> &mut Bindings {
        &mut self.bindings
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Frames above the current converter, nearest first.
    pub fn ancestors(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter().rev().skip(1)
    }

    /// Pushes a converter frame, popped when the scope drops.
    pub fn enter(&mut self, frame: Frame) -> FrameScope<'_, 'm> {
        let depth = self.frames.len();
        self.frames.push(frame);
        FrameScope { cx: self, depth }
    }

    /// Installs lambda-parameter bindings, removed when the scope drops.
    pub fn bind_parameters(&mut self, params: Vec<(String, SqlExpr)>) -> ParameterScope<'_, 'm> {
        let depth = self.bindings.parameter_depth();
        for (name, value) in params {
            self.bindings.push_parameter(name, value);
        }
        ParameterScope { cx: self, depth }
    }

    pub fn resolve_member(&mut self, target: &SqlExpr, member: &str) -> Result<SqlExpr> {
        let metadata = self.metadata;
        self.bindings.resolve_member(metadata, target, member)
    }

    pub fn lend_query(&mut self, select: SqlSelect) -> QueryTicket {
        self.last_ticket += 1;
        let ticket = QueryTicket(self.last_ticket);
        self.queries.push((ticket, select));
        ticket
    }

    /// Takes back a lent select. Lends nest, so `ticket` must be the most
    /// recent outstanding one.
    pub fn reclaim_query(&mut self, ticket: QueryTicket) -> Result<SqlSelect> {
        match self.queries.pop() {
            Some((top, select)) if top == ticket => Ok(select),
            Some(other) => {
                self.queries.push(other);
                Err(TranslateError::invalid("query reclaimed out of order"))
            }
            None => Err(TranslateError::invalid("no query is lent")),
        }
    }

    pub fn lent_query(&self, ticket: QueryTicket) -> Result<&SqlSelect> {
        self.queries
            .iter()
            .find(|(t, _)| *t == ticket)
            .map(|(_, s)| s)
            .ok_or_else(|| TranslateError::invalid("query ticket is not outstanding"))
    }

    /// Runs `f` on the lent select identified by `ticket`.
    pub fn with_lent_query<R>(
        &mut self,
        ticket: QueryTicket,
        f: impl FnOnce(&mut SqlSelect, &mut Bindings, &dyn ModelMetadata) -> Result<R>,
    ) -> Result<R> {
        let metadata = self.metadata;
        let (_, select) = self
            .queries
            .iter_mut()
            .find(|(t, _)| *t == ticket)
            .ok_or_else(|| TranslateError::invalid("query ticket is not outstanding"))?;
        f(select, &mut self.bindings, metadata)
    }

    /// Runs `f` on the innermost lent select that owns `alias`. `None` when
    /// no select under construction owns it.
    pub fn with_owning_query<R>(
        &mut self,
        alias: Alias,
        f: impl FnOnce(&mut SqlSelect, &mut Bindings, &dyn ModelMetadata) -> Result<R>,
    ) -> Result<Option<R>> {
        let metadata = self.metadata;
        match self
            .queries
            .iter_mut()
            .rev()
            .find(|(_, s)| s.contains_alias(alias))
        {
            Some((_, select)) => f(select, &mut self.bindings, metadata).map(Some),
            None => Ok(None),
        }
    }
}

pub struct FrameScope<'c, 'm> {
    cx: &'c mut ConversionContext<'m>,
    depth: usize,
}

impl<'m> Deref for FrameScope<'_, 'm> {
    type Target = ConversionContext<'m>;

    fn deref(&self) -> &Self::Target {
        self.cx
    }
}

impl DerefMut for FrameScope<'_, '_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.cx
    }
}

impl Drop for FrameScope<'_, '_> {
    fn drop(&mut self) {
        self.cx.frames.truncate(self.depth);
    }
}

pub struct ParameterScope<'c, 'm> {
    cx: &'c mut ConversionContext<'m>,
    depth: usize,
}

impl<'m> Deref for ParameterScope<'_, 'm> {
    type Target = ConversionContext<'m>;

    fn deref(&self) -> &Self::Target {
        self.cx
    }
}

impl DerefMut for ParameterScope<'_, '_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.cx
    }
}

impl Drop for ParameterScope<'_, '_> {
    fn drop(&mut self) {
        self.cx.bindings.truncate_parameters(self.depth);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::DefaultSqlFactory;
    use crate::testing;

    #[test]
    fn test_parameter_scope_pops_on_drop() {
        let model = testing::model();
        let mut cx = ConversionContext::new(&model, &DefaultSqlFactory);
        {
            let scope = cx.bind_parameters(vec![("x".into(), SqlExpr::DataSourceRef(Alias(1)))]);
            assert!(scope.bindings().lookup_parameter("x").is_some());
        }
        assert!(cx.bindings().lookup_parameter("x").is_none());
        assert_eq!(cx.bindings().parameter_depth(), 0);
    }

    #[test]
    fn test_frame_scope_pops_on_drop() {
        let model = testing::model();
        let mut cx = ConversionContext::new(&model, &DefaultSqlFactory);
        {
            let mut outer = cx.enter(Frame {
                converter: "Outer",
                node: "method call",
                child_index: None,
            });
            let inner = outer.enter(Frame {
                converter: "Inner",
                node: "lambda",
                child_index: Some(1),
            });
            let names: Vec<&str> = inner.ancestors().map(|f| f.converter).collect();
            assert_eq!(names, vec!["Outer"]);
        }
        assert!(cx.frames().is_empty());
    }

    #[test]
    fn test_reclaim_must_follow_lend_order() {
        let model = testing::model();
        let mut cx = ConversionContext::new(&model, &DefaultSqlFactory);
        let first = cx.lend_query(SqlSelect::default());
        let second = cx.lend_query(SqlSelect::default());
        assert!(cx.reclaim_query(first).is_err());
        assert!(cx.reclaim_query(second).is_ok());
        assert!(cx.reclaim_query(first).is_ok());
    }
}

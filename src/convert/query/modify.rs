//! `Update` and `Delete`: DML over the rows a query selects.

use tracing::debug;

use super::QueryOperator;
use crate::convert::{take_child, ConversionContext};
use crate::error::{Result, TranslateError};
use crate::expr::{MethodCall, QueryMethod};
use crate::sql::visit::{ColumnInlining, SqlVisitorMut};
use crate::sql::{Alias, Operation, QuerySource, SqlComposite, SqlDataSource, SqlExpr, SqlSelect};

pub(crate) fn operator(method: QueryMethod, _: &MethodCall) -> Option<Box<dyn QueryOperator>> {
    let op: Box<dyn QueryOperator> = match method {
        QueryMethod::Update => Box::new(ModifyOp { delete: false }),
        QueryMethod::Delete => Box::new(ModifyOp { delete: true }),
        _ => return None,
    };
    Some(op)
}

struct ModifyOp {
    delete: bool,
}

impl ModifyOp {
    fn statement(&self) -> &'static str {
        if self.delete {
            "DELETE"
        } else {
            "UPDATE"
        }
    }

    /// The single data source every leaf of `target` reads from.
    fn target_alias(&self, target: &SqlExpr) -> Result<Alias> {
        let alias = match target {
            SqlExpr::DataSourceRef(alias) => Some(*alias),
            SqlExpr::Column(column) => Some(column.source),
            SqlExpr::Composite(c) => {
                let mut aliases = c.entries().iter().map(|(_, leaf)| match leaf {
                    SqlExpr::DataSourceRef(alias) => Some(*alias),
                    SqlExpr::Column(column) => Some(column.source),
                    _ => None,
                });
                let first = aliases.next().flatten();
                if aliases.all(|a| a.is_some() && a == first) {
                    first
                } else {
                    None
                }
            }
            other => {
                return Err(TranslateError::shape(
                    "data source reference",
                    other.kind_name(),
                    format!("{} target", self.statement()),
                ))
            }
        };
        alias.ok_or_else(|| {
            TranslateError::unsupported(format!("{} target spanning several data sources", self.statement()))
        })
    }

    fn not_traceable(&self) -> TranslateError {
        TranslateError::unsupported(format!("{} of a derived table", self.statement()))
    }

    /// Undoes a wrap for a target read through the derived table `alias`.
    ///
    /// The outer select must read nothing but that table, and the inner
    /// select must be a plain filter over its sources. The outer filter,
    /// the target and the assigned values move onto the inner select with
    /// each derived column replaced by the expression it selects.
    fn unwrap_derived(
        &self,
        mut outer: SqlSelect,
        alias: Alias,
        target: &mut SqlExpr,
        values: Option<&mut SqlComposite>,
        cx: &mut ConversionContext<'_>,
    ) -> Result<SqlSelect> {
        if outer.sources.len() != 1 {
            return Err(self.not_traceable());
        }
        let Some(SqlDataSource {
            source: QuerySource::Derived(derived),
            ..
        }) = outer.sources.pop()
        else {
            return Err(self.not_traceable());
        };
        let mut inlining = ColumnInlining::new(alias, &derived);
        let mut inner = *derived.select;
        if inner.is_paged() || inner.is_grouped() || inner.is_distinct() {
            return Err(self.not_traceable());
        }

        if let Some(mut filter) = outer.filter.take() {
            inlining.visit_expr(&mut filter);
            inner.apply_filter(filter);
        }
        if *target == SqlExpr::DataSourceRef(alias) {
            *target = inner.current_shape(cx.bindings_mut());
        } else {
            inlining.visit_expr(target);
        }
        if let Some(values) = values {
            for (_, value) in values.entries_mut() {
                inlining.visit_expr(value);
            }
        }
        if let Some(column) = inlining.missing() {
            return Err(TranslateError::MissingBinding {
                member: column.to_string(),
                context: format!("{} target", self.statement()),
            });
        }
        inner.ctes.append(&mut outer.ctes);
        debug!(derived = %alias, "modification traced through derived table");
        Ok(inner)
    }
}

impl QueryOperator for ModifyOp {
    fn name(&self) -> &'static str {
        if self.delete {
            "Delete"
        } else {
            "Update"
        }
    }

    fn operation(&self) -> Operation {
        Operation::Modify
    }

    fn produces_query(&self) -> bool {
        false
    }

    fn apply(&mut self, mut select: SqlSelect, mut args: Vec<SqlExpr>, cx: &mut ConversionContext<'_>) -> Result<SqlExpr> {
        let mut target = match args.len() {
            0 | 1 => select.current_shape(cx.bindings_mut()),
            _ => take_child(&mut args, 1, "modification target")?,
        };
        let mut values = if self.delete {
            None
        } else {
            match take_child(&mut args, 2, "UPDATE assignments")? {
                SqlExpr::Composite(c) => Some(c),
                other => {
                    return Err(TranslateError::shape(
                        "member assignments",
                        other.kind_name(),
                        "UPDATE assignments",
                    ))
                }
            }
        };
        let (alias, entity) = loop {
            let alias = self.target_alias(&target)?;
            match select.data_source(alias).map(|s| &s.source) {
                Some(QuerySource::Table(table)) => break (alias, table.entity.clone()),
                Some(QuerySource::Derived(_)) => {
                    select = self.unwrap_derived(select, alias, &mut target, values.as_mut(), cx)?;
                }
                Some(_) => return Err(self.not_traceable()),
                None => {
                    return Err(TranslateError::invalid(format!(
                        "{} target {alias} is not a source of the query",
                        self.statement()
                    )))
                }
            }
        };
        select.take_projection();
        select.order_by.clear();
        let factory = cx.factory();
        if self.delete {
            return Ok(SqlExpr::Delete(Box::new(factory.delete(alias, select))));
        }

        let values = values.ok_or_else(|| TranslateError::invalid("UPDATE without assignments"))?;
        let metadata = cx.metadata();
        let mut assignments = Vec::with_capacity(values.len());
        for (path, value) in values.into_entries() {
            let [member] = path.segments() else {
                return Err(TranslateError::unsupported(format!("assignment to nested member '{path}'")));
            };
            let column = metadata.column_name(&entity, member)?;
            assignments.push((column, value.into_scalar()));
        }
        Ok(SqlExpr::Update(Box::new(factory.update(alias, select, assignments))))
    }
}

//! The translation pipeline: preprocess, convert, finalize, render.

use tracing::debug;

use crate::config::TranslatorOptions;
use crate::convert::{ConversionContext, ConverterRegistry, Dispatcher};
use crate::error::{Result, TranslateError};
use crate::expr::Expr;
use crate::model::ModelMetadata;
use crate::preprocess::Preprocessor;
use crate::render::{self, RenderedSql};
use crate::sql::visit::hoist_ctes;
use crate::sql::{DefaultSqlFactory, QuerySource, SqlExpr, SqlFactory, SqlSelect, SqlStatement, StatementBody};

/// Translates expression trees against one model.
///
/// A translator is cheap to reuse: every call to [`Translator::translate`]
/// starts from fresh conversion state.
pub struct Translator<'m> {
    metadata: &'m dyn ModelMetadata,
    factory: Box<dyn SqlFactory>,
    registry: ConverterRegistry,
    preprocessor: Preprocessor,
    options: TranslatorOptions,
}

impl<'m> Translator<'m> {
    pub fn new(metadata: &'m dyn ModelMetadata) -> Self {
        Self {
            metadata,
            factory: Box::new(DefaultSqlFactory),
            registry: ConverterRegistry::with_defaults(),
            preprocessor: Preprocessor::with_defaults(),
            options: TranslatorOptions::default(),
        }
    }

    pub fn with_options(mut self, options: TranslatorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_factory(mut self, factory: Box<dyn SqlFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn with_registry(mut self, registry: ConverterRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_preprocessor(mut self, preprocessor: Preprocessor) -> Self {
        self.preprocessor = preprocessor;
        self
    }

    pub fn options(&self) -> &TranslatorOptions {
        &self.options
    }

    /// Runs the configured preprocessing passes over `expr`.
    pub fn preprocess(&self, expr: Expr) -> Result<Expr> {
        self.preprocessor.run(expr).map_err(|e| match e.downcast::<TranslateError>() {
            Ok(err) => err,
            Err(other) => TranslateError::invalid(format!("{other:#}")),
        })
    }

    pub fn translate(&self, expr: &Expr) -> Result<SqlStatement> {
        let prepared;
        let expr = if self.options.preprocess {
            prepared = self.preprocess(expr.clone())?;
            &prepared
        } else {
            expr
        };

        let mut cx = ConversionContext::new(self.metadata, self.factory.as_ref());
        let value = Dispatcher::new(&self.registry).convert(expr, &mut cx)?;
        let mut statement = finalize(value, &mut cx)?;
        if self.options.hoist_ctes {
            hoist_ctes(&mut statement);
        }
        debug!(
            body = statement_kind(&statement.body),
            ctes = statement.ctes.len(),
            "translated expression"
        );
        Ok(statement)
    }

    /// Translates and renders with the configured dialect.
    pub fn translate_to_sql(&self, expr: &Expr) -> Result<RenderedSql> {
        let statement = self.translate(expr)?;
        render::render(&statement, render::dialect(self.options.dialect).as_ref())
    }
}

fn statement_kind(body: &StatementBody) -> &'static str {
    match body {
        StatementBody::Query(_) => "query",
        StatementBody::Update(_) => "update",
        StatementBody::Delete(_) => "delete",
    }
}

/// Turns the root value into a statement. Bare queries get a select, and a
/// scalar root becomes a select without a FROM clause.
fn finalize(value: SqlExpr, cx: &mut ConversionContext<'_>) -> Result<SqlStatement> {
    let metadata = cx.metadata();
    let body = match value {
        SqlExpr::DerivedTable(query) => StatementBody::Query(query),
        SqlExpr::Subquery(query) | SqlExpr::Queryable(query) => StatementBody::Query(*query),
        SqlExpr::Select(select) => StatementBody::Query(select.close(cx.bindings_mut(), metadata)?),
        SqlExpr::Table(table) => {
            let select = SqlSelect::from_source(QuerySource::Table(table), cx.bindings_mut());
            StatementBody::Query(select.close(cx.bindings_mut(), metadata)?)
        }
        SqlExpr::Union(union) => {
            let select = SqlSelect::from_source(QuerySource::Union(union), cx.bindings_mut());
            StatementBody::Query(select.close(cx.bindings_mut(), metadata)?)
        }
        SqlExpr::Update(update) => StatementBody::Update(*update),
        SqlExpr::Delete(delete) => StatementBody::Delete(*delete),
        scalar => StatementBody::Query(SqlSelect::scalar(scalar).close(cx.bindings_mut(), metadata)?),
    };
    Ok(SqlStatement {
        ctes: Vec::new(),
        body,
    })
}

#[cfg(test)]
mod tests {
    use sqlparser::dialect::PostgreSqlDialect;
    use sqlparser::parser::Parser;

    use super::*;
    use crate::config::DialectKind;
    use crate::expr::build::*;
    use crate::expr::{TypeRef, Value};
    use crate::sql::JoinKind;
    use crate::testing;

    fn postgres(expr: &Expr) -> RenderedSql {
        let model = testing::model();
        let options = TranslatorOptions {
            dialect: DialectKind::Postgres,
            ..Default::default()
        };
        let rendered = Translator::new(&model).with_options(options).translate_to_sql(expr).unwrap();
        Parser::parse_sql(&PostgreSqlDialect {}, &rendered.sql).unwrap_or_else(|e| panic!("{}: {e}", rendered.sql));
        rendered
    }

    fn query_body(statement: SqlStatement) -> crate::sql::SqlDerivedTable {
        match statement.body {
            StatementBody::Query(dt) => dt,
            other => panic!("expected a query, got {other:?}"),
        }
    }

    #[test]
    fn test_where_then_select_is_one_select() {
        let q = Query::from("Student")
            .where_("x", |x| gt(member(x, "Age"), constant(18)))
            .select("x", TypeRef::String, |x| member(x, "Name"));
        let sql = testing::sqlserver(&q.into_expr());
        assert_eq!(
            sql,
            "SELECT a1.[FullName] AS [FullName] FROM [Student] AS a1 WHERE a1.[Age] > 18"
        );
    }

    #[test]
    fn test_filter_after_projection_wraps() {
        let q = Query::from("Student")
            .select("x", TypeRef::Anonymous, |x| new_anon(vec![("Years", member(x, "Age"))]))
            .where_("y", |y| gt(member(y, "Years"), constant(3)));
        let dt = query_body(testing::translate(&q.into_expr()).unwrap());
        assert!(matches!(dt.select.sources()[0].source, QuerySource::Derived(_)));
        assert!(dt.select.filter().is_some());
        assert_eq!(dt.columns.len(), 1);
        assert_eq!(dt.columns[0].alias, "Years");
    }

    #[test]
    fn test_composite_join_keys() {
        let q = Query::from("Student").join(
            Query::from("Enrollment"),
            |o| new_anon(vec![("S", member(o.clone(), "StudentId")), ("C", member(o, "CourseId"))]),
            |i| new_anon(vec![("S", member(i.clone(), "StudentId")), ("C", member(i, "CourseId"))]),
            TypeRef::Anonymous,
            |o, i| new_anon(vec![("Name", member(o, "Name")), ("Grade", member(i, "Grade"))]),
        );
        let sql = testing::sqlserver(&q.into_expr());
        assert!(
            sql.contains("INNER JOIN [Enrollment] AS a2 ON a1.[StudentId] = a2.[StudentId] AND a1.[CourseId] = a2.[CourseId]"),
            "{sql}"
        );
    }

    #[test]
    fn test_join_key_arity_mismatch() {
        let q = Query::from("Student").join(
            Query::from("Enrollment"),
            |o| new_anon(vec![("S", member(o.clone(), "StudentId")), ("C", member(o, "CourseId"))]),
            |i| member(i, "StudentId"),
            TypeRef::Anonymous,
            |o, _| o,
        );
        let err = testing::translate(&q.into_expr()).unwrap_err();
        assert!(matches!(err, TranslateError::Arity { .. }), "{err}");
    }

    #[test]
    fn test_select_many_navigation_joins_once() {
        let degrees = |x: Expr| nav(x, "NavDegrees", TypeRef::enumerable(TypeRef::entity("EmployeeDegree")));
        let q = Query::from("Employee").select_many_with(
            ("x", "d"),
            TypeRef::entity("EmployeeDegree"),
            degrees,
            TypeRef::Anonymous,
            |x, d| new_anon(vec![("Name", member(x, "Name")), ("Degree", member(d, "Degree"))]),
        );
        let dt = query_body(testing::translate(&q.into_expr()).unwrap());
        let joins: Vec<JoinKind> = dt
            .select
            .sources()
            .iter()
            .filter_map(|s| s.join.as_ref().map(|j| j.kind))
            .collect();
        assert_eq!(joins, vec![JoinKind::Inner]);
    }

    #[test]
    fn test_root_count_is_aggregate_query() {
        let expr = Query::from("Student").count_where("x", |x| member(x, "IsActive"));
        let sql = testing::sqlserver(&expr);
        assert_eq!(
            sql,
            "SELECT COUNT(*) AS [Value] FROM [Student] AS a1 WHERE a1.[IsActive] = 1"
        );
    }

    #[test]
    fn test_root_any_is_scalar_select() {
        let expr = Query::from("Student").any_where("x", |x| gt(member(x, "Age"), constant(60)));
        let rendered = postgres(&expr);
        assert!(rendered.sql.starts_with("SELECT (EXISTS (SELECT 1 AS \"Value\" FROM \"Student\""), "{}", rendered.sql);
        assert!(rendered.sql.ends_with(")) AS \"Value\""), "{}", rendered.sql);
    }

    #[test]
    fn test_all_matches_with_and_without_preprocessing() {
        let expr = Query::from("Student").all("x", |x| gt(member(x, "Age"), constant(18)));
        let model = testing::model();
        let pre = Translator::new(&model).translate_to_sql(&expr).unwrap();
        let options = TranslatorOptions {
            preprocess: false,
            ..Default::default()
        };
        let raw = Translator::new(&model).with_options(options).translate_to_sql(&expr).unwrap();
        assert!(pre.sql.contains("NOT EXISTS"), "{}", pre.sql);
        assert!(raw.sql.contains("NOT EXISTS"), "{}", raw.sql);
    }

    #[test]
    fn test_captured_variable_becomes_parameter() {
        let limit = variable("limit", Value::Int(21));
        let q = Query::from("Student")
            .where_("x", |x| gt(member(x, "Age"), limit))
            .order_by("x", |x| member(x, "Name"))
            .take(10);
        let rendered = postgres(&q.into_expr());
        assert_eq!(rendered.parameters.len(), 1);
        assert_eq!(rendered.parameters[0].value, Value::Int(21));
        assert!(rendered.sql.contains("> $1"));
        assert!(rendered.sql.ends_with("ORDER BY a1.\"FullName\" LIMIT 10"), "{}", rendered.sql);
    }

    #[test]
    fn test_recursive_union_renders_hoisted_cte() {
        let q = Query::from("Asset")
            .where_("x", |x| eq(member(x, "ParentId"), null()))
            .recursive_union("a", |a| {
                a.join(
                    Query::from("Asset"),
                    |o| member(o, "RowId"),
                    |i| member(i, "ParentId"),
                    TypeRef::entity("Asset"),
                    |_, i| i,
                )
            });
        let expr = q.into_expr();
        let server = testing::sqlserver(&expr);
        assert!(server.starts_with("WITH cte"), "{server}");
        assert!(server.contains(" UNION ALL "));
        assert!(postgres(&expr).sql.starts_with("WITH RECURSIVE cte"));
    }

    #[test]
    fn test_unhoisted_cte_stays_on_its_select() {
        let q = Query::from("Asset")
            .where_("x", |x| eq(member(x, "ParentId"), null()))
            .recursive_union("a", |a| {
                a.join(
                    Query::from("Asset"),
                    |o| member(o, "RowId"),
                    |i| member(i, "ParentId"),
                    TypeRef::entity("Asset"),
                    |_, i| i,
                )
            });
        let model = testing::model();
        let options = TranslatorOptions {
            hoist_ctes: false,
            ..Default::default()
        };
        let statement = Translator::new(&model).with_options(options).translate(&q.into_expr()).unwrap();
        assert!(statement.ctes.is_empty());
        assert_eq!(query_body(statement).select.ctes().len(), 1);
    }

    #[test]
    fn test_union_root_is_wrapped() {
        let names = |entity: &str| Query::from(entity).select("x", TypeRef::String, |x| member(x, "Name"));
        let q = names("Student").union(names("Country"));
        let sql = testing::sqlserver(&q.into_expr());
        assert!(sql.starts_with("SELECT a"), "{sql}");
        assert!(sql.contains(" UNION ("), "{sql}");
    }

    #[test]
    fn test_delete_renders_per_dialect() {
        let expr = Query::from("Student")
            .where_("x", |x| eq(member(x, "Age"), constant(3)))
            .delete();
        assert_eq!(
            testing::sqlserver(&expr),
            "DELETE a1 FROM [Student] AS a1 WHERE a1.[Age] = 3"
        );
        assert_eq!(postgres(&expr).sql, "DELETE FROM \"Student\" AS a1 WHERE a1.\"Age\" = 3");
    }

    #[test]
    fn test_grouped_count_renders_group_by() {
        let q = Query::from("Student")
            .group_by("x", TypeRef::Int, |x| member(x, "CourseId"))
            .select("g", TypeRef::Anonymous, |g| {
                new_anon(vec![("Course", member(g.clone(), "Key")), ("Students", count(g))])
            });
        let sql = testing::sqlserver(&q.into_expr());
        assert!(sql.contains("GROUP BY a1.[CourseId]"), "{sql}");
        assert!(sql.contains("COUNT(*) AS [Students]"), "{sql}");
    }

    #[test]
    fn test_unknown_entity_is_reported() {
        let err = testing::translate(&Query::from("Nope").into_expr()).unwrap_err();
        assert!(matches!(err, TranslateError::UnknownEntity(_)), "{err}");
    }
}

//! Navigation properties.
//!
//! A to-one navigation becomes a join on the select that owns the parent
//! data source; the same navigation from the same parent reuses its join.
//! A to-many navigation is either joined (as the collection of a
//! `SelectMany`) or a correlated subquery.

use tracing::debug;

use crate::binding::{Bindings, ModelPath};
use crate::convert::{ConversionContext, Converter, Frame};
use crate::error::{Result, TranslateError};
use crate::expr::Expr;
use crate::model::{Cardinality, ModelMetadata, NavigationInfo};
use crate::sql::{
    Alias, BinaryOperator, JoinKind, Literal, NavigationTag, QuerySource, SqlExpr, SqlFactory, SqlSelect, SqlTable,
};

struct NavigationConverter;

/// Whether the navigation being converted is the collection argument of a
/// `SelectMany`, possibly under its lambda and quote.
fn in_select_many_collection(frames: &[Frame]) -> bool {
    let mut frames = frames.iter().rev();
    let Some(mut below) = frames.next() else {
        return false;
    };
    for frame in frames {
        match frame.converter {
            "SelectMany" => return below.child_index == Some(1),
            "Lambda" | "Quote" => below = frame,
            _ => return false,
        }
    }
    false
}

/// `parent.key = child.key AND ..` for every key pair of the navigation.
fn join_condition(
    navigation: &NavigationInfo,
    parent: Alias,
    child: Alias,
    bindings: &mut Bindings,
    metadata: &dyn ModelMetadata,
    factory: &dyn SqlFactory,
) -> Result<SqlExpr> {
    let mut predicates = Vec::with_capacity(navigation.keys.len());
    for (parent_member, child_member) in &navigation.keys {
        let left = bindings.resolve_path(metadata, parent, &ModelPath::single(parent_member.clone()))?;
        let child_column = metadata.column_name(&navigation.target, child_member)?;
        let right = bindings.column(child, &child_column);
        predicates.push(factory.binary(BinaryOperator::Eq, left, right));
    }
    factory.and_all(predicates).ok_or_else(|| {
        TranslateError::Config(format!("navigation '{}' has no join keys", navigation.name))
    })
}

impl NavigationConverter {
    fn to_one(
        &self,
        parent: Alias,
        navigation: NavigationInfo,
        table: SqlTable,
        cx: &mut ConversionContext<'_>,
    ) -> Result<SqlExpr> {
        let factory = cx.factory();
        let joined = cx.with_owning_query(parent, |select, bindings, metadata| {
            if let Some(existing) = select.find_navigation_join(parent, &navigation.name) {
                debug!(navigation = %navigation.name, parent = %parent, alias = %existing, "reusing navigation join");
                return Ok(existing);
            }
            let parent_outer = select.join_kind(parent).is_some_and(JoinKind::is_outer);
            let kind = if navigation.cardinality == Cardinality::ToOneOptional || parent_outer {
                JoinKind::Left
            } else {
                JoinKind::Inner
            };
            add_join(select, bindings, metadata, factory, parent, &navigation, table, kind)
        })?;
        joined
            .map(SqlExpr::DataSourceRef)
            .ok_or_else(|| no_owner(parent, &navigation.name))
    }

    fn joined_collection(
        &self,
        parent: Alias,
        navigation: NavigationInfo,
        table: SqlTable,
        cx: &mut ConversionContext<'_>,
    ) -> Result<SqlExpr> {
        let factory = cx.factory();
        let joined = cx.with_owning_query(parent, |select, bindings, metadata| {
            add_join(
                select,
                bindings,
                metadata,
                factory,
                parent,
                &navigation,
                table,
                JoinKind::Inner,
            )
        })?;
        joined
            .map(SqlExpr::DataSourceRef)
            .ok_or_else(|| no_owner(parent, &navigation.name))
    }

    fn correlated_collection(
        &self,
        parent: Alias,
        navigation: NavigationInfo,
        table: SqlTable,
        cx: &mut ConversionContext<'_>,
    ) -> Result<SqlExpr> {
        let factory = cx.factory();
        let metadata = cx.metadata();
        let bindings = cx.bindings_mut();
        let mut select = SqlSelect::from_source(QuerySource::Table(table), bindings);
        let child = select
            .initial_alias()
            .ok_or_else(|| TranslateError::invalid("correlated collection without a source"))?;
        let condition = join_condition(&navigation, parent, child, bindings, metadata, factory)?;
        select.apply_filter(condition);
        debug!(navigation = %navigation.name, parent = %parent, "correlated collection subquery");
        Ok(SqlExpr::Queryable(Box::new(select.close(bindings, metadata)?)))
    }
}

#[allow(clippy::too_many_arguments)]
fn add_join(
    select: &mut SqlSelect,
    bindings: &mut Bindings,
    metadata: &dyn ModelMetadata,
    factory: &dyn SqlFactory,
    parent: Alias,
    navigation: &NavigationInfo,
    table: SqlTable,
    kind: JoinKind,
) -> Result<Alias> {
    let tag = NavigationTag {
        parent,
        name: navigation.name.clone(),
    };
    let alias = select.add_navigation_join(tag, table, kind, SqlExpr::Literal(Literal::Boolean(true)), bindings);
    let condition = join_condition(navigation, parent, alias, bindings, metadata, factory)?;
    select.set_join_condition(alias, condition)?;
    debug!(navigation = %navigation.name, parent = %parent, alias = %alias, ?kind, "added navigation join");
    Ok(alias)
}

fn no_owner(parent: Alias, navigation: &str) -> TranslateError {
    TranslateError::invalid(format!(
        "navigation '{navigation}' from {parent}, which no open query owns"
    ))
}

impl Converter for NavigationConverter {
    fn name(&self) -> &'static str {
        "Navigation"
    }

    fn convert(&mut self, node: &Expr, children: Vec<SqlExpr>, cx: &mut ConversionContext<'_>) -> Result<SqlExpr> {
        let Expr::Navigation(nav) = node else {
            return Err(TranslateError::invalid("navigation converter on a non-navigation node"));
        };
        let parent = match children.into_iter().next() {
            Some(SqlExpr::DataSourceRef(alias)) => alias,
            Some(other) => {
                return Err(TranslateError::shape(
                    "data source reference",
                    other.kind_name(),
                    format!("source of navigation '{}'", nav.navigation),
                ))
            }
            None => {
                return Err(TranslateError::Arity {
                    context: format!("navigation '{}'", nav.navigation),
                    expected: 1,
                    actual: 0,
                })
            }
        };
        let Some(entity) = cx.bindings().source_shape(parent)?.entity().map(str::to_string) else {
            return Err(TranslateError::shape(
                "entity data source",
                "derived table",
                format!("source of navigation '{}'", nav.navigation),
            ));
        };
        let metadata = cx.metadata();
        let navigation = metadata.navigation(&entity, &nav.navigation)?;
        let table = cx
            .factory()
            .table(&navigation.target, metadata.table_name(&navigation.target)?);

        if !navigation.is_to_many() {
            self.to_one(parent, navigation, table, cx)
        } else if in_select_many_collection(cx.frames()) {
            self.joined_collection(parent, navigation, table, cx)
        } else {
            self.correlated_collection(parent, navigation, table, cx)
        }
    }
}

pub(crate) fn create_navigation(node: &Expr, _: &ConversionContext<'_>) -> Option<Box<dyn Converter>> {
    matches!(node, Expr::Navigation(_)).then(|| Box::new(NavigationConverter) as Box<dyn Converter>)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::build::*;
    use crate::sql::StatementBody;
    use crate::testing;

    fn frame(converter: &'static str, child_index: Option<usize>) -> Frame {
        Frame {
            converter,
            node: "test",
            child_index,
        }
    }

    #[test]
    fn test_select_many_collection_position() {
        let frames = vec![
            frame("SelectMany", None),
            frame("Quote", Some(1)),
            frame("Lambda", Some(0)),
            frame("Navigation", Some(0)),
        ];
        assert!(in_select_many_collection(&frames));

        let in_result = vec![
            frame("SelectMany", None),
            frame("Quote", Some(2)),
            frame("Lambda", Some(0)),
            frame("Navigation", Some(0)),
        ];
        assert!(!in_select_many_collection(&in_result));

        let nested = vec![
            frame("SelectMany", None),
            frame("Quote", Some(1)),
            frame("Lambda", Some(0)),
            frame("Where", Some(0)),
            frame("Navigation", Some(0)),
        ];
        assert!(!in_select_many_collection(&nested));
    }

    fn department(x: Expr) -> Expr {
        nav(x, "NavDepartment", TypeRef::entity("Department"))
    }

    #[test]
    fn test_repeated_navigation_reuses_join() {
        let q = Query::from("Employee").select("x", TypeRef::Anonymous, |x| {
            new_anon(vec![
                ("Dept", member(department(x.clone()), "Name")),
                ("Loc", member(department(x), "LocationId")),
            ])
        });
        let statement = testing::translate(&q.into_expr()).unwrap();
        let StatementBody::Query(dt) = statement.body else {
            panic!("expected a query");
        };
        assert_eq!(dt.select.sources().len(), 2);
        assert_eq!(dt.select.sources()[1].join.as_ref().map(|j| j.kind), Some(JoinKind::Left));
    }

    #[test]
    fn test_required_after_optional_stays_left() {
        let q = Query::from("Employee").select("x", TypeRef::String, |x| {
            let location = nav(department(x), "NavLocation", TypeRef::entity("Location"));
            member(location, "City")
        });
        let statement = testing::translate(&q.into_expr()).unwrap();
        let StatementBody::Query(dt) = statement.body else {
            panic!("expected a query");
        };
        let kinds: Vec<JoinKind> = dt
            .select
            .sources()
            .iter()
            .filter_map(|s| s.join.as_ref().map(|j| j.kind))
            .collect();
        assert_eq!(kinds, vec![JoinKind::Left, JoinKind::Left]);
    }

    #[test]
    fn test_to_many_outside_select_many_is_correlated() {
        let q = Query::from("Employee").select("x", TypeRef::Int, |x| {
            count(nav(x, "NavDegrees", TypeRef::enumerable(TypeRef::entity("EmployeeDegree"))))
        });
        let statement = testing::translate(&q.into_expr()).unwrap();
        let StatementBody::Query(dt) = statement.body else {
            panic!("expected a query");
        };
        assert_eq!(dt.select.sources().len(), 1);
        assert!(matches!(dt.columns[0].expr, SqlExpr::Subquery(_)));
    }

    #[test]
    fn test_navigation_after_paging_wrap() {
        let expr = Query::from("Employee")
            .take(5)
            .where_("x", |x| eq(member(department(x), "Name"), constant("IT")))
            .into_expr();
        let statement = testing::translate(&expr).unwrap();
        let StatementBody::Query(dt) = statement.body else {
            panic!("expected a query");
        };
        let sources = dt.select.sources();
        assert_eq!(sources.len(), 2);
        assert!(matches!(sources[0].source, QuerySource::Derived(_)));
        assert_eq!(sources[1].join.as_ref().map(|j| j.kind), Some(JoinKind::Left));
        let sql = testing::sqlserver(&expr);
        assert!(
            sql.contains("LEFT JOIN [Department] AS a4 ON a3.[DepartmentId] = a4.[DepartmentId]"),
            "{sql}"
        );
    }

    #[test]
    fn test_navigation_after_distinct_wrap() {
        let q = Query::from("Employee")
            .distinct()
            .select("x", TypeRef::String, |x| member(department(x), "Name"));
        let sql = testing::sqlserver(&q.into_expr());
        assert!(sql.starts_with("SELECT a4.[Name]"), "{sql}");
        assert!(sql.contains("FROM (SELECT DISTINCT "), "{sql}");
    }

    #[test]
    fn test_navigation_from_projected_value_is_shape_error() {
        let q = Query::from("Employee")
            .select("x", TypeRef::Anonymous, |x| new_anon(vec![("Id", member(x, "EmployeeId"))]))
            .select("y", TypeRef::entity("Department"), |y| department(y));
        let err = testing::translate(&q.into_expr()).unwrap_err();
        assert!(matches!(err, TranslateError::ShapeContract { .. }));
    }
}

//! Shape converters: object construction, arrays, value-list membership,
//! and multi-column equality.

use super::{take_child, ConversionContext, Converter};
use crate::binding::ModelPath;
use crate::error::{Result, TranslateError};
use crate::expr::{Expr, QueryMethod};
use crate::sql::{BinaryOperator, SqlComposite, SqlExpr};

/// `new { A = .., B = .. }` and member-init expressions become a composite
/// binding. Nested composites are flattened into dotted paths; members of a
/// sequence type keep their subquery as a queryable marker.
struct NewConverter;

impl Converter for NewConverter {
    fn name(&self) -> &'static str {
        "New"
    }

    fn convert(&mut self, node: &Expr, children: Vec<SqlExpr>, cx: &mut ConversionContext<'_>) -> Result<SqlExpr> {
        let members = match node {
            Expr::New(n) => &n.members,
            Expr::NewArray(_) => return Ok(SqlExpr::List(children.into_iter().map(SqlExpr::into_scalar).collect())),
            _ => return Err(TranslateError::invalid("new converter on a non-construction node")),
        };
        if members.len() != children.len() {
            return Err(TranslateError::Arity {
                context: "member bindings".into(),
                expected: members.len(),
                actual: children.len(),
            });
        }
        let mut composite = SqlComposite::new();
        for (binding, value) in members.iter().zip(children) {
            let ty = binding.value.ty();
            let value = if cx.metadata().is_enumerable(ty) {
                match value {
                    SqlExpr::DerivedTable(dt) => SqlExpr::Queryable(Box::new(dt)),
                    queryable @ SqlExpr::Queryable(_) => queryable,
                    other => {
                        return Err(TranslateError::shape(
                            "derived table",
                            other.kind_name(),
                            format!("sequence member '{}'", binding.member),
                        ))
                    }
                }
            } else {
                value.into_scalar()
            };
            composite.insert_member(&binding.member, value);
        }
        Ok(SqlExpr::Composite(composite))
    }
}

pub(crate) fn create_new(node: &Expr, _: &ConversionContext<'_>) -> Option<Box<dyn Converter>> {
    matches!(node, Expr::New(_) | Expr::NewArray(_)).then(|| Box::new(NewConverter) as Box<dyn Converter>)
}

/// `item IN (values)`, from an [`Expr::InValues`] marker or from a
/// `Contains` call over an in-memory collection.
struct InValuesConverter {
    item: usize,
    values: usize,
    negated: bool,
}

impl Converter for InValuesConverter {
    fn name(&self) -> &'static str {
        "InValues"
    }

    fn convert(&mut self, _: &Expr, mut children: Vec<SqlExpr>, cx: &mut ConversionContext<'_>) -> Result<SqlExpr> {
        let item = take_child(&mut children, self.item, "in values")?.into_scalar();
        let values = match take_child(&mut children, self.values, "in values")? {
            SqlExpr::List(items) => items,
            SqlExpr::DerivedTable(dt) => vec![SqlExpr::Subquery(Box::new(dt))],
            scalar @ (SqlExpr::Parameter(_) | SqlExpr::Literal(_)) => vec![scalar],
            other => {
                return Err(TranslateError::shape(
                    "value list",
                    other.kind_name(),
                    "values of an IN test",
                ))
            }
        };
        Ok(cx.factory().in_values(item, values, self.negated))
    }
}

fn is_value_collection(expr: &Expr, cx: &ConversionContext<'_>) -> bool {
    match expr {
        Expr::NewArray(_) => true,
        Expr::Constant(c) => !matches!(c.value, crate::expr::Value::Table(_)),
        other => cx.metadata().is_variable(other),
    }
}

pub(crate) fn create_in_values(node: &Expr, cx: &ConversionContext<'_>) -> Option<Box<dyn Converter>> {
    let converter = match node {
        Expr::InValues(v) => InValuesConverter {
            item: 0,
            values: 1,
            negated: v.negated,
        },
        Expr::MethodCall(call) if call.method.name == "Contains" => match (&call.instance, call.args.as_slice()) {
            (None, [collection, _]) if node.query_method() == Some(QueryMethod::Contains) => {
                if !is_value_collection(collection, cx) {
                    return None;
                }
                InValuesConverter {
                    item: 1,
                    values: 0,
                    negated: false,
                }
            }
            (Some(instance), [_]) if call.method.declaring_type != "String" && is_value_collection(instance, cx) => {
                InValuesConverter {
                    item: 1,
                    values: 0,
                    negated: false,
                }
            }
            _ => return None,
        },
        _ => return None,
    };
    Some(Box::new(converter))
}

/// Whether a value spans several columns and needs column-wise comparison.
pub(crate) fn is_multi_column(expr: &SqlExpr) -> bool {
    matches!(expr, SqlExpr::Composite(_) | SqlExpr::DataSourceRef(_))
}

/// The comparable leaves of a value. Entity rows compare by primary key.
fn key_leaves(expr: SqlExpr, cx: &mut ConversionContext<'_>) -> Result<Vec<SqlExpr>> {
    let metadata = cx.metadata();
    if let SqlExpr::DataSourceRef(alias) = &expr {
        if let Some(entity) = cx.bindings().source_shape(*alias)?.entity().map(str::to_string) {
            let keys = metadata.primary_keys(&entity)?;
            if !keys.is_empty() {
                return keys
                    .iter()
                    .map(|k| cx.bindings_mut().resolve_path(metadata, *alias, &ModelPath::single(k.clone())))
                    .collect();
            }
        }
    }
    if !is_multi_column(&expr) {
        return Ok(vec![expr]);
    }
    let mut leaves = Vec::new();
    cx.bindings_mut().flatten(metadata, &expr, &ModelPath::EMPTY, &mut leaves)?;
    Ok(leaves.into_iter().map(|(_, leaf)| leaf).collect())
}

/// Column-wise equality: an AND chain of one comparison per leaf, in
/// positional order.
pub(crate) fn equality(left: SqlExpr, right: SqlExpr, cx: &mut ConversionContext<'_>) -> Result<SqlExpr> {
    let left = key_leaves(left, cx)?;
    let right = key_leaves(right, cx)?;
    if left.len() != right.len() {
        return Err(TranslateError::Arity {
            context: "key equality".into(),
            expected: left.len(),
            actual: right.len(),
        });
    }
    let factory = cx.factory();
    let predicates = left
        .into_iter()
        .zip(right)
        .map(|(l, r)| factory.binary(BinaryOperator::Eq, l.into_scalar(), r.into_scalar()))
        .collect();
    factory
        .and_all(predicates)
        .ok_or_else(|| TranslateError::invalid("key equality over an empty key"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::SourceShape;
    use crate::convert::{ConverterRegistry, Dispatcher};
    use crate::expr::build::*;
    use crate::sql::{Alias, DefaultSqlFactory};
    use crate::testing;

    fn composite(entries: &[(&str, SqlExpr)]) -> SqlExpr {
        let mut c = SqlComposite::new();
        for (name, e) in entries {
            c.insert_member(name, e.clone());
        }
        SqlExpr::Composite(c)
    }

    #[test]
    fn test_composite_equality_is_positional_and_chain() {
        let model = testing::model();
        let mut cx = ConversionContext::new(&model, &DefaultSqlFactory);
        let left = composite(&[
            ("K1", SqlExpr::column(Alias(1), "A")),
            ("K2", SqlExpr::column(Alias(1), "B")),
        ]);
        let right = composite(&[
            ("K1", SqlExpr::column(Alias(2), "A")),
            ("K2", SqlExpr::column(Alias(2), "B")),
        ]);
        let out = equality(left, right, &mut cx).unwrap();
        let SqlExpr::Binary {
            op: BinaryOperator::And,
            left,
            right,
        } = out
        else {
            panic!("expected AND chain");
        };
        assert_eq!(
            *left,
            SqlExpr::binary(BinaryOperator::Eq, SqlExpr::column(Alias(1), "A"), SqlExpr::column(Alias(2), "A"))
        );
        assert_eq!(
            *right,
            SqlExpr::binary(BinaryOperator::Eq, SqlExpr::column(Alias(1), "B"), SqlExpr::column(Alias(2), "B"))
        );
    }

    #[test]
    fn test_key_arity_mismatch() {
        let model = testing::model();
        let mut cx = ConversionContext::new(&model, &DefaultSqlFactory);
        let left = composite(&[
            ("K1", SqlExpr::column(Alias(1), "A")),
            ("K2", SqlExpr::column(Alias(1), "B")),
        ]);
        let err = equality(left, SqlExpr::column(Alias(2), "A"), &mut cx).unwrap_err();
        assert_eq!(
            err,
            TranslateError::Arity {
                context: "key equality".into(),
                expected: 2,
                actual: 1
            }
        );
    }

    #[test]
    fn test_entity_rows_compare_by_primary_key() {
        let model = testing::model();
        let mut cx = ConversionContext::new(&model, &DefaultSqlFactory);
        let a = cx.bindings_mut().next_alias();
        let b = cx.bindings_mut().next_alias();
        cx.bindings_mut().register_source(a, SourceShape::Entity("Student".into()));
        cx.bindings_mut().register_source(b, SourceShape::Entity("Student".into()));
        let out = equality(SqlExpr::DataSourceRef(a), SqlExpr::DataSourceRef(b), &mut cx).unwrap();
        assert_eq!(
            out,
            SqlExpr::binary(BinaryOperator::Eq, SqlExpr::column(a, "StudentId"), SqlExpr::column(b, "StudentId"))
        );
    }

    #[test]
    fn test_contains_over_variable_becomes_in_list() {
        let model = testing::model();
        let registry = ConverterRegistry::default();
        let mut cx = ConversionContext::new(&model, &DefaultSqlFactory);
        let a = cx.bindings_mut().next_alias();
        cx.bindings_mut().register_source(a, SourceShape::Entity("Student".into()));
        let mut scope = cx.bind_parameters(vec![("x".into(), SqlExpr::DataSourceRef(a))]);
        let x = p(&param("x", TypeRef::entity("Student")));
        let body = contains(variable("ids", vec![1, 2, 3]), member(x, "Age"));
        let out = Dispatcher::new(&registry).convert(&body, &mut scope).unwrap();
        match out {
            SqlExpr::InValues { values, negated, .. } => {
                assert_eq!(values.len(), 3);
                assert!(!negated);
            }
            other => panic!("expected IN, got {other:?}"),
        }
    }

    #[test]
    fn test_nested_new_flattens_paths() {
        let model = testing::model();
        let registry = ConverterRegistry::default();
        let mut cx = ConversionContext::new(&model, &DefaultSqlFactory);
        let body = new_anon(vec![
            ("Outer", new_anon(vec![("Inner", constant(1))])),
            ("Flat", constant(2)),
        ]);
        let out = Dispatcher::new(&registry).convert(&body, &mut cx).unwrap();
        let SqlExpr::Composite(c) = out else {
            panic!("expected composite");
        };
        let paths: Vec<String> = c.entries().iter().map(|(p, _)| p.to_string()).collect();
        assert_eq!(paths, vec!["Outer.Inner", "Flat"]);
    }
}

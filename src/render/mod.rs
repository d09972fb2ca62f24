//! SQL text generation from a [`SqlStatement`].
//!
//! Rendering is a single recursive walk. Each clause renders into a part and
//! the parts are joined with spaces, so the output is one line. Vendor
//! syntax is delegated to a [`SqlDialect`].
//!
//! Values and conditions are rendered by separate entry points: a boolean
//! column in a WHERE clause needs `= 1` on SQL Server, and a comparison in a
//! SELECT list needs a CASE there.

mod dialect;

use tracing::debug;

pub use dialect::{dialect, PostgresDialect, SqlDialect, SqlServerDialect};

use crate::error::{Result, TranslateError};
use crate::model::TableName;
use crate::sql::{
    AggregateFunction, Alias, BinaryOperator, JoinKind, Literal, OutputColumn, QuerySource, SqlCte, SqlDataSource,
    SqlDelete, SqlDerivedTable, SqlExpr, SqlJoin, SqlParameter, SqlSelect, SqlStatement, SqlUnion, SqlUpdate,
    StatementBody, UnaryOperator, UnionKind,
};

const OR: u8 = 1;
const AND: u8 = 2;
const NOT: u8 = 3;
const COMPARISON: u8 = 4;
const ADDITIVE: u8 = 5;
const MULTIPLICATIVE: u8 = 6;
const UNARY: u8 = 7;
const ATOM: u8 = 8;

/// SQL text plus the parameters it references, in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedSql {
    pub sql: String,
    pub parameters: Vec<SqlParameter>,
}

pub fn render(statement: &SqlStatement, dialect: &dyn SqlDialect) -> Result<RenderedSql> {
    let mut renderer = Renderer {
        dialect,
        parameters: Vec::new(),
    };
    let sql = renderer.statement(statement)?;
    debug!(
        dialect = dialect.name(),
        parameters = renderer.parameters.len(),
        "rendered statement"
    );
    Ok(RenderedSql {
        sql,
        parameters: renderer.parameters,
    })
}

fn binary_precedence(op: BinaryOperator) -> u8 {
    match op {
        BinaryOperator::Or => OR,
        BinaryOperator::And => AND,
        BinaryOperator::Eq
        | BinaryOperator::NotEq
        | BinaryOperator::Lt
        | BinaryOperator::LtEq
        | BinaryOperator::Gt
        | BinaryOperator::GtEq
        | BinaryOperator::Like => COMPARISON,
        BinaryOperator::Plus | BinaryOperator::Minus | BinaryOperator::Concat => ADDITIVE,
        BinaryOperator::Multiply | BinaryOperator::Divide | BinaryOperator::Modulo => MULTIPLICATIVE,
    }
}

/// Binding strength of `expr` rendered as a value. Predicates render as a
/// CASE or a parenthesized condition, both atomic.
fn value_precedence(expr: &SqlExpr) -> u8 {
    match expr {
        e if e.is_predicate() => ATOM,
        SqlExpr::Binary { op, .. } => binary_precedence(*op),
        SqlExpr::Unary { .. } => UNARY,
        _ => ATOM,
    }
}

fn condition_precedence(expr: &SqlExpr) -> u8 {
    match expr {
        SqlExpr::Binary { op, .. } if op.is_predicate() => binary_precedence(*op),
        SqlExpr::Unary {
            op: UnaryOperator::Not,
            ..
        } => NOT,
        _ => COMPARISON,
    }
}

/// Scalar members of a composite key, or the key itself.
fn leaves(expr: &SqlExpr) -> Vec<&SqlExpr> {
    match expr {
        SqlExpr::Composite(c) => c.entries().iter().flat_map(|(_, e)| leaves(e)).collect(),
        other => vec![other],
    }
}

fn cte_name(alias: Alias) -> String {
    format!("cte{}", alias.0)
}

fn quote_string(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

struct Renderer<'d> {
    dialect: &'d dyn SqlDialect,
    parameters: Vec<SqlParameter>,
}

impl Renderer<'_> {
    fn statement(&mut self, statement: &SqlStatement) -> Result<String> {
        let mut parts = Vec::new();
        if let Some(with) = self.with_clause(&statement.ctes)? {
            parts.push(with);
        }
        parts.push(match &statement.body {
            StatementBody::Query(query) => self.query(query, false)?,
            StatementBody::Update(update) => self.update(update)?,
            StatementBody::Delete(delete) => self.delete(delete)?,
        });
        Ok(parts.join(" "))
    }

    fn with_clause(&mut self, ctes: &[SqlCte]) -> Result<Option<String>> {
        if ctes.is_empty() {
            return Ok(None);
        }
        let keyword = if ctes.iter().any(|c| c.recursive.is_some()) {
            self.dialect.recursive_keyword()
        } else {
            ""
        };
        let mut definitions = Vec::with_capacity(ctes.len());
        for cte in ctes {
            let columns: Vec<String> = cte
                .anchor
                .columns
                .iter()
                .map(|c| self.dialect.quote_identifier(&c.alias))
                .collect();
            let mut body = self.query(&cte.anchor, true)?;
            if let Some(recursive) = &cte.recursive {
                body.push_str(" UNION ALL ");
                body.push_str(&self.query(recursive, true)?);
            }
            definitions.push(format!("{} ({}) AS ({body})", cte_name(cte.alias), columns.join(", ")));
        }
        Ok(Some(format!("WITH {keyword}{}", definitions.join(", "))))
    }

    fn query(&mut self, query: &SqlDerivedTable, nested: bool) -> Result<String> {
        self.select(&query.select, &query.columns, nested)
    }

    fn select(&mut self, select: &SqlSelect, columns: &[OutputColumn], nested: bool) -> Result<String> {
        let mut parts = Vec::new();
        if let Some(with) = self.with_clause(select.ctes())? {
            parts.push(with);
        }
        parts.push("SELECT".to_string());
        if select.is_distinct() {
            parts.push("DISTINCT".to_string());
        }
        let top_in_head = self.dialect.uses_top() && select.skip().is_none();
        if let (Some(top), true) = (select.top(), top_in_head) {
            parts.push(format!("TOP ({})", self.value(top)?));
        }

        let mut items = Vec::with_capacity(columns.len());
        for column in columns {
            let value = self.value(&column.expr)?;
            items.push(format!("{value} AS {}", self.dialect.quote_identifier(&column.alias)));
        }
        if items.is_empty() {
            items.push("1".to_string());
        }
        parts.push(items.join(", "));

        for source in select.sources() {
            parts.push(self.data_source(source)?);
        }
        if let Some(filter) = select.filter() {
            parts.push(format!("WHERE {}", self.condition(filter)?));
        }
        if let Some(key) = select.group_by() {
            let mut keys = Vec::new();
            for leaf in leaves(key) {
                keys.push(self.value(leaf)?);
            }
            parts.push(format!("GROUP BY {}", keys.join(", ")));
        }
        if let Some(having) = select.having() {
            parts.push(format!("HAVING {}", self.condition(having)?));
        }

        let ordered = !select.order_by().is_empty()
            && (!nested || select.is_paged() || self.dialect.orders_unpaged_subqueries());
        if ordered {
            let mut items = Vec::new();
            for item in select.order_by() {
                for leaf in leaves(&item.expr) {
                    let value = self.value(leaf)?;
                    items.push(if item.descending { format!("{value} DESC") } else { value });
                }
            }
            parts.push(format!("ORDER BY {}", items.join(", ")));
        }

        let top = match select.top() {
            Some(top) if !top_in_head => Some(self.value(top)?),
            _ => None,
        };
        let skip = select.skip().map(|s| self.value(s)).transpose()?;
        if let Some(paging) = self.dialect.paging(top.as_deref(), skip.as_deref(), ordered) {
            parts.push(paging);
        }
        Ok(parts.join(" "))
    }

    fn data_source(&mut self, source: &SqlDataSource) -> Result<String> {
        let relation = self.relation(source)?;
        match &source.join {
            None => Ok(format!("FROM {relation}")),
            Some(join) => self.join(join, relation),
        }
    }

    fn relation(&mut self, source: &SqlDataSource) -> Result<String> {
        Ok(format!("{} AS {}", self.source(&source.source)?, source.alias))
    }

    fn join(&mut self, join: &SqlJoin, relation: String) -> Result<String> {
        let (keyword, takes_condition) = self.dialect.join_keyword(join.kind);
        match (&join.condition, takes_condition) {
            (Some(condition), true) => Ok(format!("{keyword} {relation} ON {}", self.condition(condition)?)),
            (None, true) => Ok(format!("{keyword} {relation} ON {}", self.dialect.always_true())),
            (None, false) => Ok(format!("{keyword} {relation}")),
            (Some(_), false) => Err(TranslateError::invalid(format!(
                "{keyword} carries a join condition"
            ))),
        }
    }

    fn source(&mut self, source: &QuerySource) -> Result<String> {
        Ok(match source {
            QuerySource::Table(table) => self.table(&table.name),
            QuerySource::Derived(query) => format!("({})", self.query(query, true)?),
            QuerySource::Union(union) => format!("({})", self.union(union)?),
            QuerySource::Cte { alias, .. } => cte_name(*alias),
        })
    }

    fn table(&self, name: &TableName) -> String {
        let table = self.dialect.quote_identifier(&name.name);
        match &name.schema {
            Some(schema) => format!("{}.{table}", self.dialect.quote_identifier(schema)),
            None => table,
        }
    }

    fn union(&mut self, union: &SqlUnion) -> Result<String> {
        let mut parts = Vec::with_capacity(union.items.len() * 2);
        for (i, item) in union.items.iter().enumerate() {
            if i > 0 {
                parts.push(match item.kind {
                    UnionKind::Union => "UNION".to_string(),
                    UnionKind::UnionAll => "UNION ALL".to_string(),
                });
            }
            parts.push(format!("({})", self.query(&item.query, true)?));
        }
        Ok(parts.join(" "))
    }

    fn update(&mut self, update: &SqlUpdate) -> Result<String> {
        let mut parts = Vec::new();
        if let Some(with) = self.with_clause(update.select.ctes())? {
            parts.push(with);
        }
        if self.dialect.modifies_through_joins() {
            parts.push(format!("UPDATE {}", update.target));
            parts.push(format!("SET {}", self.assignments(&update.assignments)?));
            self.joined_context(&update.select, &mut parts)?;
        } else {
            let split = self.split_target(&update.select, update.target, "UPDATE")?;
            parts.push(format!("UPDATE {}", split.target));
            parts.push(format!("SET {}", self.assignments(&update.assignments)?));
            split.finish("FROM", &mut parts);
        }
        Ok(parts.join(" "))
    }

    fn delete(&mut self, delete: &SqlDelete) -> Result<String> {
        let mut parts = Vec::new();
        if let Some(with) = self.with_clause(delete.select.ctes())? {
            parts.push(with);
        }
        if self.dialect.modifies_through_joins() {
            parts.push(format!("DELETE {}", delete.target));
            self.joined_context(&delete.select, &mut parts)?;
        } else {
            let split = self.split_target(&delete.select, delete.target, "DELETE")?;
            parts.push(format!("DELETE FROM {}", split.target));
            split.finish("USING", &mut parts);
        }
        Ok(parts.join(" "))
    }

    fn assignments(&mut self, assignments: &[(String, SqlExpr)]) -> Result<String> {
        let mut items = Vec::with_capacity(assignments.len());
        for (column, value) in assignments {
            items.push(format!("{} = {}", self.dialect.quote_identifier(column), self.value(value)?));
        }
        Ok(items.join(", "))
    }

    /// `FROM .. JOIN .. WHERE ..` of a modification, kept as joins.
    fn joined_context(&mut self, select: &SqlSelect, parts: &mut Vec<String>) -> Result<()> {
        for source in select.sources() {
            parts.push(self.data_source(source)?);
        }
        if let Some(filter) = select.filter() {
            parts.push(format!("WHERE {}", self.condition(filter)?));
        }
        Ok(())
    }

    /// Pulls the target table out of `select`; every other source becomes a
    /// list entry and every join condition a WHERE conjunct.
    fn split_target(&mut self, select: &SqlSelect, target: Alias, statement: &str) -> Result<SplitTarget> {
        let mut split = SplitTarget::default();
        for source in select.sources() {
            if let Some(join) = &source.join {
                if !matches!(join.kind, JoinKind::Inner | JoinKind::Cross) {
                    return Err(TranslateError::unsupported(format!(
                        "{statement} over a {:?} join in {}",
                        join.kind,
                        self.dialect.name()
                    )));
                }
                if let Some(condition) = &join.condition {
                    split.conditions.push(self.condition_operand(condition, AND)?);
                }
            }
            if source.alias == target {
                let QuerySource::Table(table) = &source.source else {
                    return Err(TranslateError::unsupported(format!("{statement} of a derived table")));
                };
                split.target = format!("{} AS {}", self.table(&table.name), source.alias);
            } else {
                split.others.push(self.relation(source)?);
            }
        }
        if split.target.is_empty() {
            return Err(TranslateError::invalid(format!(
                "{statement} target {target} is not a source of its query"
            )));
        }
        if let Some(filter) = select.filter() {
            split.conditions.push(self.condition_operand(filter, AND)?);
        }
        Ok(split)
    }

    fn condition(&mut self, expr: &SqlExpr) -> Result<String> {
        Ok(match expr {
            SqlExpr::Literal(Literal::Boolean(b)) => self.dialect.boolean_condition(*b).to_string(),
            SqlExpr::Binary {
                op: op @ (BinaryOperator::And | BinaryOperator::Or),
                left,
                right,
            } => {
                let precedence = binary_precedence(*op);
                format!(
                    "{} {} {}",
                    self.condition_operand(left, precedence)?,
                    self.operator(*op),
                    self.condition_operand(right, precedence)?
                )
            }
            SqlExpr::Binary { op, left, right } if op.is_predicate() => {
                let precedence = binary_precedence(*op);
                format!(
                    "{} {} {}",
                    self.operand(left, precedence, false)?,
                    self.operator(*op),
                    self.operand(right, precedence, true)?
                )
            }
            SqlExpr::Unary {
                op: UnaryOperator::Not,
                expr,
            } => format!("NOT {}", self.condition_operand(expr, NOT)?),
            SqlExpr::IsNull { expr, negated } => format!(
                "{} IS {}NULL",
                self.operand(expr, ADDITIVE, false)?,
                if *negated { "NOT " } else { "" }
            ),
            SqlExpr::InValues { values, negated, .. } if values.is_empty() => {
                self.dialect.boolean_condition(*negated).to_string()
            }
            SqlExpr::InValues { expr, values, negated } => format!(
                "{} {}IN ({})",
                self.operand(expr, ADDITIVE, false)?,
                if *negated { "NOT " } else { "" },
                self.values(values)?
            ),
            SqlExpr::Exists(query) => format!("EXISTS ({})", self.query(query, true)?),
            other => {
                let value = self.value(other)?;
                self.dialect.truthy(value)
            }
        })
    }

    fn condition_operand(&mut self, expr: &SqlExpr, parent: u8) -> Result<String> {
        let rendered = self.condition(expr)?;
        if condition_precedence(expr) < parent {
            Ok(format!("({rendered})"))
        } else {
            Ok(rendered)
        }
    }

    fn value(&mut self, expr: &SqlExpr) -> Result<String> {
        if expr.is_predicate() {
            let condition = self.condition(expr)?;
            return Ok(self.dialect.predicate_value(condition));
        }
        Ok(match expr {
            SqlExpr::Column(column) => format!("{}.{}", column.source, self.dialect.quote_identifier(&column.name)),
            SqlExpr::Literal(literal) => self.literal(literal)?,
            SqlExpr::Parameter(parameter) => self.parameter(parameter),
            SqlExpr::List(items) => format!("({})", self.values(items)?),
            SqlExpr::Binary { op, left, right } => {
                let precedence = binary_precedence(*op);
                format!(
                    "{} {} {}",
                    self.operand(left, precedence, false)?,
                    self.operator(*op),
                    self.operand(right, precedence, true)?
                )
            }
            SqlExpr::Unary {
                op: UnaryOperator::Minus,
                expr,
            } => format!("-{}", self.operand(expr, UNARY, false)?),
            SqlExpr::Case {
                test,
                if_true,
                if_false,
            } => format!(
                "CASE WHEN {} THEN {} ELSE {} END",
                self.condition(test)?,
                self.value(if_true)?,
                self.value(if_false)?
            ),
            SqlExpr::Function { name, args } => self.function(name, args)?,
            SqlExpr::Aggregate { func, arg } => self.aggregate(*func, arg.as_deref())?,
            SqlExpr::Cast { expr, data_type } => {
                format!("CAST({} AS {})", self.value(expr)?, self.dialect.data_type(*data_type))
            }
            SqlExpr::DatePart { part, expr } => {
                let expr = self.operand(expr, ATOM, false)?;
                self.dialect.date_part(*part, &expr)
            }
            SqlExpr::DateAdd { part, amount, expr } => {
                let amount = self.operand(amount, ATOM, false)?;
                let expr = self.operand(expr, ATOM, false)?;
                self.dialect.date_add(*part, &amount, &expr)
            }
            SqlExpr::DateDiff { part, start, end } => {
                let start = self.operand(start, ATOM, false)?;
                let end = self.operand(end, ATOM, false)?;
                self.dialect.date_diff(*part, &start, &end)
            }
            SqlExpr::Subquery(query) => format!("({})", self.query(query, true)?),
            SqlExpr::DerivedTable(query) => format!("({})", self.query(query, true)?),
            other => {
                return Err(TranslateError::unsupported(format!(
                    "{} in a value position",
                    other.kind_name()
                )))
            }
        })
    }

    /// Renders `expr` under an operator of `parent` precedence. Right-hand
    /// operands of equal precedence are parenthesized so `a - (b - c)`
    /// keeps its grouping.
    fn operand(&mut self, expr: &SqlExpr, parent: u8, right: bool) -> Result<String> {
        let own = value_precedence(expr);
        let rendered = self.value(expr)?;
        if own < parent || (right && own == parent) {
            Ok(format!("({rendered})"))
        } else {
            Ok(rendered)
        }
    }

    fn values(&mut self, items: &[SqlExpr]) -> Result<String> {
        let mut rendered = Vec::with_capacity(items.len());
        for item in items {
            rendered.push(self.value(item)?);
        }
        Ok(rendered.join(", "))
    }

    fn operator(&self, op: BinaryOperator) -> &'static str {
        match op {
            BinaryOperator::Eq => "=",
            BinaryOperator::NotEq => "<>",
            BinaryOperator::Lt => "<",
            BinaryOperator::LtEq => "<=",
            BinaryOperator::Gt => ">",
            BinaryOperator::GtEq => ">=",
            BinaryOperator::And => "AND",
            BinaryOperator::Or => "OR",
            BinaryOperator::Plus => "+",
            BinaryOperator::Minus => "-",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "/",
            BinaryOperator::Modulo => "%",
            BinaryOperator::Concat => self.dialect.concat_operator(),
            BinaryOperator::Like => "LIKE",
        }
    }

    fn literal(&self, literal: &Literal) -> Result<String> {
        Ok(match literal {
            Literal::Null => "NULL".to_string(),
            Literal::Boolean(b) => self.dialect.boolean(*b).to_string(),
            Literal::Integer(i) => i.to_string(),
            Literal::Float(f) if f.is_finite() => format!("{f:?}"),
            Literal::Float(f) => return Err(TranslateError::unsupported(format!("float literal {f}"))),
            Literal::String(s) => quote_string(s),
            Literal::DateTime(dt) => self.dialect.datetime(dt),
        })
    }

    /// Each distinct parameter is listed once, at its first appearance.
    fn parameter(&mut self, parameter: &SqlParameter) -> String {
        let index = match self.parameters.iter().position(|p| p.name == parameter.name) {
            Some(i) => i + 1,
            None => {
                self.parameters.push(parameter.clone());
                self.parameters.len()
            }
        };
        self.dialect.parameter(&parameter.name, index)
    }

    fn function(&mut self, name: &str, args: &[SqlExpr]) -> Result<String> {
        if args.is_empty() {
            if let Some(niladic) = self.dialect.niladic(name) {
                return Ok(niladic.to_string());
            }
        }
        Ok(format!("{}({})", self.dialect.function_name(name), self.values(args)?))
    }

    fn aggregate(&mut self, func: AggregateFunction, arg: Option<&SqlExpr>) -> Result<String> {
        let name = match func {
            AggregateFunction::Count => "COUNT",
            AggregateFunction::CountBig => self.dialect.count_big(),
            AggregateFunction::Sum => "SUM",
            AggregateFunction::Min => "MIN",
            AggregateFunction::Max => "MAX",
            AggregateFunction::Avg => "AVG",
        };
        let arg = match arg {
            Some(arg) => self.value(arg)?,
            None if matches!(func, AggregateFunction::Count | AggregateFunction::CountBig) => "*".to_string(),
            None => return Err(TranslateError::unsupported(format!("{name} without an argument"))),
        };
        Ok(format!("{name}({arg})"))
    }
}

/// A modification split into its target table, the other sources and the
/// conditions that tie them together.
#[derive(Default)]
struct SplitTarget {
    target: String,
    others: Vec<String>,
    conditions: Vec<String>,
}

impl SplitTarget {
    fn finish(self, list_keyword: &str, parts: &mut Vec<String>) {
        if !self.others.is_empty() {
            parts.push(format!("{list_keyword} {}", self.others.join(", ")));
        }
        if !self.conditions.is_empty() {
            parts.push(format!("WHERE {}", self.conditions.join(" AND ")));
        }
    }
}

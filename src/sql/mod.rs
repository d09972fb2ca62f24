//! SQL expression tree produced by the converters.
//!
//! This is the output representation: the renderer turns it into SQL text
//! and the translator hands it back to callers that want to post-process
//! the statement. The tree is designed to be:
//! - Alias-addressed (columns name their data source by [`Alias`], never by
//!   table name)
//! - Clone-friendly (column nodes are shared through `Rc`)
//! - Closed (every node kind the converters produce is a variant here)

pub mod factory;
pub mod select;
pub mod visit;

use std::fmt;
use std::rc::Rc;

use chrono::NaiveDateTime;

use crate::binding::ModelPath;
use crate::expr::Value;
use crate::model::TableName;

pub use factory::{DefaultSqlFactory, SqlFactory};
pub use select::{Operation, SqlSelect};

/// Stable per-compilation identifier for data sources, derived tables and
/// CTEs. Rendered as `a{n}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Alias(pub u32);

impl fmt::Display for Alias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a{}", self.0)
    }
}

/// A node in the SQL tree.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlExpr {
    /// Stand-in for a child whose value was moved elsewhere.
    Placeholder,
    /// A bare table that has not been placed into a SELECT yet.
    Table(SqlTable),
    /// A select still accepting chained operators.
    Select(Box<SqlSelect>),
    /// A closed select with a fixed output column list.
    DerivedTable(SqlDerivedTable),
    Union(SqlUnion),
    /// A whole data source (row) of some select.
    DataSourceRef(Alias),
    Column(Rc<SqlColumn>),
    /// A multi-column value such as an anonymous object.
    Composite(SqlComposite),
    /// The lambda view of a grouped select: key plus element shape.
    Grouping(SqlGrouping),
    /// A sequence-valued member: correlated rows produced by a subquery.
    Queryable(Box<SqlDerivedTable>),
    Literal(Literal),
    Parameter(SqlParameter),
    List(Vec<SqlExpr>),
    Binary {
        op: BinaryOperator,
        left: Box<SqlExpr>,
        right: Box<SqlExpr>,
    },
    Unary {
        op: UnaryOperator,
        expr: Box<SqlExpr>,
    },
    IsNull {
        expr: Box<SqlExpr>,
        negated: bool,
    },
    /// `CASE WHEN test THEN if_true ELSE if_false END`
    Case {
        test: Box<SqlExpr>,
        if_true: Box<SqlExpr>,
        if_false: Box<SqlExpr>,
    },
    Function {
        name: String,
        args: Vec<SqlExpr>,
    },
    Aggregate {
        func: AggregateFunction,
        arg: Option<Box<SqlExpr>>,
    },
    Cast {
        expr: Box<SqlExpr>,
        data_type: DataType,
    },
    DatePart {
        part: DatePart,
        expr: Box<SqlExpr>,
    },
    DateAdd {
        part: DatePart,
        amount: Box<SqlExpr>,
        expr: Box<SqlExpr>,
    },
    /// Whole `part` units from `start` to `end`.
    DateDiff {
        part: DatePart,
        start: Box<SqlExpr>,
        end: Box<SqlExpr>,
    },
    InValues {
        expr: Box<SqlExpr>,
        values: Vec<SqlExpr>,
        negated: bool,
    },
    Exists(Box<SqlDerivedTable>),
    /// Scalar subquery.
    Subquery(Box<SqlDerivedTable>),
    Update(Box<SqlUpdate>),
    Delete(Box<SqlDelete>),
}

/// A column of a data source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SqlColumn {
    pub source: Alias,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlTable {
    pub entity: String,
    pub name: TableName,
}

/// Ordered `path -> expression` entries.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SqlComposite {
    entries: Vec<(ModelPath, SqlExpr)>,
}

impl SqlComposite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, path: ModelPath, expr: SqlExpr) {
        self.entries.push((path, expr));
    }

    /// Adds `expr` under `member`, flattening nested composites so every
    /// entry is a leaf.
    pub fn insert_member(&mut self, member: &str, expr: SqlExpr) {
        match expr {
            SqlExpr::Composite(inner) => {
                for (path, leaf) in inner.entries {
                    self.entries.push((path.prepend(member), leaf));
                }
            }
            other => self.entries.push((ModelPath::single(member), other)),
        }
    }

    pub fn entries(&self) -> &[(ModelPath, SqlExpr)] {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut [(ModelPath, SqlExpr)] {
        &mut self.entries
    }

    pub fn into_entries(self) -> Vec<(ModelPath, SqlExpr)> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Member lookup: the exact `[member]` entry, or a composite of every
    /// entry under that prefix.
    pub fn member(&self, member: &str) -> Option<SqlExpr> {
        let key = ModelPath::single(member);
        if let Some((_, e)) = self.entries.iter().find(|(p, _)| *p == key) {
            return Some(e.clone());
        }
        let nested: Vec<(ModelPath, SqlExpr)> = self
            .entries
            .iter()
            .filter_map(|(p, e)| p.strip_prefix(&key).map(|rest| (rest, e.clone())))
            .collect();
        if nested.is_empty() {
            None
        } else {
            Some(SqlExpr::Composite(SqlComposite { entries: nested }))
        }
    }
}

impl FromIterator<(ModelPath, SqlExpr)> for SqlComposite {
    fn from_iter<I: IntoIterator<Item = (ModelPath, SqlExpr)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqlGrouping {
    pub key: Box<SqlExpr>,
    pub element: Box<SqlExpr>,
}

/// A closed select.
///
/// `id` identifies the derived table across clones: the recursive-union
/// converter finds the anchor snapshot inside the recursive query by it.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlDerivedTable {
    pub id: Alias,
    pub select: Box<SqlSelect>,
    pub columns: Vec<OutputColumn>,
}

impl SqlDerivedTable {
    /// `path -> column alias` pairs exposed to outer queries.
    pub fn column_paths(&self) -> Vec<(ModelPath, String)> {
        self.columns
            .iter()
            .map(|c| (c.path.clone(), c.alias.clone()))
            .collect()
    }

    /// The entity whose whole rows this table returns, if any.
    pub fn row_entity(&self) -> Option<&str> {
        self.select.row_entity()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputColumn {
    pub path: ModelPath,
    pub alias: String,
    pub expr: SqlExpr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnionKind {
    Union,
    UnionAll,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnionItem {
    pub query: SqlDerivedTable,
    /// How this item combines with the items before it. Ignored on the
    /// first item.
    pub kind: UnionKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqlUnion {
    pub items: Vec<UnionItem>,
}

impl SqlUnion {
    pub fn column_paths(&self) -> Vec<(ModelPath, String)> {
        self.items
            .first()
            .map(|i| i.query.column_paths())
            .unwrap_or_default()
    }

    /// The shared row entity when every item returns whole rows of it.
    pub fn row_entity(&self) -> Option<&str> {
        let first = self.items.first()?.query.row_entity()?;
        self.items
            .iter()
            .all(|i| i.query.row_entity() == Some(first))
            .then_some(first)
    }
}

/// A common table expression. `recursive` is unioned (ALL) onto `anchor`.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlCte {
    pub alias: Alias,
    pub anchor: SqlDerivedTable,
    pub recursive: Option<SqlDerivedTable>,
}

/// What a FROM/JOIN entry reads from.
#[derive(Debug, Clone, PartialEq)]
pub enum QuerySource {
    Table(SqlTable),
    Derived(SqlDerivedTable),
    Union(SqlUnion),
    /// Reference to a CTE by its alias; `columns` mirror the anchor.
    Cte {
        alias: Alias,
        columns: Vec<(ModelPath, String)>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    FullOuter,
    Cross,
    CrossApply,
    OuterApply,
}

impl JoinKind {
    /// Joins whose right side may produce NULL rows.
    pub fn is_outer(self) -> bool {
        matches!(
            self,
            JoinKind::Left | JoinKind::Right | JoinKind::FullOuter | JoinKind::OuterApply
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqlJoin {
    pub kind: JoinKind,
    pub condition: Option<SqlExpr>,
}

/// Records which navigation produced a join, for de-duplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NavigationTag {
    pub parent: Alias,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqlDataSource {
    pub alias: Alias,
    pub source: QuerySource,
    /// `None` for the initial data source.
    pub join: Option<SqlJoin>,
    pub navigation: Option<NavigationTag>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderItem {
    pub expr: SqlExpr,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqlParameter {
    pub name: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    DateTime(NaiveDateTime),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperator {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
    /// String concatenation.
    Concat,
    Like,
}

impl BinaryOperator {
    pub fn is_predicate(self) -> bool {
        matches!(
            self,
            BinaryOperator::Eq
                | BinaryOperator::NotEq
                | BinaryOperator::Lt
                | BinaryOperator::LtEq
                | BinaryOperator::Gt
                | BinaryOperator::GtEq
                | BinaryOperator::And
                | BinaryOperator::Or
                | BinaryOperator::Like
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOperator {
    Not,
    Minus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateFunction {
    Count,
    CountBig,
    Sum,
    Min,
    Max,
    Avg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Boolean,
    Integer,
    BigInt,
    Decimal,
    Float,
    Text,
    DateTime,
    Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatePart {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
    Millisecond,
}

impl DatePart {
    pub fn name(self) -> &'static str {
        match self {
            DatePart::Year => "year",
            DatePart::Month => "month",
            DatePart::Day => "day",
            DatePart::Hour => "hour",
            DatePart::Minute => "minute",
            DatePart::Second => "second",
            DatePart::Millisecond => "millisecond",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqlUpdate {
    /// Data source whose table receives the assignments.
    pub target: Alias,
    /// FROM/JOIN/WHERE context; projection is unused.
    pub select: SqlSelect,
    /// `(column, value)`
    pub assignments: Vec<(String, SqlExpr)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqlDelete {
    pub target: Alias,
    pub select: SqlSelect,
}

/// A complete statement ready for rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    /// Hoisted common table expressions, dependencies first.
    pub ctes: Vec<SqlCte>,
    pub body: StatementBody,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatementBody {
    Query(SqlDerivedTable),
    Update(SqlUpdate),
    Delete(SqlDelete),
}

impl SqlExpr {
    pub fn kind_name(&self) -> &'static str {
        match self {
            SqlExpr::Placeholder => "placeholder",
            SqlExpr::Table(_) => "table",
            SqlExpr::Select(_) => "select",
            SqlExpr::DerivedTable(_) => "derived table",
            SqlExpr::Union(_) => "union",
            SqlExpr::DataSourceRef(_) => "data source reference",
            SqlExpr::Column(_) => "column",
            SqlExpr::Composite(_) => "composite",
            SqlExpr::Grouping(_) => "grouping",
            SqlExpr::Queryable(_) => "queryable",
            SqlExpr::Literal(_) => "literal",
            SqlExpr::Parameter(_) => "parameter",
            SqlExpr::List(_) => "list",
            SqlExpr::Binary { .. } => "binary",
            SqlExpr::Unary { .. } => "unary",
            SqlExpr::IsNull { .. } => "is null",
            SqlExpr::Case { .. } => "case",
            SqlExpr::Function { .. } => "function",
            SqlExpr::Aggregate { .. } => "aggregate",
            SqlExpr::Cast { .. } => "cast",
            SqlExpr::DatePart { .. } => "date part",
            SqlExpr::DateAdd { .. } => "date add",
            SqlExpr::DateDiff { .. } => "date diff",
            SqlExpr::InValues { .. } => "in values",
            SqlExpr::Exists(_) => "exists",
            SqlExpr::Subquery(_) => "subquery",
            SqlExpr::Update(_) => "update",
            SqlExpr::Delete(_) => "delete",
        }
    }

    pub fn column(source: Alias, name: impl Into<String>) -> SqlExpr {
        SqlExpr::Column(Rc::new(SqlColumn {
            source,
            name: name.into(),
        }))
    }

    pub fn binary(op: BinaryOperator, left: SqlExpr, right: SqlExpr) -> SqlExpr {
        SqlExpr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Converts a closed query used in a value position into a scalar
    /// subquery. Everything else is returned unchanged.
    pub fn into_scalar(self) -> SqlExpr {
        match self {
            SqlExpr::DerivedTable(dt) => SqlExpr::Subquery(Box::new(dt)),
            other => other,
        }
    }

    /// Whether this is a data source, or a composite of nothing but data
    /// sources. Such shapes only re-label rows and never force a wrap.
    pub fn is_reference_shape(&self) -> bool {
        match self {
            SqlExpr::DataSourceRef(_) => true,
            SqlExpr::Composite(c) => {
                !c.is_empty() && c.entries().iter().all(|(_, e)| e.is_reference_shape())
            }
            _ => false,
        }
    }

    /// Whether the expression evaluates to a boolean condition.
    pub fn is_predicate(&self) -> bool {
        match self {
            SqlExpr::Binary { op, .. } => op.is_predicate(),
            SqlExpr::Unary {
                op: UnaryOperator::Not,
                ..
            } => true,
            SqlExpr::IsNull { .. } | SqlExpr::InValues { .. } | SqlExpr::Exists(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(a: u32, name: &str) -> SqlExpr {
        SqlExpr::column(Alias(a), name)
    }

    #[test]
    fn test_composite_member_exact_and_prefix() {
        let mut inner = SqlComposite::new();
        inner.push(ModelPath::single("Id"), col(1, "Id"));
        inner.push(ModelPath::single("Name"), col(1, "Name"));

        let mut outer = SqlComposite::new();
        outer.insert_member("Student", SqlExpr::Composite(inner));
        outer.insert_member("Grade", col(2, "Grade"));

        assert_eq!(outer.len(), 3);
        assert_eq!(outer.member("Grade"), Some(col(2, "Grade")));
        match outer.member("Student") {
            Some(SqlExpr::Composite(c)) => {
                assert_eq!(c.len(), 2);
                assert_eq!(c.member("Name"), Some(col(1, "Name")));
            }
            other => panic!("expected composite, got {other:?}"),
        }
        assert_eq!(outer.member("Nope"), None);
    }

    #[test]
    fn test_prefix_match_is_segment_wise() {
        let mut c = SqlComposite::new();
        c.push(ModelPath::from_dotted("Ab.C"), col(1, "C"));
        assert!(c.member("A").is_none());
        assert!(c.member("Ab").is_some());
    }

    #[test]
    fn test_reference_shape_detection() {
        let mut c = SqlComposite::new();
        c.push(ModelPath::single("a"), SqlExpr::DataSourceRef(Alias(1)));
        c.push(ModelPath::single("b"), SqlExpr::DataSourceRef(Alias(2)));
        assert!(SqlExpr::Composite(c.clone()).is_reference_shape());

        c.push(ModelPath::single("x"), col(1, "X"));
        assert!(!SqlExpr::Composite(c).is_reference_shape());
        assert!(!SqlExpr::Composite(SqlComposite::new()).is_reference_shape());
    }

    #[test]
    fn test_alias_display() {
        assert_eq!(Alias(7).to_string(), "a7");
    }
}

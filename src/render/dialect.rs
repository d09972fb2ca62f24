//! Vendor differences the renderer delegates to.

use chrono::NaiveDateTime;

use crate::config::DialectKind;
use crate::sql::{DataType, DatePart, JoinKind};

/// Identifier quoting, paging, APPLY syntax and date functions of one SQL
/// vendor. Everything else is rendered the same for every dialect.
pub trait SqlDialect {
    fn name(&self) -> &'static str;

    fn quote_identifier(&self, ident: &str) -> String;

    /// Placeholder for the `index`-th (1-based) distinct parameter.
    fn parameter(&self, name: &str, index: usize) -> String;

    fn boolean(&self, value: bool) -> &'static str;

    /// A boolean literal in a condition position.
    fn boolean_condition(&self, value: bool) -> &'static str;

    /// Turns a boolean-valued expression into a condition.
    fn truthy(&self, rendered: String) -> String;

    fn datetime(&self, value: &NaiveDateTime) -> String;

    /// `JOIN` keyword sequence for `kind` and whether it takes an ON clause.
    fn join_keyword(&self, kind: JoinKind) -> (&'static str, bool);

    /// Condition used when a join that needs one has none.
    fn always_true(&self) -> &'static str;

    fn concat_operator(&self) -> &'static str;

    fn function_name<'a>(&self, name: &'a str) -> &'a str;

    /// A zero-argument function such as the current timestamp.
    fn niladic(&self, name: &str) -> Option<&'static str>;

    fn count_big(&self) -> &'static str;

    fn data_type(&self, data_type: DataType) -> &'static str;

    fn date_part(&self, part: DatePart, expr: &str) -> String;

    fn date_add(&self, part: DatePart, amount: &str, expr: &str) -> String;

    fn date_diff(&self, part: DatePart, start: &str, end: &str) -> String;

    /// A condition used where a value is expected.
    fn predicate_value(&self, condition: String) -> String;

    /// Whether a take without a skip renders as `TOP (n)` after `SELECT`.
    fn uses_top(&self) -> bool;

    /// Whether UPDATE/DELETE may carry the query's joins verbatim. When
    /// false the other sources become a plain FROM/USING list and their
    /// join conditions move to WHERE.
    fn modifies_through_joins(&self) -> bool;

    /// Trailing paging clause. `ordered` tells whether an ORDER BY precedes it.
    fn paging(&self, top: Option<&str>, skip: Option<&str>, ordered: bool) -> Option<String>;

    /// Whether a subquery may keep an ORDER BY without paging.
    fn orders_unpaged_subqueries(&self) -> bool;

    /// Keyword after WITH when any CTE is recursive.
    fn recursive_keyword(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SqlServerDialect;

impl SqlDialect for SqlServerDialect {
    fn name(&self) -> &'static str {
        "sqlserver"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        format!("[{}]", ident.replace(']', "]]"))
    }

    fn parameter(&self, name: &str, _: usize) -> String {
        format!("@{name}")
    }

    fn boolean(&self, value: bool) -> &'static str {
        if value {
            "1"
        } else {
            "0"
        }
    }

    fn boolean_condition(&self, value: bool) -> &'static str {
        if value {
            "1 = 1"
        } else {
            "1 = 0"
        }
    }

    fn truthy(&self, rendered: String) -> String {
        format!("{rendered} = 1")
    }

    fn datetime(&self, value: &NaiveDateTime) -> String {
        format!("'{}'", value.format("%Y-%m-%dT%H:%M:%S%.3f"))
    }

    fn join_keyword(&self, kind: JoinKind) -> (&'static str, bool) {
        match kind {
            JoinKind::Inner => ("INNER JOIN", true),
            JoinKind::Left => ("LEFT JOIN", true),
            JoinKind::Right => ("RIGHT JOIN", true),
            JoinKind::FullOuter => ("FULL OUTER JOIN", true),
            JoinKind::Cross => ("CROSS JOIN", false),
            JoinKind::CrossApply => ("CROSS APPLY", false),
            JoinKind::OuterApply => ("OUTER APPLY", false),
        }
    }

    fn always_true(&self) -> &'static str {
        "1 = 1"
    }

    fn concat_operator(&self) -> &'static str {
        "+"
    }

    fn function_name<'a>(&self, name: &'a str) -> &'a str {
        name
    }

    fn niladic(&self, name: &str) -> Option<&'static str> {
        match name {
            "CURRENT_TIMESTAMP" => Some("GETDATE()"),
            "CURRENT_UTC_TIMESTAMP" => Some("GETUTCDATE()"),
            "CURRENT_DATE" => Some("CAST(GETDATE() AS DATE)"),
            _ => None,
        }
    }

    fn count_big(&self) -> &'static str {
        "COUNT_BIG"
    }

    fn data_type(&self, data_type: DataType) -> &'static str {
        match data_type {
            DataType::Boolean => "BIT",
            DataType::Integer => "INT",
            DataType::BigInt => "BIGINT",
            DataType::Decimal => "DECIMAL(38, 10)",
            DataType::Float => "FLOAT",
            DataType::Text => "NVARCHAR(MAX)",
            DataType::DateTime => "DATETIME2",
            DataType::Uuid => "UNIQUEIDENTIFIER",
        }
    }

    fn date_part(&self, part: DatePart, expr: &str) -> String {
        format!("DATEPART({}, {expr})", part.name())
    }

    fn date_add(&self, part: DatePart, amount: &str, expr: &str) -> String {
        format!("DATEADD({}, {amount}, {expr})", part.name())
    }

    fn date_diff(&self, part: DatePart, start: &str, end: &str) -> String {
        format!("DATEDIFF({}, {start}, {end})", part.name())
    }

    fn predicate_value(&self, condition: String) -> String {
        format!("CASE WHEN {condition} THEN 1 ELSE 0 END")
    }

    fn uses_top(&self) -> bool {
        true
    }

    fn modifies_through_joins(&self) -> bool {
        true
    }

    fn paging(&self, top: Option<&str>, skip: Option<&str>, ordered: bool) -> Option<String> {
        let skip = skip?;
        let mut clause = String::new();
        if !ordered {
            clause.push_str("ORDER BY (SELECT NULL) ");
        }
        clause.push_str(&format!("OFFSET {skip} ROWS"));
        if let Some(top) = top {
            clause.push_str(&format!(" FETCH NEXT {top} ROWS ONLY"));
        }
        Some(clause)
    }

    fn orders_unpaged_subqueries(&self) -> bool {
        false
    }

    fn recursive_keyword(&self) -> &'static str {
        ""
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
    fn field(part: DatePart) -> &'static str {
        match part {
            DatePart::Year => "YEAR",
            DatePart::Month => "MONTH",
            DatePart::Day => "DAY",
            DatePart::Hour => "HOUR",
            DatePart::Minute => "MINUTE",
            DatePart::Second => "SECOND",
            DatePart::Millisecond => "MILLISECONDS",
        }
    }
}

impl SqlDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn parameter(&self, _: &str, index: usize) -> String {
        format!("${index}")
    }

    fn boolean(&self, value: bool) -> &'static str {
        if value {
            "TRUE"
        } else {
            "FALSE"
        }
    }

    fn boolean_condition(&self, value: bool) -> &'static str {
        self.boolean(value)
    }

    fn truthy(&self, rendered: String) -> String {
        rendered
    }

    fn datetime(&self, value: &NaiveDateTime) -> String {
        format!("TIMESTAMP '{}'", value.format("%Y-%m-%d %H:%M:%S%.f"))
    }

    fn join_keyword(&self, kind: JoinKind) -> (&'static str, bool) {
        match kind {
            JoinKind::Inner => ("INNER JOIN", true),
            JoinKind::Left => ("LEFT JOIN", true),
            JoinKind::Right => ("RIGHT JOIN", true),
            JoinKind::FullOuter => ("FULL OUTER JOIN", true),
            JoinKind::Cross => ("CROSS JOIN", false),
            JoinKind::CrossApply => ("CROSS JOIN LATERAL", false),
            JoinKind::OuterApply => ("LEFT JOIN LATERAL", true),
        }
    }

    fn always_true(&self) -> &'static str {
        "TRUE"
    }

    fn concat_operator(&self) -> &'static str {
        "||"
    }

    fn function_name<'a>(&self, name: &'a str) -> &'a str {
        match name {
            "LEN" => "LENGTH",
            "CEILING" => "CEIL",
            other => other,
        }
    }

    fn niladic(&self, name: &str) -> Option<&'static str> {
        match name {
            "CURRENT_TIMESTAMP" => Some("CURRENT_TIMESTAMP"),
            "CURRENT_UTC_TIMESTAMP" => Some("(CURRENT_TIMESTAMP AT TIME ZONE 'UTC')"),
            "CURRENT_DATE" => Some("CURRENT_DATE"),
            _ => None,
        }
    }

    fn count_big(&self) -> &'static str {
        "COUNT"
    }

    fn data_type(&self, data_type: DataType) -> &'static str {
        match data_type {
            DataType::Boolean => "BOOLEAN",
            DataType::Integer => "INTEGER",
            DataType::BigInt => "BIGINT",
            DataType::Decimal => "NUMERIC",
            DataType::Float => "DOUBLE PRECISION",
            DataType::Text => "TEXT",
            DataType::DateTime => "TIMESTAMP",
            DataType::Uuid => "UUID",
        }
    }

    fn date_part(&self, part: DatePart, expr: &str) -> String {
        format!("EXTRACT({} FROM {expr})", Self::field(part))
    }

    fn date_add(&self, part: DatePart, amount: &str, expr: &str) -> String {
        format!("({expr} + ({amount}) * INTERVAL '1 {}')", part.name())
    }

    fn date_diff(&self, part: DatePart, start: &str, end: &str) -> String {
        let years = format!("(EXTRACT(YEAR FROM {end}) - EXTRACT(YEAR FROM {start}))");
        let seconds = format!("EXTRACT(EPOCH FROM ({end} - {start}))");
        match part {
            DatePart::Year => years,
            DatePart::Month => {
                format!("({years} * 12 + EXTRACT(MONTH FROM {end}) - EXTRACT(MONTH FROM {start}))")
            }
            DatePart::Day => format!("(CAST({end} AS DATE) - CAST({start} AS DATE))"),
            DatePart::Hour => format!("FLOOR({seconds} / 3600)"),
            DatePart::Minute => format!("FLOOR({seconds} / 60)"),
            DatePart::Second => format!("FLOOR({seconds})"),
            DatePart::Millisecond => format!("FLOOR({seconds} * 1000)"),
        }
    }

    fn predicate_value(&self, condition: String) -> String {
        format!("({condition})")
    }

    fn uses_top(&self) -> bool {
        false
    }

    fn modifies_through_joins(&self) -> bool {
        false
    }

    fn paging(&self, top: Option<&str>, skip: Option<&str>, _: bool) -> Option<String> {
        match (top, skip) {
            (None, None) => None,
            (Some(top), None) => Some(format!("LIMIT {top}")),
            (None, Some(skip)) => Some(format!("OFFSET {skip}")),
            (Some(top), Some(skip)) => Some(format!("LIMIT {top} OFFSET {skip}")),
        }
    }

    fn orders_unpaged_subqueries(&self) -> bool {
        true
    }

    fn recursive_keyword(&self) -> &'static str {
        "RECURSIVE "
    }
}

/// The dialect configured by `kind`.
pub fn dialect(kind: DialectKind) -> Box<dyn SqlDialect> {
    match kind {
        DialectKind::SqlServer => Box::new(SqlServerDialect),
        DialectKind::Postgres => Box::new(PostgresDialect),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_quoting_escapes_delimiters() {
        assert_eq!(SqlServerDialect.quote_identifier("a]b"), "[a]]b]");
        assert_eq!(PostgresDialect.quote_identifier("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_sqlserver_offset_requires_order() {
        let clause = SqlServerDialect.paging(Some("10"), Some("20"), false).unwrap();
        assert_eq!(clause, "ORDER BY (SELECT NULL) OFFSET 20 ROWS FETCH NEXT 10 ROWS ONLY");
        assert_eq!(SqlServerDialect.paging(Some("10"), None, false), None);
    }

    #[test]
    fn test_postgres_limit_offset() {
        assert_eq!(PostgresDialect.paging(Some("5"), Some("10"), true).as_deref(), Some("LIMIT 5 OFFSET 10"));
        assert!(!PostgresDialect.uses_top());
    }

    #[test]
    fn test_date_functions_per_dialect() {
        assert_eq!(SqlServerDialect.date_part(DatePart::Year, "x"), "DATEPART(year, x)");
        assert_eq!(PostgresDialect.date_part(DatePart::Year, "x"), "EXTRACT(YEAR FROM x)");
        assert_eq!(SqlServerDialect.date_add(DatePart::Day, "3", "x"), "DATEADD(day, 3, x)");
    }
}

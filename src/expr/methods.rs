//! Recognized query operators.

use super::MethodCall;

/// Declaring types whose static methods are query operators.
pub const QUERYABLE: &str = "Queryable";
pub const ENUMERABLE: &str = "Enumerable";
/// Operators that only exist as library extensions (joins, paging, CTEs, DML).
pub const QUERY_EXTENSIONS: &str = "QueryExtensions";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryMethod {
    /// `DataSet<T>(provider)` query root.
    DataSet,
    Where,
    Select,
    SelectMany,
    Join,
    GroupJoin,
    InnerJoin,
    LeftJoin,
    RightJoin,
    FullOuterJoin,
    CrossJoin,
    CrossApply,
    OuterApply,
    GroupBy,
    OrderBy,
    OrderByDescending,
    ThenBy,
    ThenByDescending,
    Take,
    Skip,
    Paging,
    Distinct,
    DefaultIfEmpty,
    First,
    FirstOrDefault,
    Single,
    SingleOrDefault,
    Count,
    LongCount,
    Sum,
    Min,
    Max,
    Average,
    Any,
    All,
    Contains,
    Union,
    UnionAll,
    RecursiveUnion,
    Update,
    Delete,
}

impl QueryMethod {
    /// Identifies the operator a call invokes. Only static calls declared on
    /// one of the query operator types qualify.
    pub fn from_call(call: &MethodCall) -> Option<Self> {
        if call.instance.is_some() {
            return None;
        }
        let declaring = call.method.declaring_type.as_str();
        if !matches!(declaring, QUERYABLE | ENUMERABLE | QUERY_EXTENSIONS) {
            return None;
        }
        Self::from_name(&call.method.name)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let method = match name {
            "DataSet" => QueryMethod::DataSet,
            "Where" => QueryMethod::Where,
            "Select" => QueryMethod::Select,
            "SelectMany" => QueryMethod::SelectMany,
            "Join" => QueryMethod::Join,
            "GroupJoin" => QueryMethod::GroupJoin,
            "InnerJoin" => QueryMethod::InnerJoin,
            "LeftJoin" => QueryMethod::LeftJoin,
            "RightJoin" => QueryMethod::RightJoin,
            "FullOuterJoin" => QueryMethod::FullOuterJoin,
            "CrossJoin" => QueryMethod::CrossJoin,
            "CrossApply" => QueryMethod::CrossApply,
            "OuterApply" => QueryMethod::OuterApply,
            "GroupBy" => QueryMethod::GroupBy,
            "OrderBy" => QueryMethod::OrderBy,
            "OrderByDescending" => QueryMethod::OrderByDescending,
            "ThenBy" => QueryMethod::ThenBy,
            "ThenByDescending" => QueryMethod::ThenByDescending,
            "Take" => QueryMethod::Take,
            "Skip" => QueryMethod::Skip,
            "Paging" => QueryMethod::Paging,
            "Distinct" => QueryMethod::Distinct,
            "DefaultIfEmpty" => QueryMethod::DefaultIfEmpty,
            "First" => QueryMethod::First,
            "FirstOrDefault" => QueryMethod::FirstOrDefault,
            "Single" => QueryMethod::Single,
            "SingleOrDefault" => QueryMethod::SingleOrDefault,
            "Count" => QueryMethod::Count,
            "LongCount" => QueryMethod::LongCount,
            "Sum" => QueryMethod::Sum,
            "Min" => QueryMethod::Min,
            "Max" => QueryMethod::Max,
            "Average" => QueryMethod::Average,
            "Any" => QueryMethod::Any,
            "All" => QueryMethod::All,
            "Contains" => QueryMethod::Contains,
            "Union" => QueryMethod::Union,
            "UnionAll" | "Concat" => QueryMethod::UnionAll,
            "RecursiveUnion" => QueryMethod::RecursiveUnion,
            "Update" => QueryMethod::Update,
            "Delete" => QueryMethod::Delete,
            _ => return None,
        };
        Some(method)
    }

    pub fn name(self) -> &'static str {
        match self {
            QueryMethod::DataSet => "DataSet",
            QueryMethod::Where => "Where",
            QueryMethod::Select => "Select",
            QueryMethod::SelectMany => "SelectMany",
            QueryMethod::Join => "Join",
            QueryMethod::GroupJoin => "GroupJoin",
            QueryMethod::InnerJoin => "InnerJoin",
            QueryMethod::LeftJoin => "LeftJoin",
            QueryMethod::RightJoin => "RightJoin",
            QueryMethod::FullOuterJoin => "FullOuterJoin",
            QueryMethod::CrossJoin => "CrossJoin",
            QueryMethod::CrossApply => "CrossApply",
            QueryMethod::OuterApply => "OuterApply",
            QueryMethod::GroupBy => "GroupBy",
            QueryMethod::OrderBy => "OrderBy",
            QueryMethod::OrderByDescending => "OrderByDescending",
            QueryMethod::ThenBy => "ThenBy",
            QueryMethod::ThenByDescending => "ThenByDescending",
            QueryMethod::Take => "Take",
            QueryMethod::Skip => "Skip",
            QueryMethod::Paging => "Paging",
            QueryMethod::Distinct => "Distinct",
            QueryMethod::DefaultIfEmpty => "DefaultIfEmpty",
            QueryMethod::First => "First",
            QueryMethod::FirstOrDefault => "FirstOrDefault",
            QueryMethod::Single => "Single",
            QueryMethod::SingleOrDefault => "SingleOrDefault",
            QueryMethod::Count => "Count",
            QueryMethod::LongCount => "LongCount",
            QueryMethod::Sum => "Sum",
            QueryMethod::Min => "Min",
            QueryMethod::Max => "Max",
            QueryMethod::Average => "Average",
            QueryMethod::Any => "Any",
            QueryMethod::All => "All",
            QueryMethod::Contains => "Contains",
            QueryMethod::Union => "Union",
            QueryMethod::UnionAll => "UnionAll",
            QueryMethod::RecursiveUnion => "RecursiveUnion",
            QueryMethod::Update => "Update",
            QueryMethod::Delete => "Delete",
        }
    }

    pub fn is_aggregate(self) -> bool {
        matches!(
            self,
            QueryMethod::Count
                | QueryMethod::LongCount
                | QueryMethod::Sum
                | QueryMethod::Min
                | QueryMethod::Max
                | QueryMethod::Average
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::build::*;
    use crate::expr::TypeRef;

    #[test]
    fn test_from_call_requires_query_declaring_type() {
        let q = Query::from("Student").take(3).into_expr();
        assert_eq!(q.query_method(), Some(QueryMethod::Take));

        let other = call("Math", "Take", vec![constant(1)], TypeRef::Int);
        assert_eq!(other.query_method(), None);
    }

    #[test]
    fn test_concat_is_union_all() {
        assert_eq!(QueryMethod::from_name("Concat"), Some(QueryMethod::UnionAll));
    }

    #[test]
    fn test_instance_calls_are_not_operators() {
        let s = param("s", TypeRef::String);
        let c = call_instance(QUERYABLE, "Where", p(&s), vec![], TypeRef::Bool);
        assert_eq!(c.query_method(), None);
    }
}

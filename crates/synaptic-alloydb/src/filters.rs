//! Metadata filters compiled to SQL predicates over the JSONB metadata column.
//!
//! Keys and values are always bound as parameters. Values compare as `jsonb`,
//! so `{"page": 3}` matches the number 3 but not the string `"3"`.

use serde_json::Value;
use sqlx::{Postgres, QueryBuilder};

/// Comparison applied between a metadata field and a filter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOperator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    /// Field equals one of the values in an array.
    In,
    /// Field equals none of the values in an array.
    Nin,
    /// Array field contains the value.
    Contains,
    /// `LIKE` against the field's text.
    TextMatch,
    /// `ILIKE` against the field's text.
    TextMatchInsensitive,
    /// Field is missing, null, an empty array or an empty string.
    IsEmpty,
}

/// A single `key <op> value` condition.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataFilter {
    pub key: String,
    pub operator: FilterOperator,
    pub value: Value,
}

impl MetadataFilter {
    pub fn new(key: impl Into<String>, operator: FilterOperator, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            operator,
            value: value.into(),
        }
    }

    pub fn equals(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(key, FilterOperator::Eq, value)
    }
}

/// A tree of metadata conditions.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataFilters {
    Filter(MetadataFilter),
    And(Vec<MetadataFilters>),
    Or(Vec<MetadataFilters>),
}

impl From<MetadataFilter> for MetadataFilters {
    fn from(filter: MetadataFilter) -> Self {
        Self::Filter(filter)
    }
}

impl MetadataFilters {
    /// Conjunction of plain conditions.
    pub fn all(filters: impl IntoIterator<Item = MetadataFilter>) -> Self {
        Self::And(filters.into_iter().map(Self::Filter).collect())
    }

    /// Disjunction of plain conditions.
    pub fn any(filters: impl IntoIterator<Item = MetadataFilter>) -> Self {
        Self::Or(filters.into_iter().map(Self::Filter).collect())
    }

    /// Append this predicate to `qb`. `column` must already be quoted.
    pub(crate) fn push_predicate(&self, qb: &mut QueryBuilder<'_, Postgres>, column: &str) {
        match self {
            Self::Filter(filter) => push_filter(qb, column, filter),
            Self::And(children) => push_group(qb, column, children, " AND ", "TRUE"),
            Self::Or(children) => push_group(qb, column, children, " OR ", "FALSE"),
        }
    }
}

fn push_group(
    qb: &mut QueryBuilder<'_, Postgres>,
    column: &str,
    children: &[MetadataFilters],
    separator: &str,
    empty: &str,
) {
    if children.is_empty() {
        qb.push(empty);
        return;
    }
    qb.push("(");
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            qb.push(separator);
        }
        child.push_predicate(qb, column);
    }
    qb.push(")");
}

fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, column: &str, filter: &MetadataFilter) {
    use FilterOperator::*;

    match filter.operator {
        Eq | Ne | Gt | Gte | Lt | Lte => {
            let op = match filter.operator {
                Eq => "=",
                Ne => "<>",
                Gt => ">",
                Gte => ">=",
                Lt => "<",
                _ => "<=",
            };
            push_field(qb, column, "->", &filter.key);
            qb.push(format!(" {op} "));
            qb.push_bind(filter.value.clone());
        }
        In => {
            push_field(qb, column, "->", &filter.key);
            qb.push(" = ANY(");
            qb.push_bind(as_array(&filter.value));
            qb.push(")");
        }
        Nin => {
            qb.push("NOT COALESCE(");
            push_field(qb, column, "->", &filter.key);
            qb.push(" = ANY(");
            qb.push_bind(as_array(&filter.value));
            qb.push("), FALSE)");
        }
        Contains => {
            push_field(qb, column, "->", &filter.key);
            qb.push(" @> ");
            qb.push_bind(Value::Array(as_array(&filter.value)));
        }
        TextMatch | TextMatchInsensitive => {
            let op = if filter.operator == TextMatch {
                "LIKE"
            } else {
                "ILIKE"
            };
            push_field(qb, column, "->>", &filter.key);
            qb.push(format!(" {op} "));
            qb.push_bind(as_text(&filter.value));
        }
        IsEmpty => {
            qb.push("COALESCE(");
            push_field(qb, column, "->", &filter.key);
            qb.push(" IN ('null'::jsonb, '[]'::jsonb, '\"\"'::jsonb), TRUE)");
        }
    }
}

fn push_field(qb: &mut QueryBuilder<'_, Postgres>, column: &str, arrow: &str, key: &str) {
    qb.push(format!("({column} {arrow} "));
    qb.push_bind(key.to_string());
    qb.push(")");
}

fn as_array(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    }
}

/// String form of a scalar: strings unquoted, everything else as JSON.
pub(crate) fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn compile(filters: &MetadataFilters) -> String {
        let mut qb = QueryBuilder::<Postgres>::new("WHERE ");
        filters.push_predicate(&mut qb, "\"li_metadata\"");
        qb.sql().to_string()
    }

    #[test]
    fn equality_binds_key_and_value() {
        let sql = compile(&MetadataFilter::equals("source", "google.com").into());
        assert_eq!(sql, "WHERE (\"li_metadata\" -> $1) = $2");
    }

    #[test]
    fn comparison_operators() {
        for (op, sql_op) in [
            (FilterOperator::Ne, "<>"),
            (FilterOperator::Gt, ">"),
            (FilterOperator::Gte, ">="),
            (FilterOperator::Lt, "<"),
            (FilterOperator::Lte, "<="),
        ] {
            let sql = compile(&MetadataFilter::new("page", op, 3).into());
            assert_eq!(sql, format!("WHERE (\"li_metadata\" -> $1) {sql_op} $2"));
        }
    }

    #[test]
    fn set_membership() {
        let sql = compile(&MetadataFilter::new("page", FilterOperator::In, json!(["1", "2"])).into());
        assert_eq!(sql, "WHERE (\"li_metadata\" -> $1) = ANY($2)");

        let sql = compile(&MetadataFilter::new("page", FilterOperator::Nin, json!(["1"])).into());
        assert_eq!(
            sql,
            "WHERE NOT COALESCE((\"li_metadata\" -> $1) = ANY($2), FALSE)"
        );
    }

    #[test]
    fn text_matching_uses_text_extraction() {
        let sql = compile(&MetadataFilter::new("source", FilterOperator::TextMatch, "%google%").into());
        assert_eq!(sql, "WHERE (\"li_metadata\" ->> $1) LIKE $2");

        let sql = compile(
            &MetadataFilter::new("source", FilterOperator::TextMatchInsensitive, "%GOOGLE%").into(),
        );
        assert_eq!(sql, "WHERE (\"li_metadata\" ->> $1) ILIKE $2");
    }

    #[test]
    fn contains_and_is_empty() {
        let sql = compile(&MetadataFilter::new("tags", FilterOperator::Contains, "rust").into());
        assert_eq!(sql, "WHERE (\"li_metadata\" -> $1) @> $2");

        let sql = compile(&MetadataFilter::new("tags", FilterOperator::IsEmpty, Value::Null).into());
        assert_eq!(
            sql,
            "WHERE COALESCE((\"li_metadata\" -> $1) IN ('null'::jsonb, '[]'::jsonb, '\"\"'::jsonb), TRUE)"
        );
    }

    #[test]
    fn nested_groups_number_parameters_in_order() {
        let filters = MetadataFilters::And(vec![
            MetadataFilter::equals("source", "google.com").into(),
            MetadataFilters::any([
                MetadataFilter::equals("page", "1"),
                MetadataFilter::equals("page", "2"),
            ]),
        ]);
        assert_eq!(
            compile(&filters),
            "WHERE ((\"li_metadata\" -> $1) = $2 AND ((\"li_metadata\" -> $3) = $4 OR (\"li_metadata\" -> $5) = $6))"
        );
    }

    #[test]
    fn empty_groups_are_constants() {
        assert_eq!(compile(&MetadataFilters::And(vec![])), "WHERE TRUE");
        assert_eq!(compile(&MetadataFilters::Or(vec![])), "WHERE FALSE");
    }

    #[test]
    fn scalar_text_form() {
        assert_eq!(as_text(&json!("a")), "a");
        assert_eq!(as_text(&json!(3)), "3");
        assert_eq!(as_text(&json!(true)), "true");
        assert_eq!(as_array(&json!(1)), vec![json!(1)]);
    }
}

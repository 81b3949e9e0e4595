//! Immutable equality conditions passed explicitly to every query

use sea_orm::sea_query::{Alias, Cond, Expr};

use crate::value::{Row, SqlValue};

/// Conjunction of `column = value` predicates.
///
/// Built per call and never shared; a NULL value matches `IS NULL`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryCondition {
    predicates: Vec<(String, SqlValue)>,
}

impl QueryCondition {
    /// Condition matching every row
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self::all().and_eq(column, value)
    }

    pub fn and_eq(mut self, column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.predicates.push((column.into(), value.into()));
        self
    }

    pub fn predicates(&self) -> &[(String, SqlValue)] {
        &self.predicates
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// Evaluate against an already fetched row
    pub fn matches(&self, row: &Row) -> bool {
        self.predicates
            .iter()
            .all(|(column, value)| row.get(column) == value)
    }

    /// Render as a sea-query condition with bound values
    pub fn to_cond(&self) -> Cond {
        self.predicates
            .iter()
            .fold(Cond::all(), |cond, (column, value)| {
                let col = Expr::col(Alias::new(column.as_str()));
                match value {
                    SqlValue::Null => cond.add(col.is_null()),
                    other => cond.add(col.eq(sea_orm::Value::from(other.clone()))),
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use sea_orm::sea_query::{PostgresQueryBuilder, Query};

    use super::*;

    #[test]
    fn test_builder_is_by_value() {
        let base = QueryCondition::eq("location_id", 12_i64);
        let narrowed = base.clone().and_eq("temperature", 21.5);
        assert_eq!(base.predicates().len(), 1);
        assert_eq!(narrowed.predicates().len(), 2);
    }

    #[test]
    fn test_matches_row() {
        let row = Row::new()
            .with("location_id", 12_i64)
            .with("modified_at", SqlValue::Null);
        assert!(QueryCondition::eq("location_id", 12_i64).matches(&row));
        assert!(!QueryCondition::eq("location_id", 13_i64).matches(&row));
        assert!(QueryCondition::eq("modified_at", SqlValue::Null).matches(&row));
        assert!(QueryCondition::all().matches(&row));
    }

    #[test]
    fn test_renders_bound_parameters() {
        let condition = QueryCondition::eq("location_id", 12_i64).and_eq("note", SqlValue::Null);
        let (sql, values) = Query::select()
            .column(Alias::new("id"))
            .from(Alias::new("reading"))
            .cond_where(condition.to_cond())
            .build(PostgresQueryBuilder);
        assert_eq!(
            sql,
            r#"SELECT "id" FROM "reading" WHERE "location_id" = $1 AND "note" IS NULL"#
        );
        assert_eq!(values.0.len(), 1);
    }
}

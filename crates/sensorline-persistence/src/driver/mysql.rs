//! MySQL dialect
//!
//! Tables are looked up in the connection's `DATABASE()`. Generated keys are
//! read from the last insert id of the statement.

use sea_orm::{DbBackend, Statement};

use super::BackendKind;
use super::sql::{KeyRetrieval, SqlDialect, SqlDriver};

pub struct MySql;

pub type MySqlDriver = SqlDriver<MySql>;

const COLUMNS_SQL: &str = r#"
SELECT CAST(c.column_name AS CHAR) AS column_name,
       CAST(c.data_type AS CHAR) AS data_type,
       CASE WHEN c.is_nullable = 'YES' THEN 1 ELSE 0 END AS nullable,
       CASE WHEN c.column_default IS NOT NULL OR c.extra LIKE '%auto_increment%' THEN 1 ELSE 0 END AS has_default
FROM information_schema.columns c
WHERE c.table_schema = DATABASE()
  AND c.table_name = ?
ORDER BY c.ordinal_position
"#;

const PRIMARY_KEY_SQL: &str = r#"
SELECT CAST(k.column_name AS CHAR) AS column_name
FROM information_schema.key_column_usage k
WHERE k.table_schema = DATABASE()
  AND k.table_name = ?
  AND k.constraint_name = 'PRIMARY'
ORDER BY k.ordinal_position
"#;

impl SqlDialect for MySql {
    const KIND: BackendKind = BackendKind::MySql;
    const DB_BACKEND: DbBackend = DbBackend::MySql;
    const KEY_RETRIEVAL: KeyRetrieval = KeyRetrieval::LastInsertId;

    fn columns_query(table: &str) -> Statement {
        Statement::from_sql_and_values(DbBackend::MySql, COLUMNS_SQL, [table.into()])
    }

    fn primary_key_query(table: &str) -> Statement {
        Statement::from_sql_and_values(DbBackend::MySql, PRIMARY_KEY_SQL, [table.into()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_queries_use_placeholders() {
        let statement = MySql::columns_query("reading");
        assert!(statement.sql.contains("c.table_name = ?"));
        assert_eq!(statement.db_backend, DbBackend::MySql);

        let statement = MySql::primary_key_query("reading");
        assert!(statement.sql.contains("'PRIMARY'"));
        assert_eq!(statement.values.map(|v| v.0.len()), Some(1));
    }
}

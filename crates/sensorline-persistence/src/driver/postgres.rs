//! PostgreSQL dialect
//!
//! Tables are looked up in `current_schema()`. Generated keys come back through
//! `INSERT ... RETURNING`.

use sea_orm::{DbBackend, Statement};

use super::BackendKind;
use super::sql::{KeyRetrieval, SqlDialect, SqlDriver};

pub struct Postgres;

pub type PostgresDriver = SqlDriver<Postgres>;

const COLUMNS_SQL: &str = r#"
SELECT c.column_name::text AS column_name,
       c.data_type::text AS data_type,
       CASE WHEN c.is_nullable = 'YES' THEN 1 ELSE 0 END AS nullable,
       CASE WHEN c.column_default IS NOT NULL OR c.is_identity = 'YES' THEN 1 ELSE 0 END AS has_default
FROM information_schema.columns c
WHERE c.table_schema = current_schema()
  AND c.table_name = $1
ORDER BY c.ordinal_position
"#;

const PRIMARY_KEY_SQL: &str = r#"
SELECT kcu.column_name::text AS column_name
FROM information_schema.table_constraints tc
JOIN information_schema.key_column_usage kcu
  ON tc.constraint_name = kcu.constraint_name
 AND tc.table_schema = kcu.table_schema
 AND tc.table_name = kcu.table_name
WHERE tc.constraint_type = 'PRIMARY KEY'
  AND tc.table_schema = current_schema()
  AND tc.table_name = $1
ORDER BY kcu.ordinal_position
"#;

impl SqlDialect for Postgres {
    const KIND: BackendKind = BackendKind::Postgres;
    const DB_BACKEND: DbBackend = DbBackend::Postgres;
    const KEY_RETRIEVAL: KeyRetrieval = KeyRetrieval::Returning;

    fn columns_query(table: &str) -> Statement {
        Statement::from_sql_and_values(DbBackend::Postgres, COLUMNS_SQL, [table.into()])
    }

    fn primary_key_query(table: &str) -> Statement {
        Statement::from_sql_and_values(DbBackend::Postgres, PRIMARY_KEY_SQL, [table.into()])
    }
}

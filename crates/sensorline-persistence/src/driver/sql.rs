//! SQL backends (PostgreSQL/MySQL via SeaORM)
//!
//! Statements are built with sea-query so identifiers are quoted for the
//! target backend and every value is bound as a parameter. The dialects differ
//! only in catalog queries and in how a generated key is reported.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sea_orm::sea_query::{
    Alias, DeleteStatement, InsertStatement, Query, SelectStatement, SimpleExpr, UpdateStatement,
};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DatabaseTransaction, DbBackend,
    QueryResult, Statement, TransactionTrait,
};
use sensorline_common::DatabaseSettings;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::{
    BackendKind, ColumnInfo, ColumnSpec, ColumnValue, DatabaseDriver, DriverSession, TableInfo,
};
use crate::condition::QueryCondition;
use crate::entity::SemanticType;
use crate::error::PersistError;
use crate::value::{Row, SqlValue};

/// How a backend reports the key generated by an insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRetrieval {
    /// `INSERT ... RETURNING <pk>`
    Returning,
    /// Connection level last insert id
    LastInsertId,
}

/// Backend specific SQL
pub trait SqlDialect: Send + Sync + 'static {
    const KIND: BackendKind;
    const DB_BACKEND: DbBackend;
    const KEY_RETRIEVAL: KeyRetrieval;

    /// Rows of `column_name`, `data_type`, `nullable`, `has_default`
    fn columns_query(table: &str) -> Statement;

    /// Rows of `column_name`, in key order
    fn primary_key_query(table: &str) -> Statement;
}

/// SeaORM backed driver with a lazily opened shared pool
pub struct SqlDriver<D: SqlDialect> {
    settings: DatabaseSettings,
    connection: OnceCell<DatabaseConnection>,
    closed: AtomicBool,
    _dialect: PhantomData<D>,
}

impl<D: SqlDialect> SqlDriver<D> {
    pub fn new(settings: DatabaseSettings) -> Self {
        Self {
            settings,
            connection: OnceCell::new(),
            closed: AtomicBool::new(false),
            _dialect: PhantomData,
        }
    }

    fn connect_options(&self) -> ConnectOptions {
        let pool = &self.settings.pool;
        let mut opt = ConnectOptions::new(self.settings.connection_url());

        opt.max_connections(pool.max_connections)
            .min_connections(pool.min_connections)
            .connect_timeout(pool.connect_timeout)
            .acquire_timeout(pool.acquire_timeout)
            .idle_timeout(pool.idle_timeout)
            .max_lifetime(pool.max_lifetime)
            .sqlx_logging(pool.sqlx_logging);

        opt
    }

    async fn connection(&self) -> Result<&DatabaseConnection, PersistError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PersistError::Connection("connection closed".to_string()));
        }

        self.connection
            .get_or_try_init(|| async {
                info!(
                    backend = %D::KIND,
                    host = %self.settings.host,
                    database = %self.settings.database,
                    "Opening database connection"
                );
                Database::connect(self.connect_options())
                    .await
                    .map_err(|e| PersistError::Connection(e.to_string()))
            })
            .await
    }
}

#[async_trait]
impl<D: SqlDialect> DatabaseDriver for SqlDriver<D> {
    fn backend(&self) -> BackendKind {
        D::KIND
    }

    async fn connect(&self) -> Result<(), PersistError> {
        let connection = self.connection().await?;
        connection
            .ping()
            .await
            .map_err(|e| PersistError::Connection(e.to_string()))
    }

    async fn describe_table(&self, table: &str) -> Result<TableInfo, PersistError> {
        let connection = self.connection().await?;

        let columns = connection
            .query_all(D::columns_query(table))
            .await?
            .iter()
            .map(|row| -> Result<ColumnInfo, PersistError> {
                Ok(ColumnInfo {
                    name: row.try_get::<String>("", "column_name")?.to_lowercase(),
                    data_type: row.try_get::<String>("", "data_type")?.to_lowercase(),
                    nullable: read_flag(row, "nullable")?,
                    has_default: read_flag(row, "has_default")?,
                })
            })
            .collect::<Result<Vec<_>, PersistError>>()?;

        let primary_key = connection
            .query_all(D::primary_key_query(table))
            .await?
            .iter()
            .map(|row| -> Result<String, PersistError> {
                Ok(row.try_get::<String>("", "column_name")?.to_lowercase())
            })
            .collect::<Result<Vec<_>, PersistError>>()?;

        debug!(
            table,
            columns = columns.len(),
            primary_key = ?primary_key,
            "Described table"
        );

        Ok(TableInfo {
            name: table.to_string(),
            columns,
            primary_key,
        })
    }

    async fn begin(&self) -> Result<Box<dyn DriverSession>, PersistError> {
        let txn = self.connection().await?.begin().await?;
        Ok(Box::new(SqlSession {
            txn,
            backend: D::DB_BACKEND,
            key_retrieval: D::KEY_RETRIEVAL,
        }))
    }

    async fn close(&self) -> Result<(), PersistError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(connection) = self.connection.get() {
            connection.clone().close().await?;
            info!(backend = %D::KIND, "Database connection closed");
        }
        Ok(())
    }
}

/// One transaction on a SQL backend
pub struct SqlSession {
    txn: DatabaseTransaction,
    backend: DbBackend,
    key_retrieval: KeyRetrieval,
}

fn bound(value: &ColumnValue) -> SimpleExpr {
    SimpleExpr::Value(value.value.clone().into_db_value(value.semantic))
}

fn select_statement(
    table: &str,
    columns: &[ColumnSpec],
    condition: &QueryCondition,
) -> SelectStatement {
    let mut query = Query::select();
    query.from(Alias::new(table));
    for column in columns {
        query.column(Alias::new(column.name.as_str()));
    }
    query.cond_where(condition.to_cond());
    query
}

/// INSERT of the non-null columns; an empty list inserts database defaults
fn insert_statement(
    table: &str,
    values: &[ColumnValue],
    primary_key: &str,
    key_retrieval: KeyRetrieval,
) -> Result<InsertStatement, PersistError> {
    let mut insert = Query::insert();
    insert.into_table(Alias::new(table));
    if values.is_empty() {
        insert.or_default_values();
    } else {
        insert.columns(values.iter().map(|v| Alias::new(v.name.as_str())));
        insert.values(values.iter().map(bound))?;
    }
    if key_retrieval == KeyRetrieval::Returning {
        insert.returning_col(Alias::new(primary_key));
    }
    Ok(insert)
}

fn update_statement(
    table: &str,
    values: &[ColumnValue],
    condition: &QueryCondition,
) -> Result<UpdateStatement, PersistError> {
    if values.is_empty() {
        return Err(PersistError::Statement(format!(
            "update of '{}' without columns",
            table
        )));
    }

    let mut update = Query::update();
    update
        .table(Alias::new(table))
        .values(
            values
                .iter()
                .map(|v| (Alias::new(v.name.as_str()), bound(v))),
        )
        .cond_where(condition.to_cond());
    Ok(update)
}

fn delete_statement(table: &str, condition: &QueryCondition) -> DeleteStatement {
    let mut delete = Query::delete();
    delete
        .from_table(Alias::new(table))
        .cond_where(condition.to_cond());
    delete
}

#[async_trait]
impl DriverSession for SqlSession {
    async fn select(
        &mut self,
        table: &str,
        columns: &[ColumnSpec],
        condition: &QueryCondition,
    ) -> Result<Vec<Row>, PersistError> {
        let query = select_statement(table, columns, condition);
        let rows = self.txn.query_all(self.backend.build(&query)).await?;
        rows.iter()
            .map(|result| -> Result<Row, PersistError> {
                let mut row = Row::new();
                for column in columns {
                    row.insert(&column.name, decode_value(result, column)?);
                }
                Ok(row)
            })
            .collect()
    }

    async fn insert(
        &mut self,
        table: &str,
        values: &[ColumnValue],
        primary_key: &str,
    ) -> Result<Option<i64>, PersistError> {
        let insert = insert_statement(table, values, primary_key, self.key_retrieval)?;

        match self.key_retrieval {
            KeyRetrieval::Returning => {
                let row = self.txn.query_one(self.backend.build(&insert)).await?;
                match row {
                    Some(row) => {
                        let spec = ColumnSpec::new(primary_key, SemanticType::Integer);
                        Ok(decode_value(&row, &spec)?.as_i64())
                    }
                    None => Ok(None),
                }
            }
            KeyRetrieval::LastInsertId => {
                let result = self.txn.execute(self.backend.build(&insert)).await?;
                let id = result.last_insert_id();
                Ok((id > 0).then_some(id as i64))
            }
        }
    }

    async fn update(
        &mut self,
        table: &str,
        values: &[ColumnValue],
        condition: &QueryCondition,
    ) -> Result<u64, PersistError> {
        let update = update_statement(table, values, condition)?;
        let result = self.txn.execute(self.backend.build(&update)).await?;
        Ok(result.rows_affected())
    }

    async fn delete(
        &mut self,
        table: &str,
        condition: &QueryCondition,
    ) -> Result<u64, PersistError> {
        let delete = delete_statement(table, condition);
        let result = self.txn.execute(self.backend.build(&delete)).await?;
        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<(), PersistError> {
        self.txn.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), PersistError> {
        self.txn.rollback().await?;
        Ok(())
    }
}

// ============================================================================
// Result decoding
// ============================================================================

/// Read a boolean catalog flag; MySQL reports these as integers
fn read_flag(row: &QueryResult, column: &str) -> Result<bool, PersistError> {
    if let Ok(v) = row.try_get::<bool>("", column) {
        return Ok(v);
    }
    if let Ok(v) = row.try_get::<i64>("", column) {
        return Ok(v != 0);
    }
    if let Ok(v) = row.try_get::<i32>("", column) {
        return Ok(v != 0);
    }
    Err(PersistError::decode(column, "expected a boolean flag"))
}

/// Decode one column by its semantic type, accepting the narrower or wider
/// native types each backend may report.
pub(crate) fn decode_value(row: &QueryResult, spec: &ColumnSpec) -> Result<SqlValue, PersistError> {
    let name = spec.name.as_str();
    match spec.semantic {
        SemanticType::Integer => {
            if let Ok(v) = row.try_get::<Option<i64>>("", name) {
                return Ok(v.into());
            }
            if let Ok(v) = row.try_get::<Option<i32>>("", name) {
                return Ok(v.map(i64::from).into());
            }
            if let Ok(v) = row.try_get::<Option<i16>>("", name) {
                return Ok(v.map(i64::from).into());
            }
            if let Ok(v) = row.try_get::<Option<u64>>("", name) {
                return Ok(v.map(|v| v as i64).into());
            }
        }
        SemanticType::Decimal => {
            if let Ok(v) = row.try_get::<Option<f64>>("", name) {
                return Ok(v.into());
            }
            if let Ok(v) = row.try_get::<Option<f32>>("", name) {
                return Ok(v.map(f64::from).into());
            }
            if let Ok(v) = row.try_get::<Option<sea_orm::prelude::Decimal>>("", name) {
                return match v {
                    Some(d) => d
                        .to_string()
                        .parse::<f64>()
                        .map(SqlValue::Decimal)
                        .map_err(|e| PersistError::decode(name, e.to_string())),
                    None => Ok(SqlValue::Null),
                };
            }
        }
        SemanticType::Timestamp => {
            if let Ok(v) = row.try_get::<Option<NaiveDateTime>>("", name) {
                return Ok(v.into());
            }
            if let Ok(v) = row.try_get::<Option<DateTime<Utc>>>("", name) {
                return Ok(v.map(|ts| ts.naive_utc()).into());
            }
        }
        SemanticType::Text => {
            if let Ok(v) = row.try_get::<Option<String>>("", name) {
                return Ok(v.into());
            }
        }
    }

    Err(PersistError::decode(
        name,
        format!("value is not convertible to {}", spec.semantic),
    ))
}

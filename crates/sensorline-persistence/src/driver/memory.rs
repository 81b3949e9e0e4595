//! In-memory backend
//!
//! Tables live in process memory. Transactions are serialized: a session holds
//! the table lock for its lifetime and works on a copy that replaces the
//! shared state on commit. Used by tests and dry runs.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use sea_orm::DbErr;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{
    BackendKind, ColumnSpec, ColumnValue, DatabaseDriver, DriverSession, TableInfo,
};
use crate::condition::QueryCondition;
use crate::entity::SemanticType;
use crate::error::PersistError;
use crate::value::{Row, SqlValue};

/// Row level constraint; returning false rejects the write
pub type CheckFn = fn(&Row) -> bool;

#[derive(Clone)]
struct MemoryTable {
    info: TableInfo,
    rows: Vec<Row>,
    next_id: i64,
    checks: Vec<(String, CheckFn)>,
}

impl MemoryTable {
    fn new(info: TableInfo) -> Self {
        Self {
            info,
            rows: Vec::new(),
            next_id: 1,
            checks: Vec::new(),
        }
    }

    fn primary_key(&self) -> Option<&str> {
        self.info.primary_key.first().map(String::as_str)
    }

    fn validate(&self, row: &Row) -> Result<(), PersistError> {
        for (name, check) in &self.checks {
            if !check(row) {
                return Err(PersistError::Database(DbErr::Custom(format!(
                    "check constraint '{}' violated on '{}'",
                    name, self.info.name
                ))));
            }
        }
        for column in &self.info.columns {
            if !column.nullable && row.get(&column.name).is_null() {
                return Err(PersistError::Database(DbErr::Custom(format!(
                    "null value in column '{}' of '{}' violates not-null constraint",
                    column.name, self.info.name
                ))));
            }
        }
        Ok(())
    }

    fn check_columns<'a>(
        &self,
        names: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), PersistError> {
        for name in names {
            if self.info.column(name).is_none() {
                return Err(PersistError::Database(DbErr::Custom(format!(
                    "column '{}' of '{}' does not exist",
                    name, self.info.name
                ))));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
struct MemoryState {
    tables: BTreeMap<String, MemoryTable>,
}

impl MemoryState {
    fn table_mut(&mut self, name: &str) -> Result<&mut MemoryTable, PersistError> {
        self.tables
            .get_mut(&name.to_lowercase())
            .ok_or_else(|| missing_table(name))
    }

    fn table(&self, name: &str) -> Result<&MemoryTable, PersistError> {
        self.tables
            .get(&name.to_lowercase())
            .ok_or_else(|| missing_table(name))
    }
}

fn missing_table(name: &str) -> PersistError {
    PersistError::Database(DbErr::Custom(format!("relation '{}' does not exist", name)))
}

/// Driver keeping every table in memory
#[derive(Clone, Default)]
pub struct MemoryDriver {
    state: Arc<Mutex<MemoryState>>,
    closed: Arc<AtomicBool>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Driver with every table of the built-in entities created
    pub fn with_known_tables() -> Self {
        let mut state = MemoryState::default();
        let info = crate::entity::reading::reading_table();
        state
            .tables
            .insert(info.name.to_lowercase(), MemoryTable::new(info));
        Self {
            state: Arc::new(Mutex::new(state)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Create (or replace) a table
    pub async fn create_table(&self, info: TableInfo) {
        let mut state = self.state.lock().await;
        state
            .tables
            .insert(info.name.to_lowercase(), MemoryTable::new(info));
    }

    /// Attach a named row check to `table`
    pub async fn add_check(&self, table: &str, name: &str, check: CheckFn) -> Result<(), PersistError> {
        let mut state = self.state.lock().await;
        state
            .table_mut(table)?
            .checks
            .push((name.to_string(), check));
        Ok(())
    }

    /// Snapshot of the committed rows of `table`
    pub async fn rows(&self, table: &str) -> Vec<Row> {
        let state = self.state.lock().await;
        state
            .table(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), PersistError> {
        if self.is_closed() {
            return Err(PersistError::Connection("connection closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DatabaseDriver for MemoryDriver {
    fn backend(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn connect(&self) -> Result<(), PersistError> {
        self.ensure_open()
    }

    async fn describe_table(&self, table: &str) -> Result<TableInfo, PersistError> {
        self.ensure_open()?;
        let state = self.state.lock().await;
        Ok(state
            .table(table)
            .map(|t| t.info.clone())
            .unwrap_or_else(|_| TableInfo {
                name: table.to_string(),
                ..TableInfo::default()
            }))
    }

    async fn begin(&self) -> Result<Box<dyn DriverSession>, PersistError> {
        self.ensure_open()?;
        let guard = self.state.clone().lock_owned().await;
        let working = (*guard).clone();
        Ok(Box::new(MemorySession { guard, working }))
    }

    async fn close(&self) -> Result<(), PersistError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Serialized transaction over the in-memory tables
pub struct MemorySession {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

#[async_trait]
impl DriverSession for MemorySession {
    async fn select(
        &mut self,
        table: &str,
        columns: &[ColumnSpec],
        condition: &QueryCondition,
    ) -> Result<Vec<Row>, PersistError> {
        let table = self.working.table(table)?;
        table.check_columns(columns.iter().map(|c| c.name.as_str()))?;
        table.check_columns(condition.predicates().iter().map(|(c, _)| c.as_str()))?;

        Ok(table
            .rows
            .iter()
            .filter(|row| condition.matches(row))
            .map(|row| {
                let mut projected = Row::new();
                for column in columns {
                    projected.insert(&column.name, row.get(&column.name).clone());
                }
                projected
            })
            .collect())
    }

    async fn insert(
        &mut self,
        table: &str,
        values: &[ColumnValue],
        primary_key: &str,
    ) -> Result<Option<i64>, PersistError> {
        let now = chrono::Local::now().naive_local();
        let table = self.working.table_mut(table)?;
        table.check_columns(values.iter().map(|v| v.name.as_str()))?;

        let mut row = Row::new();
        for value in values {
            row.insert(&value.name, coerce(value));
        }

        let mut generated = None;
        for column in &table.info.columns {
            if row.contains(&column.name) || !column.has_default {
                continue;
            }
            if table
                .primary_key()
                .is_some_and(|pk| pk.eq_ignore_ascii_case(&column.name))
            {
                let id = table.next_id;
                row.insert(&column.name, SqlValue::Integer(id));
                generated = Some(id);
            } else {
                row.insert(&column.name, SqlValue::Timestamp(now));
            }
        }

        let key = row.get(primary_key).clone();
        if !key.is_null()
            && table
                .rows
                .iter()
                .any(|existing| existing.get(primary_key) == &key)
        {
            return Err(PersistError::Database(DbErr::Custom(format!(
                "duplicate key value violates primary key of '{}'",
                table.info.name
            ))));
        }
        table.validate(&row)?;

        if let Some(id) = key.as_i64() {
            table.next_id = table.next_id.max(id + 1);
        }
        table.rows.push(row);
        Ok(generated.or(key.as_i64()))
    }

    async fn update(
        &mut self,
        table: &str,
        values: &[ColumnValue],
        condition: &QueryCondition,
    ) -> Result<u64, PersistError> {
        let table = self.working.table_mut(table)?;
        table.check_columns(values.iter().map(|v| v.name.as_str()))?;

        let mut updated = Vec::with_capacity(table.rows.len());
        let mut affected = 0;
        for row in &table.rows {
            if condition.matches(row) {
                let mut next = row.clone();
                for value in values {
                    next.insert(&value.name, coerce(value));
                }
                table.validate(&next)?;
                updated.push(next);
                affected += 1;
            } else {
                updated.push(row.clone());
            }
        }
        table.rows = updated;
        Ok(affected)
    }

    async fn delete(
        &mut self,
        table: &str,
        condition: &QueryCondition,
    ) -> Result<u64, PersistError> {
        let table = self.working.table_mut(table)?;
        let before = table.rows.len();
        table.rows.retain(|row| !condition.matches(row));
        Ok((before - table.rows.len()) as u64)
    }

    async fn commit(self: Box<Self>) -> Result<(), PersistError> {
        let MemorySession { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), PersistError> {
        Ok(())
    }
}

/// Store integers bound to decimal columns as decimals, like a SQL backend
fn coerce(value: &ColumnValue) -> SqlValue {
    match (&value.value, value.semantic) {
        (SqlValue::Integer(v), SemanticType::Decimal) => SqlValue::Decimal(*v as f64),
        (other, _) => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading_values(location: i64) -> Vec<ColumnValue> {
        let captured = chrono::NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();
        vec![
            ColumnValue::new("location_id", SemanticType::Integer, location.into()),
            ColumnValue::new("temperature", SemanticType::Decimal, 21.5.into()),
            ColumnValue::new("captured_at", SemanticType::Timestamp, captured.into()),
        ]
    }

    #[tokio::test]
    async fn test_insert_assigns_keys_and_defaults() {
        let driver = MemoryDriver::with_known_tables();
        let mut session = driver.begin().await.unwrap();
        let first = session.insert("reading", &reading_values(1), "id").await.unwrap();
        let second = session.insert("reading", &reading_values(2), "id").await.unwrap();
        session.commit().await.unwrap();

        assert_eq!(first, Some(1));
        assert_eq!(second, Some(2));
        let rows = driver.rows("reading").await;
        assert_eq!(rows.len(), 2);
        assert!(!rows[0].get("recorded_at").is_null());
        assert!(rows[0].get("modified_at").is_null());
    }

    #[tokio::test]
    async fn test_rollback_discards_changes() {
        let driver = MemoryDriver::with_known_tables();
        let mut session = driver.begin().await.unwrap();
        session.insert("reading", &reading_values(1), "id").await.unwrap();
        session.rollback().await.unwrap();
        assert!(driver.rows("reading").await.is_empty());
    }

    #[tokio::test]
    async fn test_check_constraint_rejects_row() {
        let driver = MemoryDriver::with_known_tables();
        driver
            .add_check("reading", "location_positive", |row| {
                row.get("location_id").as_i64().is_some_and(|v| v > 0)
            })
            .await
            .unwrap();

        let mut session = driver.begin().await.unwrap();
        let result = session.insert("reading", &reading_values(-1), "id").await;
        assert!(matches!(result, Err(PersistError::Database(_))));
    }

    #[tokio::test]
    async fn test_not_null_enforced() {
        let driver = MemoryDriver::with_known_tables();
        let mut session = driver.begin().await.unwrap();
        let values = vec![ColumnValue::new(
            "location_id",
            SemanticType::Integer,
            SqlValue::Integer(1),
        )];
        assert!(session.insert("reading", &values, "id").await.is_err());
    }

    #[tokio::test]
    async fn test_update_and_delete_by_condition() {
        let driver = MemoryDriver::with_known_tables();
        let mut session = driver.begin().await.unwrap();
        session.insert("reading", &reading_values(1), "id").await.unwrap();
        session.insert("reading", &reading_values(2), "id").await.unwrap();

        let affected = session
            .update(
                "reading",
                &[ColumnValue::new("temperature", SemanticType::Decimal, 30_i64.into())],
                &QueryCondition::eq("location_id", 2_i64),
            )
            .await
            .unwrap();
        assert_eq!(affected, 1);

        let rows = session
            .select(
                "reading",
                &[ColumnSpec::new("temperature", SemanticType::Decimal)],
                &QueryCondition::eq("location_id", 2_i64),
            )
            .await
            .unwrap();
        assert_eq!(rows[0].get("temperature"), &SqlValue::Decimal(30.0));

        let deleted = session
            .delete("reading", &QueryCondition::eq("id", 1_i64))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        session.commit().await.unwrap();
        assert_eq!(driver.rows("reading").await.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_table_describes_empty() {
        let driver = MemoryDriver::new();
        let info = driver.describe_table("ghost").await.unwrap();
        assert!(!info.exists());
    }

    #[tokio::test]
    async fn test_closed_driver_refuses_sessions() {
        let driver = MemoryDriver::with_known_tables();
        driver.close().await.unwrap();
        assert!(matches!(
            driver.begin().await,
            Err(PersistError::Connection(_))
        ));
    }
}

//! Persistence engine
//!
//! Generic upsert, load, find and delete over any [`Persistable`] type. Each
//! call runs in its own transaction; nothing is shared between calls except the
//! driver and the schema catalog.

use std::sync::Arc;

use chrono::NaiveDateTime;
use tracing::{debug, warn};

use crate::catalog::{EntityDescriptor, SchemaCatalog, validate_identifier};
use crate::condition::QueryCondition;
use crate::driver::{BackendKind, ColumnValue, DatabaseDriver, DriverSession};
use crate::entity::{ColumnRole, Persistable};
use crate::error::PersistError;
use crate::value::SqlValue;

/// What an upsert did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted { id: i64 },
    Updated { id: i64 },
}

impl UpsertOutcome {
    pub fn id(&self) -> i64 {
        match self {
            UpsertOutcome::Inserted { id } | UpsertOutcome::Updated { id } => *id,
        }
    }
}

/// Result of the transactional part of an upsert, applied to the entity
/// only after commit.
struct UpsertPlan {
    outcome: UpsertOutcome,
    modified_at: Option<NaiveDateTime>,
}

pub struct PersistenceEngine {
    driver: Arc<dyn DatabaseDriver>,
    catalog: SchemaCatalog,
}

impl PersistenceEngine {
    pub fn new(driver: Arc<dyn DatabaseDriver>) -> Self {
        Self {
            catalog: SchemaCatalog::new(driver.clone()),
            driver,
        }
    }

    pub fn backend(&self) -> BackendKind {
        self.driver.backend()
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    /// Open the shared connection now
    pub async fn connect(&self) -> Result<(), PersistError> {
        self.driver.connect().await
    }

    /// Release the shared connection
    pub async fn close(&self) -> Result<(), PersistError> {
        self.driver.close().await
    }

    /// Insert `entity` or update the row it identifies.
    ///
    /// The row is probed by primary key when the entity carries one, else by
    /// its natural key. On update every writable column is overwritten and the
    /// modification stamp is set; on insert only non-null columns are written
    /// and the generated key is stored back into the entity.
    pub async fn upsert<E: Persistable>(
        &self,
        entity: &mut E,
    ) -> Result<UpsertOutcome, PersistError> {
        let descriptor = self.catalog.descriptor::<E>().await?;

        let mut session = self.driver.begin().await?;
        let plan = match upsert_in(session.as_mut(), &descriptor, entity).await {
            Ok(plan) => {
                session.commit().await?;
                plan
            }
            Err(e) => {
                rollback(session, &descriptor.table).await;
                return Err(e);
            }
        };

        set_column(entity, &descriptor.primary_key, plan.outcome.id().into())?;
        if let Some(stamp) = plan.modified_at {
            for column in E::columns()
                .iter()
                .filter(|c| c.role == ColumnRole::ModifiedStamp)
            {
                (column.set)(entity, stamp.into())?;
            }
        }

        debug!(table = %descriptor.table, outcome = ?plan.outcome, "Upserted entity");
        Ok(plan.outcome)
    }

    /// Fetch the entity with primary key `id`
    pub async fn load<E: Persistable>(&self, id: i64) -> Result<Option<E>, PersistError> {
        let descriptor = self.catalog.descriptor::<E>().await?;
        let condition = QueryCondition::eq(descriptor.primary_key.clone(), id);
        Ok(self
            .fetch::<E>(&descriptor, &condition)
            .await?
            .into_iter()
            .next())
    }

    /// Fetch every entity matching `condition`
    pub async fn find<E: Persistable>(
        &self,
        condition: &QueryCondition,
    ) -> Result<Vec<E>, PersistError> {
        let descriptor = self.catalog.descriptor::<E>().await?;
        for (column, _) in condition.predicates() {
            validate_identifier(column)?;
            if descriptor.column(column).is_none() {
                return Err(PersistError::InvalidIdentifier(column.clone()));
            }
        }
        self.fetch::<E>(&descriptor, condition).await
    }

    /// Delete the row of `entity`; returns whether a row was removed
    pub async fn delete<E: Persistable>(&self, entity: &E) -> Result<bool, PersistError> {
        let descriptor = self.catalog.descriptor::<E>().await?;
        let key = column_value(entity, &descriptor.primary_key);
        if key.is_null() {
            return Err(PersistError::MissingPrimaryKey {
                table: descriptor.table.clone(),
            });
        }

        let condition = QueryCondition::eq(descriptor.primary_key.clone(), key);
        let mut session = self.driver.begin().await?;
        match session.delete(&descriptor.table, &condition).await {
            Ok(deleted) => {
                session.commit().await?;
                Ok(deleted > 0)
            }
            Err(e) => {
                rollback(session, &descriptor.table).await;
                Err(e)
            }
        }
    }

    async fn fetch<E: Persistable>(
        &self,
        descriptor: &EntityDescriptor,
        condition: &QueryCondition,
    ) -> Result<Vec<E>, PersistError> {
        let mut session = self.driver.begin().await?;
        let rows = match session
            .select(&descriptor.table, &descriptor.specs(), condition)
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                rollback(session, &descriptor.table).await;
                return Err(e);
            }
        };
        session.commit().await?;

        rows.iter().map(E::from_row).collect()
    }
}

/// Roll `session` back after a failed statement; a failing rollback is only logged
async fn rollback(session: Box<dyn DriverSession>, table: &str) {
    if let Err(e) = session.rollback().await {
        warn!(table, error = %e, "Rollback failed");
    }
}

fn column_value<E: Persistable>(entity: &E, name: &str) -> SqlValue {
    E::column(name)
        .map(|c| (c.get)(entity))
        .unwrap_or(SqlValue::Null)
}

fn set_column<E: Persistable>(entity: &mut E, name: &str, value: SqlValue) -> Result<(), PersistError> {
    match E::column(name) {
        Some(column) => (column.set)(entity, value),
        None => Err(PersistError::decode(name, "column is not mapped")),
    }
}

/// Probe, then update or insert, inside `session`
async fn upsert_in<E: Persistable>(
    session: &mut dyn DriverSession,
    descriptor: &EntityDescriptor,
    entity: &E,
) -> Result<UpsertPlan, PersistError> {
    let table = descriptor.table.as_str();
    let pk = descriptor.primary_key.as_str();
    let pk_value = column_value(entity, pk);

    let probe = if !pk_value.is_null() {
        Some(QueryCondition::eq(pk, pk_value.clone()))
    } else {
        let natural: Vec<_> = descriptor.natural_key().collect();
        if natural.is_empty() {
            None
        } else {
            Some(natural.iter().fold(QueryCondition::all(), |cond, column| {
                cond.and_eq(column.name.clone(), column_value(entity, &column.name))
            }))
        }
    };

    let existing = match &probe {
        Some(condition) => {
            let rows = session
                .select(table, &[descriptor.primary_key_spec()], condition)
                .await?;
            if rows.len() > 1 {
                warn!(table, matches = rows.len(), "Probe matched several rows, updating the first");
            }
            match rows.first() {
                Some(row) => Some(row.require_i64(pk)?),
                None => None,
            }
        }
        None => None,
    };

    match existing {
        Some(id) => {
            let now = chrono::Local::now().naive_local();
            let values: Vec<ColumnValue> = descriptor
                .columns
                .iter()
                .filter(|c| !descriptor.is_primary_key(&c.name))
                .filter_map(|c| match c.role {
                    ColumnRole::Plain | ColumnRole::NaturalKey => Some(ColumnValue::new(
                        c.name.clone(),
                        c.semantic,
                        column_value(entity, &c.name),
                    )),
                    ColumnRole::ModifiedStamp => {
                        Some(ColumnValue::new(c.name.clone(), c.semantic, now.into()))
                    }
                    ColumnRole::ServerAssigned => None,
                })
                .collect();

            session
                .update(table, &values, &QueryCondition::eq(pk, id))
                .await?;
            let stamped = descriptor
                .columns
                .iter()
                .any(|c| c.role == ColumnRole::ModifiedStamp);
            Ok(UpsertPlan {
                outcome: UpsertOutcome::Updated { id },
                modified_at: stamped.then_some(now),
            })
        }
        None => {
            let values: Vec<ColumnValue> = descriptor
                .columns
                .iter()
                .map(|c| ColumnValue::new(c.name.clone(), c.semantic, column_value(entity, &c.name)))
                .filter(|v| !v.value.is_null())
                .collect();

            let generated = session.insert(table, &values, pk).await?;
            let id = generated.or(pk_value.as_i64()).ok_or_else(|| {
                PersistError::decode(pk, "insert did not report a primary key")
            })?;
            Ok(UpsertPlan {
                outcome: UpsertOutcome::Inserted { id },
                modified_at: None,
            })
        }
    }
}

//! Schema catalog
//!
//! Resolves the table layout behind a persistable type once per process and
//! caches the result. Only successful discoveries are cached, so a table that
//! is fixed later is picked up on the next call.

use std::sync::{Arc, LazyLock};

use moka::future::Cache;
use regex::Regex;
use tracing::{info, warn};

use crate::driver::{ColumnSpec, DatabaseDriver, TableInfo};
use crate::entity::{ColumnRole, Persistable, SemanticType};
use crate::error::PersistError;

/// Unquoted SQL identifiers accepted by every supported backend
static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("identifier pattern is valid")
});

pub fn validate_identifier(name: &str) -> Result<(), PersistError> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(PersistError::InvalidIdentifier(name.to_string()))
    }
}

/// Mapped column with its role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescribedColumn {
    pub name: String,
    pub semantic: SemanticType,
    pub role: ColumnRole,
}

/// Resolved layout of one entity type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDescriptor {
    pub table: String,
    pub primary_key: String,
    pub columns: Vec<DescribedColumn>,
}

impl EntityDescriptor {
    pub fn column(&self, name: &str) -> Option<&DescribedColumn> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn is_primary_key(&self, name: &str) -> bool {
        self.primary_key.eq_ignore_ascii_case(name)
    }

    pub fn natural_key(&self) -> impl Iterator<Item = &DescribedColumn> {
        self.columns
            .iter()
            .filter(|c| c.role == ColumnRole::NaturalKey)
    }

    /// Every mapped column, for full row fetches
    pub fn specs(&self) -> Vec<ColumnSpec> {
        self.columns
            .iter()
            .map(|c| ColumnSpec::new(c.name.clone(), c.semantic))
            .collect()
    }

    pub fn primary_key_spec(&self) -> ColumnSpec {
        ColumnSpec::new(self.primary_key.clone(), SemanticType::Integer)
    }
}

/// Check an entity mapping against the table layout reported by the database
pub fn build_descriptor<E: Persistable>(
    table: &str,
    info: &TableInfo,
) -> Result<EntityDescriptor, PersistError> {
    validate_identifier(table)
        .map_err(|_| PersistError::schema(table, "table name is not a valid identifier"))?;

    if !info.exists() {
        return Err(PersistError::schema(table, "table not found"));
    }

    let primary_key = match info.primary_key.as_slice() {
        [] => return Err(PersistError::schema(table, "table has no primary key")),
        [single] => single.clone(),
        _ => {
            return Err(PersistError::schema(
                table,
                format!(
                    "composite primary key ({}) is not supported",
                    info.primary_key.join(", ")
                ),
            ));
        }
    };

    let mut columns = Vec::with_capacity(E::columns().len());
    for def in E::columns() {
        validate_identifier(def.name).map_err(|_| {
            PersistError::schema(table, format!("column '{}' is not a valid identifier", def.name))
        })?;
        if info.column(def.name).is_none() {
            return Err(PersistError::schema(
                table,
                format!("mapped column '{}' does not exist", def.name),
            ));
        }
        columns.push(DescribedColumn {
            name: def.name.to_string(),
            semantic: def.semantic,
            role: def.role,
        });
    }

    let pk_column = columns
        .iter()
        .find(|c| c.name.eq_ignore_ascii_case(&primary_key))
        .ok_or_else(|| {
            PersistError::schema(
                table,
                format!("primary key '{}' is not mapped by the entity", primary_key),
            )
        })?;
    if pk_column.semantic != SemanticType::Integer {
        return Err(PersistError::schema(
            table,
            format!("primary key '{}' must be an integer column", primary_key),
        ));
    }

    Ok(EntityDescriptor {
        table: table.to_string(),
        primary_key: pk_column.name.clone(),
        columns,
    })
}

/// Per-process cache of entity descriptors
pub struct SchemaCatalog {
    driver: Arc<dyn DatabaseDriver>,
    cache: Cache<String, Arc<EntityDescriptor>>,
}

impl SchemaCatalog {
    pub fn new(driver: Arc<dyn DatabaseDriver>) -> Self {
        Self {
            driver,
            cache: Cache::builder().max_capacity(1024).build(),
        }
    }

    /// Descriptor of `E`, discovered on first use.
    ///
    /// Concurrent first calls share one discovery.
    pub async fn descriptor<E: Persistable>(&self) -> Result<Arc<EntityDescriptor>, PersistError> {
        let table = E::table_name();
        self.cache
            .try_get_with(table.clone(), self.discover::<E>(&table))
            .await
            .map_err(|e| match e.as_ref() {
                PersistError::Schema { table, reason } => PersistError::schema(table, reason),
                PersistError::Connection(reason) => PersistError::Connection(reason.clone()),
                other => PersistError::schema(&table, other.to_string()),
            })
    }

    async fn discover<E: Persistable>(
        &self,
        table: &str,
    ) -> Result<Arc<EntityDescriptor>, PersistError> {
        let info = self.driver.describe_table(table).await.map_err(|e| {
            warn!(table, error = %e, "Schema discovery failed");
            if e.is_unavailable() {
                PersistError::Connection(e.to_string())
            } else {
                PersistError::schema(table, format!("discovery failed: {}", e))
            }
        })?;

        let descriptor = build_descriptor::<E>(table, &info)?;
        info!(
            table,
            primary_key = %descriptor.primary_key,
            columns = descriptor.columns.len(),
            "Discovered entity schema"
        );
        Ok(Arc::new(descriptor))
    }

    /// Drop the cached descriptor of `table`
    pub async fn invalidate(&self, table: &str) {
        self.cache.invalidate(table).await;
    }

    pub fn is_cached(&self, table: &str) -> bool {
        self.cache.contains_key(table)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use sensorline_common::Reading;

    use super::*;
    use crate::driver::{ColumnInfo, MemoryDriver};
    use crate::entity::reading::reading_table;

    #[test]
    fn test_reading_descriptor() {
        let descriptor = build_descriptor::<Reading>("reading", &reading_table()).unwrap();
        assert_eq!(descriptor.primary_key, "id");
        assert_eq!(descriptor.columns.len(), 6);
        assert_eq!(
            descriptor.natural_key().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            vec!["location_id", "captured_at"]
        );
    }

    #[test]
    fn test_missing_table_is_schema_error() {
        let err = build_descriptor::<Reading>("reading", &TableInfo::default()).unwrap_err();
        assert!(err.is_schema());
    }

    #[test]
    fn test_missing_primary_key_is_schema_error() {
        let mut info = reading_table();
        info.primary_key.clear();
        let err = build_descriptor::<Reading>("reading", &info).unwrap_err();
        assert!(err.to_string().contains("no primary key"));
    }

    #[test]
    fn test_composite_primary_key_rejected() {
        let mut info = reading_table();
        info.primary_key = vec!["location_id".into(), "captured_at".into()];
        assert!(build_descriptor::<Reading>("reading", &info).unwrap_err().is_schema());
    }

    #[test]
    fn test_unmapped_column_rejected() {
        let mut info = reading_table();
        info.columns.retain(|c| c.name != "temperature");
        let err = build_descriptor::<Reading>("reading", &info).unwrap_err();
        assert!(err.to_string().contains("temperature"));
    }

    #[test]
    fn test_extra_table_columns_are_ignored() {
        let mut info = reading_table();
        info.columns.push(ColumnInfo {
            name: "note".into(),
            data_type: "text".into(),
            nullable: true,
            has_default: false,
        });
        assert!(build_descriptor::<Reading>("reading", &info).is_ok());
    }

    #[test]
    fn test_identifier_validation() {
        assert!(validate_identifier("reading").is_ok());
        assert!(validate_identifier("_tmp_1").is_ok());
        assert!(validate_identifier("1reading").is_err());
        assert!(validate_identifier("reading; DROP TABLE x").is_err());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier(&"a".repeat(64)).is_err());
    }

    proptest! {
        #[test]
        fn prop_identifiers_with_punctuation_rejected(
            prefix in "[a-z]{1,10}",
            bad in "[ ;'\"\\-\\.()]",
            suffix in "[a-z]{0,10}",
        ) {
            let name = format!("{}{}{}", prefix, bad, suffix);
            prop_assert!(validate_identifier(&name).is_err());
        }
    }

    #[tokio::test]
    async fn test_unreachable_database_is_not_a_schema_error() {
        let memory = MemoryDriver::with_known_tables();
        memory.close().await.unwrap();
        let catalog = SchemaCatalog::new(Arc::new(memory));

        let err = catalog.descriptor::<Reading>().await.unwrap_err();
        assert!(!err.is_schema());
        assert!(err.is_unavailable());
        assert!(!catalog.is_cached("reading"));
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let memory = MemoryDriver::new();
        let catalog = SchemaCatalog::new(Arc::new(memory.clone()));

        let err = catalog.descriptor::<Reading>().await.unwrap_err();
        assert!(err.is_schema());
        assert!(!catalog.is_cached("reading"));

        memory.create_table(reading_table()).await;
        let descriptor = catalog.descriptor::<Reading>().await.unwrap();
        assert_eq!(descriptor.table, "reading");
        assert!(catalog.is_cached("reading"));
    }
}

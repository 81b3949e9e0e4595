//! `sensorline.collector.v1.Collector` implementation

use std::collections::BTreeMap;
use std::sync::Arc;

use sensorline_api::{
    Collector, IngestAck, IngestRequest, SchemaCache, SchemaCacheError, SchemaDocument,
    SchemaRequest, SchemaSnapshot, decode_batch,
};
use sensorline_common::Reading;
use sensorline_persistence::{PersistenceEngine, Persistable, UpsertOutcome};
use tonic::{Request, Response, Status};
use tracing::{debug, error, info, warn};

/// Schema document describing the reading record
pub fn reading_schema() -> SchemaSnapshot {
    let fields: BTreeMap<String, String> = Reading::columns()
        .iter()
        .map(|c| (c.name.to_string(), c.semantic.as_str().to_string()))
        .collect();
    SchemaSnapshot::new(fields)
}

pub struct CollectorService {
    engine: Arc<PersistenceEngine>,
    schema_cache: Arc<SchemaCache>,
}

impl CollectorService {
    pub fn new(engine: Arc<PersistenceEngine>, schema_cache: Arc<SchemaCache>) -> Self {
        Self {
            engine,
            schema_cache,
        }
    }
}

#[tonic::async_trait]
impl Collector for CollectorService {
    async fn ingest(
        &self,
        request: Request<IngestRequest>,
    ) -> Result<Response<IngestAck>, Status> {
        let batch = decode_batch(&request.into_inner().payload)
            .map_err(|e| Status::invalid_argument(e.to_string()))?;

        let mut accepted = 0u32;
        let mut rejected = 0u32;
        let mut inserted = 0u32;

        for mut reading in batch.into_readings() {
            // Database owned fields are never taken from the wire
            reading.id = None;
            reading.recorded_at = None;
            reading.modified_at = None;

            match self.engine.upsert(&mut reading).await {
                Ok(outcome) => {
                    accepted += 1;
                    if matches!(outcome, UpsertOutcome::Inserted { .. }) {
                        inserted += 1;
                    }
                }
                Err(e) if e.is_unavailable() => {
                    warn!(error = %e, "Database unavailable, aborting batch");
                    return Err(Status::unavailable("database unavailable"));
                }
                Err(e) if e.is_schema() => {
                    error!(error = %e, "Reading table is unusable, aborting batch");
                    return Err(Status::failed_precondition(e.to_string()));
                }
                Err(e) => {
                    warn!(
                        location_id = reading.location_id,
                        captured_at = %reading.captured_at,
                        error = %e,
                        "Failed to persist reading"
                    );
                    rejected += 1;
                }
            }
        }

        info!(
            accepted,
            rejected,
            inserted,
            updated = accepted - inserted,
            "Ingested batch"
        );
        Ok(Response::new(IngestAck { accepted, rejected }))
    }

    async fn get_schema(
        &self,
        _request: Request<SchemaRequest>,
    ) -> Result<Response<SchemaDocument>, Status> {
        let snapshot = self
            .schema_cache
            .get_or_refresh(|| async {
                debug!("Regenerating schema document");
                Ok::<_, SchemaCacheError>(reading_schema())
            })
            .await
            .map_err(|e| {
                error!(error = %e, "Schema cache unavailable");
                Status::internal("schema document unavailable")
            })?;

        Ok(Response::new(snapshot.into()))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::NaiveDate;
    use sensorline_api::encode_batch;
    use sensorline_common::Batch;
    use sensorline_persistence::{DatabaseDriver, MemoryDriver};

    use super::*;

    fn reading(location_id: i64, temperature: f64) -> Reading {
        let at = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();
        Reading::new(location_id, temperature, at)
    }

    fn service(driver: MemoryDriver, dir: &std::path::Path) -> CollectorService {
        CollectorService::new(
            Arc::new(PersistenceEngine::new(Arc::new(driver))),
            Arc::new(SchemaCache::new(
                dir.join("schema.json"),
                Duration::from_secs(3600),
            )),
        )
    }

    fn ingest_request(batch: &Batch) -> Request<IngestRequest> {
        Request::new(IngestRequest {
            payload: encode_batch(batch).unwrap(),
        })
    }

    #[tokio::test]
    async fn test_ingest_persists_every_reading() {
        let dir = tempfile::tempdir().unwrap();
        let driver = MemoryDriver::with_known_tables();
        let service = service(driver.clone(), dir.path());

        let batch: Batch = [reading(12, 21.5), reading(13, 19.8)].into_iter().collect();
        let ack = service.ingest(ingest_request(&batch)).await.unwrap().into_inner();
        assert_eq!((ack.accepted, ack.rejected), (2, 0));
        assert_eq!(driver.rows("reading").await.len(), 2);

        // Redelivery updates in place
        let ack = service.ingest(ingest_request(&batch)).await.unwrap().into_inner();
        assert_eq!(ack.accepted, 2);
        assert_eq!(driver.rows("reading").await.len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_payload_is_invalid_argument() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(MemoryDriver::with_known_tables(), dir.path());

        let status = service
            .ingest(Request::new(IngestRequest {
                payload: b"not json".to_vec(),
            }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_failing_readings_are_counted() {
        let dir = tempfile::tempdir().unwrap();
        let driver = MemoryDriver::with_known_tables();
        driver
            .add_check("reading", "location_positive", |row| {
                row.get("location_id").as_i64().is_some_and(|id| id > 0)
            })
            .await
            .unwrap();
        let service = service(driver.clone(), dir.path());

        let batch: Batch = [reading(-1, 1.0), reading(2, 2.0), reading(3, 3.0)]
            .into_iter()
            .collect();
        let ack = service.ingest(ingest_request(&batch)).await.unwrap().into_inner();
        assert_eq!((ack.accepted, ack.rejected), (2, 1));
        assert_eq!(driver.rows("reading").await.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_table_is_failed_precondition() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(MemoryDriver::new(), dir.path());

        let batch: Batch = [reading(1, 1.0)].into_iter().collect();
        let status = service.ingest(ingest_request(&batch)).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::FailedPrecondition);
    }

    #[tokio::test]
    async fn test_database_outage_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let driver = MemoryDriver::with_known_tables();
        driver.close().await.unwrap();
        let service = service(driver.clone(), dir.path());

        let batch: Batch = [reading(1, 1.0)].into_iter().collect();
        let status = service.ingest(ingest_request(&batch)).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::Unavailable);
    }

    #[tokio::test]
    async fn test_wire_ids_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let driver = MemoryDriver::with_known_tables();
        let service = service(driver.clone(), dir.path());

        let mut forged = reading(5, 5.0);
        forged.id = Some(999);
        let batch: Batch = [forged].into_iter().collect();
        service.ingest(ingest_request(&batch)).await.unwrap();

        let rows = driver.rows("reading").await;
        assert_eq!(rows[0].get("id").as_i64(), Some(1));
    }

    #[tokio::test]
    async fn test_schema_is_stable_within_window() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(MemoryDriver::with_known_tables(), dir.path());

        let first = service
            .get_schema(Request::new(SchemaRequest {}))
            .await
            .unwrap()
            .into_inner();
        let second = service
            .get_schema(Request::new(SchemaRequest {}))
            .await
            .unwrap()
            .into_inner();

        assert_eq!(first, second);
        assert_eq!(first.fields.get("temperature").map(String::as_str), Some("decimal"));
        assert_eq!(first.fields.get("location_id").map(String::as_str), Some("integer"));
        assert_eq!(first.fields.len(), 6);
    }
}

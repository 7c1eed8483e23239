//! `PostgreSQL` implementation of the `EventRepository` trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, warn};
use uuid::Uuid;

use eventide_core::error::EventStoreError;
use eventide_core::event::{DomainEvent, EventData, EventMetadata};
use eventide_core::repository::EventRepository;
use eventide_core::snapshot::{Snapshot, SnapshotMetadata, SnapshotReason};

use crate::schema::CREATE_TABLES;

/// Constraint enforcing one event per stream version.
const STREAM_VERSION_CONSTRAINT: &str = "domain_events_stream_version_key";

/// PostgreSQL-backed event repository.
#[derive(Debug, Clone)]
pub struct PgEventRepository {
    pool: PgPool,
}

impl PgEventRepository {
    /// Creates a new `PgEventRepository`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the tables when they do not exist yet.
    ///
    /// # Errors
    ///
    /// Returns `EventStoreError::Infrastructure` if the DDL fails.
    pub async fn ensure_schema(&self) -> Result<(), EventStoreError> {
        sqlx::raw_sql(CREATE_TABLES)
            .execute(&self.pool)
            .await
            .map_err(infrastructure)?;
        Ok(())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    event_id: Uuid,
    aggregate_type: String,
    aggregate_id: String,
    aggregate_version: i64,
    event_type: String,
    payload: Json<EventData>,
    metadata: Json<EventMetadata>,
    caused_by: Option<Uuid>,
    correlation_id: Option<Uuid>,
    occurred_at: DateTime<Utc>,
}

impl From<EventRow> for DomainEvent {
    fn from(row: EventRow) -> Self {
        Self {
            id: row.event_id,
            event_type: row.event_type,
            aggregate_id: row.aggregate_id,
            aggregate_type: row.aggregate_type,
            aggregate_version: row.aggregate_version,
            timestamp: row.occurred_at,
            data: row.payload.0,
            metadata: row.metadata.0,
            caused_by: row.caused_by,
            correlation_id: row.correlation_id,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SnapshotRow {
    snapshot_id: Uuid,
    aggregate_type: String,
    aggregate_id: String,
    version: i64,
    state: Json<EventData>,
    reason: String,
    event_count: i64,
    compressed_size: i64,
    checksum: String,
    taken_at: DateTime<Utc>,
}

impl TryFrom<SnapshotRow> for Snapshot {
    type Error = EventStoreError;

    fn try_from(row: SnapshotRow) -> Result<Self, Self::Error> {
        let reason = SnapshotReason::parse(&row.reason).ok_or_else(|| {
            EventStoreError::Infrastructure(format!("unknown snapshot reason: {}", row.reason))
        })?;
        Ok(Self {
            id: row.snapshot_id,
            aggregate_id: row.aggregate_id,
            aggregate_type: row.aggregate_type,
            version: row.version,
            data: row.state.0,
            timestamp: row.taken_at,
            metadata: SnapshotMetadata {
                reason,
                event_count: to_unsigned("event_count", row.event_count)?,
                compressed_size: to_unsigned("compressed_size", row.compressed_size)?,
                checksum: row.checksum,
            },
        })
    }
}

#[async_trait]
impl EventRepository for PgEventRepository {
    async fn append_events(&self, events: &[DomainEvent]) -> Result<(), EventStoreError> {
        let Some(first) = events.first() else {
            return Ok(());
        };
        let expected = first.aggregate_version - 1;

        let mut tx = self.pool.begin().await.map_err(infrastructure)?;
        let actual = stream_version(&mut tx, &first.aggregate_type, &first.aggregate_id).await?;
        if actual != expected {
            warn!(
                aggregate_type = %first.aggregate_type,
                aggregate_id = %first.aggregate_id,
                expected,
                actual,
                "stale append rejected"
            );
            return Err(conflict(first, expected, actual));
        }

        for event in events {
            let inserted = sqlx::query(
                "INSERT INTO domain_events
                    (event_id, aggregate_type, aggregate_id, aggregate_version, event_type,
                     payload, metadata, caused_by, correlation_id, occurred_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            )
            .bind(event.id)
            .bind(&event.aggregate_type)
            .bind(&event.aggregate_id)
            .bind(event.aggregate_version)
            .bind(&event.event_type)
            .bind(Json(&event.data))
            .bind(Json(&event.metadata))
            .bind(event.caused_by)
            .bind(event.correlation_id)
            .bind(event.timestamp)
            .execute(&mut *tx)
            .await;

            if let Err(e) = inserted {
                let violated_stream_version = e
                    .as_database_error()
                    .and_then(|db| db.constraint())
                    .is_some_and(|constraint| constraint == STREAM_VERSION_CONSTRAINT);
                if !violated_stream_version {
                    return Err(infrastructure(e));
                }
                drop(tx);
                let actual = self.current_version(first).await?;
                return Err(conflict(first, expected, actual));
            }
        }

        tx.commit().await.map_err(infrastructure)?;
        debug!(
            aggregate_type = %first.aggregate_type,
            aggregate_id = %first.aggregate_id,
            count = events.len(),
            "events persisted"
        );
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<DomainEvent>, EventStoreError> {
        let rows = sqlx::query_as::<_, EventRow>(
            "SELECT event_id, aggregate_type, aggregate_id, aggregate_version, event_type,
                    payload, metadata, caused_by, correlation_id, occurred_at
             FROM domain_events
             ORDER BY global_position",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(infrastructure)?;

        Ok(rows.into_iter().map(DomainEvent::from).collect())
    }

    async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<(), EventStoreError> {
        sqlx::query(
            "INSERT INTO aggregate_snapshots
                (aggregate_type, aggregate_id, snapshot_id, version, state, reason,
                 event_count, compressed_size, checksum, taken_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             ON CONFLICT (aggregate_type, aggregate_id)
             DO UPDATE SET snapshot_id = EXCLUDED.snapshot_id,
                           version = EXCLUDED.version,
                           state = EXCLUDED.state,
                           reason = EXCLUDED.reason,
                           event_count = EXCLUDED.event_count,
                           compressed_size = EXCLUDED.compressed_size,
                           checksum = EXCLUDED.checksum,
                           taken_at = EXCLUDED.taken_at
             WHERE aggregate_snapshots.version <= EXCLUDED.version",
        )
        .bind(&snapshot.aggregate_type)
        .bind(&snapshot.aggregate_id)
        .bind(snapshot.id)
        .bind(snapshot.version)
        .bind(Json(&snapshot.data))
        .bind(snapshot.metadata.reason.as_str())
        .bind(to_signed("event_count", snapshot.metadata.event_count)?)
        .bind(to_signed("compressed_size", snapshot.metadata.compressed_size)?)
        .bind(&snapshot.metadata.checksum)
        .bind(snapshot.timestamp)
        .execute(&self.pool)
        .await
        .map_err(infrastructure)?;
        Ok(())
    }

    async fn load_snapshots(&self) -> Result<Vec<Snapshot>, EventStoreError> {
        let rows = sqlx::query_as::<_, SnapshotRow>(
            "SELECT snapshot_id, aggregate_type, aggregate_id, version, state, reason,
                    event_count, compressed_size, checksum, taken_at
             FROM aggregate_snapshots
             ORDER BY aggregate_type, aggregate_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(infrastructure)?;

        rows.into_iter().map(Snapshot::try_from).collect()
    }

    async fn save_checkpoint(&self, projection: &str, version: i64) -> Result<(), EventStoreError> {
        sqlx::query(
            "INSERT INTO projection_checkpoints (projection_name, checkpoint, updated_at)
             VALUES ($1, $2, NOW())
             ON CONFLICT (projection_name)
             DO UPDATE SET checkpoint = EXCLUDED.checkpoint, updated_at = NOW()",
        )
        .bind(projection)
        .bind(version)
        .execute(&self.pool)
        .await
        .map_err(infrastructure)?;
        Ok(())
    }
}

impl PgEventRepository {
    /// Last checkpoint persisted for `projection`.
    ///
    /// # Errors
    ///
    /// Returns `EventStoreError::Infrastructure` if the query fails.
    pub async fn load_checkpoint(&self, projection: &str) -> Result<Option<i64>, EventStoreError> {
        sqlx::query_scalar::<_, i64>(
            "SELECT checkpoint FROM projection_checkpoints WHERE projection_name = $1",
        )
        .bind(projection)
        .fetch_optional(&self.pool)
        .await
        .map_err(infrastructure)
    }

    async fn current_version(&self, event: &DomainEvent) -> Result<i64, EventStoreError> {
        let mut tx = self.pool.begin().await.map_err(infrastructure)?;
        let version = stream_version(&mut tx, &event.aggregate_type, &event.aggregate_id).await?;
        tx.commit().await.map_err(infrastructure)?;
        Ok(version)
    }
}

async fn stream_version(
    tx: &mut Transaction<'_, Postgres>,
    aggregate_type: &str,
    aggregate_id: &str,
) -> Result<i64, EventStoreError> {
    sqlx::query_scalar::<_, i64>(
        "SELECT COALESCE(MAX(aggregate_version), 0)
         FROM domain_events
         WHERE aggregate_type = $1 AND aggregate_id = $2",
    )
    .bind(aggregate_type)
    .bind(aggregate_id)
    .fetch_one(&mut **tx)
    .await
    .map_err(infrastructure)
}

fn conflict(event: &DomainEvent, expected: i64, actual: i64) -> EventStoreError {
    EventStoreError::ConcurrencyConflict {
        aggregate_type: event.aggregate_type.clone(),
        aggregate_id: event.aggregate_id.clone(),
        expected,
        actual,
    }
}

#[allow(clippy::needless_pass_by_value)]
fn infrastructure(error: sqlx::Error) -> EventStoreError {
    EventStoreError::Infrastructure(error.to_string())
}

fn to_signed(column: &str, value: u64) -> Result<i64, EventStoreError> {
    i64::try_from(value)
        .map_err(|_| EventStoreError::Infrastructure(format!("{column} {value} does not fit BIGINT")))
}

fn to_unsigned(column: &str, value: i64) -> Result<u64, EventStoreError> {
    u64::try_from(value)
        .map_err(|_| EventStoreError::Infrastructure(format!("stored {column} {value} is negative")))
}

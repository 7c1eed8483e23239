//! Durable storage schema.
//!
//! Mirrors `migrations/0001_create_event_store.sql`. Kept as a constant so a
//! deployment without the migration runner can bootstrap an empty database
//! through [`crate::PgEventRepository::ensure_schema`].

/// SQL creating the event, snapshot and checkpoint tables.
pub const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS domain_events (
    global_position   BIGSERIAL PRIMARY KEY,
    event_id          UUID NOT NULL UNIQUE,
    aggregate_type    VARCHAR(255) NOT NULL,
    aggregate_id      VARCHAR(255) NOT NULL,
    aggregate_version BIGINT NOT NULL,
    event_type        VARCHAR(255) NOT NULL,
    payload           JSONB NOT NULL,
    metadata          JSONB NOT NULL,
    caused_by         UUID,
    correlation_id    UUID,
    occurred_at       TIMESTAMPTZ NOT NULL,
    CONSTRAINT domain_events_stream_version_key
        UNIQUE (aggregate_type, aggregate_id, aggregate_version)
);

CREATE INDEX IF NOT EXISTS idx_domain_events_correlation_id
    ON domain_events (correlation_id);

CREATE TABLE IF NOT EXISTS aggregate_snapshots (
    aggregate_type  VARCHAR(255) NOT NULL,
    aggregate_id    VARCHAR(255) NOT NULL,
    snapshot_id     UUID NOT NULL,
    version         BIGINT NOT NULL,
    state           JSONB NOT NULL,
    reason          VARCHAR(32) NOT NULL,
    event_count     BIGINT NOT NULL,
    compressed_size BIGINT NOT NULL,
    checksum        VARCHAR(64) NOT NULL,
    taken_at        TIMESTAMPTZ NOT NULL,
    PRIMARY KEY (aggregate_type, aggregate_id)
);

CREATE TABLE IF NOT EXISTS projection_checkpoints (
    projection_name VARCHAR(255) PRIMARY KEY,
    checkpoint      BIGINT NOT NULL,
    updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
";

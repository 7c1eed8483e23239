//! Eventide: PostgreSQL durable storage.
//!
//! Implements [`eventide_core::repository::EventRepository`] on top of a
//! `sqlx` connection pool. The schema lives in `/migrations` and is mirrored
//! by [`schema::CREATE_TABLES`].

pub mod pg_event_repository;
pub mod schema;

pub use pg_event_repository::PgEventRepository;

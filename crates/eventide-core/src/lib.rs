//! Eventide Core: shared event-sourcing vocabulary.
//!
//! This crate defines the records, contracts and error types that the
//! engine, the durable storage adapters and the surrounding application
//! agree on. It contains no infrastructure code.

pub mod aggregate;
pub mod clock;
pub mod command;
pub mod error;
pub mod event;
pub mod handler;
pub mod repository;
pub mod snapshot;

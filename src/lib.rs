//! Log Ingest: multi-tenant log ingestion with at-least-once delivery.
//!
//! Gateway → broker → worker → record store. Every upload is keyed by
//! `(tenant_id, log_id)` and written with an idempotent upsert, so
//! redeliveries never produce duplicate or partial records.

pub mod broker;
pub mod config;
pub mod error;
pub mod gateway;
pub mod model;
pub mod redact;
pub mod store;
pub mod worker;

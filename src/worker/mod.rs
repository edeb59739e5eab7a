//! Worker: consumes deliveries and persists redacted records.
//!
//! - `handler`: decode, validate, delay, redact and upsert one delivery
//! - `state`: per-delivery state machine (Received to Persisted or a failure)
//! - `routes`: Pub/Sub push endpoint and the read API

pub mod handler;
pub mod routes;
pub mod state;

pub use handler::{Processed, Worker};
pub use routes::{push_routes, record_routes};
pub use state::{DeliveryState, DeliveryTracker};

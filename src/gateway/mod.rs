//! Ingestion gateway: validate uploads and enqueue them.
//!
//! - `normalize`: content-type dispatch and validation into an `IngestRequest`
//! - `ingest`: `Gateway`, which publishes each accepted request once
//! - `routes`: `POST /ingest`, `GET /health`, `GET /`

pub mod ingest;
pub mod normalize;
pub mod routes;

pub use ingest::{Accepted, Gateway};
pub use normalize::{TENANT_HEADER, normalize};
pub use routes::gateway_routes;

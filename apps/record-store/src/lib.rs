//! HTTP files API over a directory of JSONL record logs.
//!
//! Serves windowed reads, record counts and index-addressed line replacement for the
//! logs under `DATA_DIR`, the shape consumed by `record_log::HttpRecordStore`.

pub mod config;
pub mod metrics;
pub mod routes;
pub mod state;
pub mod telemetry;

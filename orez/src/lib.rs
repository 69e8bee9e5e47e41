//! orez: a local development backend that speaks the PostgreSQL v3 wire
//! protocol on one TCP endpoint and feeds a companion change-data-capture
//! consumer from a synthesized logical-replication source, all backed by
//! in-process embedded PostgreSQL instances.

pub mod backend;
pub mod cli;
pub mod config;
pub mod frontend;
pub mod logger;
pub mod net;
pub mod supervisor;

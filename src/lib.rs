//! Square webhook ingestion: signature verification, a durable list-backed
//! queue with dead-letter replay, and a drain endpoint that routes queued
//! events to catalog/inventory refreshes and cache invalidation.

pub mod cache;
pub mod config;
pub mod error;
pub mod http_server;
pub mod logging;
pub mod provider;
pub mod queue;
pub mod retry;
pub mod router;
pub mod store;
pub mod types;
pub mod upstash;
pub mod verification;
pub mod worker;

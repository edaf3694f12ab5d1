pub mod classifiers;
pub mod http_classifier;
pub mod log_sink;
pub mod memory_queue;
pub mod memory_store;
pub mod multi_sink;
#[cfg(feature = "nats")]
pub mod nats_queue;
pub mod sqlite_store;
pub mod webhook_sink;

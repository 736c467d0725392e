//! The FedT round coordinator: it hands out a global ensemble of trees, collects the
//! components every client trains locally, aggregates them once per round and advances.

pub mod aggregation;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod pool;
pub mod service;
#[cfg(test)]
mod testing;

pub use config::ServerConfig;
pub use coordinator::{Coordinator, GlobalEnsemble, RoundSettings};
pub use error::{Result, ServerErr};
pub use service::{FedServer, ServerBuilder};

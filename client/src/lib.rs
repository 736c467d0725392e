//! A FedT client: it adapts the global ensemble on its own partition every round and
//! contributes whichever ensemble scores better.

pub mod config;
pub mod driver;
pub mod error;
pub mod local;
pub mod net;

pub use config::ClientConfig;
pub use driver::{Driver, DriverSettings};
pub use error::{ClientErr, Result};
pub use local::{Evaluation, Kept, LocalModel};
pub use net::FedClient;

mod config;

pub use config::{ConfigError, ReceiverConfig, StoreConfig};

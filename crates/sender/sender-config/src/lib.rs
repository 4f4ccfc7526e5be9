mod config;

pub use config::{ConfigError, SenderConfig, parse_distribution};

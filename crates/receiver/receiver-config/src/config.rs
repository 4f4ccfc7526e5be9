use quarry_wire::UniShape;
use quarry_wire::layout::MIN_SLOT_SIZE;
use serde::Deserialize;
use std::net::Ipv6Addr;
use std::path::{Path, PathBuf};

/// Largest batch a single receive call may request.
pub const MAX_BATCH_LIMIT: usize = 1024;
pub const MAX_HANDLERS: usize = 64;
/// Cap on one handler's state file.
pub const MAX_STORE_FILE_BYTES: u64 = 64 << 30;

#[derive(Deserialize, Debug, Clone)]
pub struct ReceiverConfig {
    #[serde(default = "defaults::log_level")]
    pub log_level: String,
    #[serde(default = "defaults::protocol")]
    pub protocol: i32,

    /// Datagrams requested per receive call.
    #[serde(default = "defaults::max_batch")]
    pub max_batch: usize,
    #[serde(default = "defaults::handler_threads")]
    pub handler_threads: usize,
    /// CPU for the receiver thread; 0 leaves it unpinned.
    #[serde(default)]
    pub receiver_cpu: usize,
    /// CPU per handler, by handler index; missing entries are unpinned.
    #[serde(default)]
    pub handler_cpus: Vec<usize>,

    #[serde(default)]
    pub store_percent: f64,
    #[serde(default)]
    pub reply_percent: f64,
    #[serde(default)]
    pub reply_address: Option<Ipv6Addr>,
    /// Busy-loop iterations per reply; 0 disables the synthetic workload.
    #[serde(default)]
    pub workload_iterations: u64,

    #[serde(default = "defaults::uni_dimension")]
    pub uni_volumes: u32,
    #[serde(default = "defaults::uni_dimension")]
    pub uni_segments: u32,
    #[serde(default = "defaults::uni_dimension")]
    pub uni_addresses: u32,

    #[serde(default = "defaults::slots_per_buffer")]
    pub slots_per_buffer: usize,
    #[serde(default = "defaults::slot_size")]
    pub slot_size: usize,
    #[serde(default = "defaults::buffers_per_lane")]
    pub buffers_per_lane: usize,

    #[serde(default)]
    pub receive_buffer_bytes: Option<usize>,
    #[serde(default)]
    pub send_buffer_bytes: Option<usize>,
    #[serde(default = "defaults::receive_timeout_ms")]
    pub receive_timeout_ms: u64,

    #[serde(default = "defaults::stats_period_ms")]
    pub stats_period_ms: u64,
    #[serde(default)]
    pub single_thread: bool,
    #[serde(default)]
    pub dump: bool,

    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Deserialize, Debug, Clone)]
pub struct StoreConfig {
    #[serde(default = "defaults::store_root")]
    pub root: PathBuf,
    #[serde(default = "defaults::store_file")]
    pub file: String,
    #[serde(default = "defaults::state_size")]
    pub state_size: usize,
    /// Flush each record before the handler moves on.
    #[serde(default)]
    pub sync: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

mod defaults {
    use std::path::PathBuf;

    pub fn log_level() -> String {
        "info".into()
    }

    pub fn protocol() -> i32 {
        quarry_wire::layout::PROTOCOL
    }

    pub fn max_batch() -> usize {
        1
    }

    pub fn handler_threads() -> usize {
        2
    }

    pub fn uni_dimension() -> u32 {
        1
    }

    pub fn slots_per_buffer() -> usize {
        1024
    }

    pub fn slot_size() -> usize {
        1024
    }

    pub fn buffers_per_lane() -> usize {
        64
    }

    pub fn receive_timeout_ms() -> u64 {
        100
    }

    pub fn stats_period_ms() -> u64 {
        5_000
    }

    pub fn store_root() -> PathBuf {
        "/tmp/xnetp".into()
    }

    pub fn store_file() -> String {
        "cim.dat".into()
    }

    pub fn state_size() -> usize {
        4 * 1024
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: defaults::store_root(),
            file: defaults::store_file(),
            state_size: defaults::state_size(),
            sync: false,
        }
    }
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            log_level: defaults::log_level(),
            protocol: defaults::protocol(),
            max_batch: defaults::max_batch(),
            handler_threads: defaults::handler_threads(),
            receiver_cpu: 0,
            handler_cpus: Vec::new(),
            store_percent: 0.0,
            reply_percent: 0.0,
            reply_address: None,
            workload_iterations: 0,
            uni_volumes: defaults::uni_dimension(),
            uni_segments: defaults::uni_dimension(),
            uni_addresses: defaults::uni_dimension(),
            slots_per_buffer: defaults::slots_per_buffer(),
            slot_size: defaults::slot_size(),
            buffers_per_lane: defaults::buffers_per_lane(),
            receive_buffer_bytes: None,
            send_buffer_bytes: None,
            receive_timeout_ms: defaults::receive_timeout_ms(),
            stats_period_ms: defaults::stats_period_ms(),
            single_thread: false,
            dump: false,
            store: StoreConfig::default(),
        }
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

impl ReceiverConfig {
    pub fn load(path: impl AsRef<Path> + ToString) -> Result<Self, ConfigError> {
        let toml_to_str = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        let receiver_config: ReceiverConfig = toml::from_str(&toml_to_str)?;
        Ok(receiver_config)
    }

    pub fn uni_shape(&self) -> UniShape {
        UniShape::new(self.uni_volumes, self.uni_segments, self.uni_addresses)
    }

    /// CPU for handler `i`, 0 (unpinned) when not listed.
    pub fn handler_cpu(&self, i: usize) -> usize {
        self.handler_cpus.get(i).copied().unwrap_or(0)
    }

    /// Bytes one handler's state file will occupy.
    pub fn store_file_bytes(&self) -> u64 {
        self.uni_shape().nodes() * self.store.state_size as u64
    }

    /// Rejects combinations that cannot run. Called once before any worker starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.slot_size < MIN_SLOT_SIZE {
            return Err(invalid("slot_size", format!("must be at least {MIN_SLOT_SIZE}")));
        }
        if self.slots_per_buffer == 0 || self.slots_per_buffer > MAX_BATCH_LIMIT {
            return Err(invalid("slots_per_buffer", format!("must be in 1..={MAX_BATCH_LIMIT}")));
        }
        if self.max_batch == 0 || self.max_batch > self.slots_per_buffer {
            return Err(invalid(
                "max_batch",
                format!("must be in 1..={}", self.slots_per_buffer),
            ));
        }
        if self.handler_threads == 0 || self.handler_threads > MAX_HANDLERS {
            return Err(invalid("handler_threads", format!("must be in 1..={MAX_HANDLERS}")));
        }
        if self.buffers_per_lane == 0 {
            return Err(invalid("buffers_per_lane", "must be at least 1"));
        }
        for (field, pct) in [("store_percent", self.store_percent), ("reply_percent", self.reply_percent)] {
            if !(0.0..=100.0).contains(&pct) {
                return Err(invalid(field, "must be in 0..=100"));
            }
        }
        if self.reply_percent > 0.0 && self.reply_address.is_none() {
            return Err(invalid("reply_address", "required when reply_percent > 0"));
        }
        if !self.uni_shape().is_valid() {
            return Err(invalid(
                "uni",
                format!(
                    "volumes 1..={}, segments 1..={}, addresses 1..={}",
                    UniShape::MAX_VOLUMES,
                    UniShape::MAX_SEGMENTS,
                    UniShape::MAX_ADDRESSES
                ),
            ));
        }
        if self.store_percent > 0.0 {
            if self.store.state_size < 24 {
                return Err(invalid("store.state_size", "must be at least 24"));
            }
            if self.store_file_bytes() > MAX_STORE_FILE_BYTES {
                return Err(invalid(
                    "store",
                    format!("state file would be {} bytes, limit is 64 GiB", self.store_file_bytes()),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg: ReceiverConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.handler_threads, 2);
        assert_eq!(cfg.max_batch, 1);
        assert_eq!(cfg.stats_period_ms, 5_000);
        assert_eq!(cfg.store.root, PathBuf::from("/tmp/xnetp"));
        assert_eq!(cfg.store.state_size, 4096);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn parses_tables_and_addresses() {
        let cfg: ReceiverConfig = toml::from_str(
            r#"
            max_batch = 64
            handler_threads = 4
            handler_cpus = [2, 3]
            reply_percent = 12.5
            reply_address = "fd00::1"
            uni_volumes = 4

            [store]
            root = "/var/tmp/q"
            sync = true
            "#,
        )
        .unwrap();
        assert_eq!(cfg.handler_cpu(1), 3);
        assert_eq!(cfg.handler_cpu(3), 0);
        assert_eq!(cfg.reply_address, Some("fd00::1".parse().unwrap()));
        assert_eq!(cfg.uni_shape(), UniShape::new(4, 1, 1));
        assert!(cfg.store.sync);
        assert_eq!(cfg.store.file, "cim.dat");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn reply_without_address_is_rejected() {
        let cfg = ReceiverConfig {
            reply_percent: 1.0,
            ..ReceiverConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid { field: "reply_address", .. })
        ));
    }

    #[test]
    fn batch_and_thread_limits() {
        let too_big = ReceiverConfig {
            max_batch: 2048,
            ..ReceiverConfig::default()
        };
        assert!(too_big.validate().is_err());

        let no_handlers = ReceiverConfig {
            handler_threads: 0,
            ..ReceiverConfig::default()
        };
        assert!(no_handlers.validate().is_err());

        let many = ReceiverConfig {
            handler_threads: 65,
            ..ReceiverConfig::default()
        };
        assert!(many.validate().is_err());
    }

    #[test]
    fn oversized_store_is_rejected() {
        let cfg = ReceiverConfig {
            store_percent: 10.0,
            uni_volumes: 256,
            uni_segments: 256,
            uni_addresses: 65_535,
            ..ReceiverConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid { field: "store", .. })));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = ReceiverConfig::load("/nonexistent/receiver.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}

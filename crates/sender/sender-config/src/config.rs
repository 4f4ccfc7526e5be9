use quarry_wire::UniShape;
use quarry_wire::layout::MIN_SLOT_SIZE;
use serde::Deserialize;
use std::net::Ipv6Addr;
use std::path::Path;

pub const MAX_THREADS: usize = 16;
pub const MAX_BATCH: usize = 16;

#[derive(Deserialize, Debug, Clone)]
pub struct SenderConfig {
    #[serde(default = "defaults::log_level")]
    pub log_level: String,
    #[serde(default = "defaults::protocol")]
    pub protocol: i32,

    #[serde(default)]
    pub destination: Option<Ipv6Addr>,
    /// Weights for MINIMAL, ATTRIBUTE, ATTRIBUTE_GROUP, ERROR; must sum to 100.
    #[serde(default = "defaults::distribution")]
    pub distribution: Vec<u32>,
    /// Total packet budget across all senders; -1 runs unbounded.
    #[serde(default = "defaults::unbounded")]
    pub packets: i64,
    /// Target rate across all senders in packets/s; -1 sends as fast as possible.
    #[serde(default = "defaults::unbounded")]
    pub pps: i64,
    #[serde(default = "defaults::threads")]
    pub threads: usize,
    /// Datagrams per send call.
    #[serde(default = "defaults::batch")]
    pub batch: usize,
    #[serde(default)]
    pub sender_cpus: Vec<usize>,

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
    #[serde(default)]
    pub send_buffer_bytes: Option<usize>,

    #[serde(default = "defaults::stats_period_ms")]
    pub stats_period_ms: u64,
    #[serde(default)]
    pub dump: bool,
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
    pub fn log_level() -> String {
        "info".into()
    }

    pub fn protocol() -> i32 {
        quarry_wire::layout::PROTOCOL
    }

    pub fn distribution() -> Vec<u32> {
        vec![100, 0, 0, 0]
    }

    pub fn unbounded() -> i64 {
        -1
    }

    pub fn threads() -> usize {
        1
    }

    pub fn batch() -> usize {
        1
    }

    pub fn uni_dimension() -> u32 {
        1
    }

    pub fn slots_per_buffer() -> usize {
        16
    }

    pub fn slot_size() -> usize {
        1024
    }

    pub fn stats_period_ms() -> u64 {
        5_000
    }
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            log_level: defaults::log_level(),
            protocol: defaults::protocol(),
            destination: None,
            distribution: defaults::distribution(),
            packets: defaults::unbounded(),
            pps: defaults::unbounded(),
            threads: defaults::threads(),
            batch: defaults::batch(),
            sender_cpus: Vec::new(),
            uni_volumes: defaults::uni_dimension(),
            uni_segments: defaults::uni_dimension(),
            uni_addresses: defaults::uni_dimension(),
            slots_per_buffer: defaults::slots_per_buffer(),
            slot_size: defaults::slot_size(),
            send_buffer_bytes: None,
            stats_period_ms: defaults::stats_period_ms(),
            dump: false,
        }
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// Parses the command-line form `"70:20:5:5"`.
pub fn parse_distribution(s: &str) -> Result<Vec<u32>, ConfigError> {
    s.split(':')
        .map(|part| {
            part.trim()
                .parse::<u32>()
                .map_err(|e| invalid("distribution", format!("'{part}': {e}")))
        })
        .collect()
}

impl SenderConfig {
    pub fn load(path: impl AsRef<Path> + ToString) -> Result<Self, ConfigError> {
        let toml_to_str = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        let sender_config: SenderConfig = toml::from_str(&toml_to_str)?;
        Ok(sender_config)
    }

    pub fn uni_shape(&self) -> UniShape {
        UniShape::new(self.uni_volumes, self.uni_segments, self.uni_addresses)
    }

    pub fn sender_cpu(&self, i: usize) -> usize {
        self.sender_cpus.get(i).copied().unwrap_or(0)
    }

    /// The distribution as a fixed array. Only meaningful after `validate`.
    pub fn distribution_weights(&self) -> [u32; 4] {
        let mut w = [0u32; 4];
        for (dst, src) in w.iter_mut().zip(&self.distribution) {
            *dst = *src;
        }
        w
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.destination.is_none() {
            return Err(invalid("destination", "a destination address is required"));
        }
        if self.distribution.len() != 4 {
            return Err(invalid(
                "distribution",
                format!("expected 4 values, got {}", self.distribution.len()),
            ));
        }
        let sum: u64 = self.distribution.iter().map(|w| *w as u64).sum();
        if sum != 100 {
            return Err(invalid("distribution", format!("values sum to {sum}, expected 100")));
        }
        if self.packets < -1 {
            return Err(invalid("packets", "must be -1 or a non-negative count"));
        }
        if self.pps == 0 || self.pps < -1 {
            return Err(invalid("pps", "must be -1 or a positive rate"));
        }
        if self.threads == 0 || self.threads > MAX_THREADS {
            return Err(invalid("threads", format!("must be in 1..={MAX_THREADS}")));
        }
        if self.slot_size < MIN_SLOT_SIZE {
            return Err(invalid("slot_size", format!("must be at least {MIN_SLOT_SIZE}")));
        }
        let batch_limit = MAX_BATCH.min(self.slots_per_buffer);
        if self.batch == 0 || self.batch > batch_limit {
            return Err(invalid("batch", format!("must be in 1..={batch_limit}")));
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
        Ok(())
    }
}

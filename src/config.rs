//! Runtime configuration: defaults, then an optional file, then `MDAGG__*` environment overrides.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::egress::queue::OverflowPolicy;
use crate::error::{AggError, AggResult};

pub const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResyncPolicy {
    /// A side replace re-baselines the sequence and restores sync for that side.
    #[default]
    OnReplace,
    /// A sequence gap excludes the venue for the rest of the process.
    Never,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub depth: usize,
    pub shard_count: Option<usize>,
    pub min_emit_interval_ms: u64,
    pub venue_stale_after_ms: u64,
    pub shard_queue_capacity: usize,
    pub output_queue_capacity: usize,
    pub resync: ResyncPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            depth: 10,
            shard_count: None,
            min_emit_interval_ms: 10,
            venue_stale_after_ms: 250,
            shard_queue_capacity: 16_384,
            output_queue_capacity: 8_192,
            resync: ResyncPolicy::OnReplace,
        }
    }
}

impl EngineConfig {
    pub fn depth(&self) -> usize {
        self.depth.clamp(1, MAX_DEPTH)
    }

    pub fn shards(&self) -> usize {
        match self.shard_count {
            Some(n) if n > 0 => n,
            _ => std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
        }
    }

    pub fn min_emit_interval(&self) -> Duration {
        Duration::from_millis(self.min_emit_interval_ms)
    }

    /// Period of the shard sweep. A heartbeat goes out at most one sweep after it falls due.
    pub fn tick_interval(&self) -> Duration {
        (self.min_emit_interval() / 8).max(Duration::from_millis(1))
    }

    pub fn venue_stale_after(&self) -> Duration {
        Duration::from_millis(self.venue_stale_after_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EgressConfig {
    pub client_queue_capacity: usize,
    pub overflow: OverflowPolicy,
    pub conflate_interval_ms: Option<u64>,
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self { client_queue_capacity: 4_096, overflow: OverflowPolicy::DropOldest, conflate_interval_ms: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RingConfig {
    pub name: String,
    pub dir: PathBuf,
    pub slot_size: usize,
    pub slot_count: usize,
    pub write_timeout_ms: u64,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            name: "md_agg_l2".into(),
            dir: PathBuf::from("/dev/shm"),
            slot_size: 2_048,
            slot_count: 8_192,
            write_timeout_ms: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self { log_filter: "info".into() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggConfig {
    pub engine: EngineConfig,
    pub egress: EgressConfig,
    pub ring: RingConfig,
    pub telemetry: TelemetryConfig,
}

impl AggConfig {
    /// Layer defaults, an optional config file and `MDAGG__SECTION__KEY` env vars.
    pub fn load(path: Option<&str>) -> AggResult<Self> {
        let mut builder = config::Config::builder().add_source(config::Config::try_from(&AggConfig::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix("MDAGG")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let cfg: AggConfig = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> AggResult<()> {
        if self.engine.depth == 0 || self.engine.depth > MAX_DEPTH {
            return Err(AggError::InvalidConfig(format!(
                "engine.depth {} outside 1..={MAX_DEPTH}",
                self.engine.depth
            )));
        }
        if self.engine.shard_queue_capacity == 0 || self.engine.output_queue_capacity == 0 {
            return Err(AggError::InvalidConfig("engine queue capacities must be positive".into()));
        }
        if self.egress.client_queue_capacity == 0 {
            return Err(AggError::InvalidConfig("egress.client_queue_capacity must be positive".into()));
        }
        if self.ring.slot_size < 8 || self.ring.slot_size > i32::MAX as usize {
            return Err(AggError::InvalidConfig(format!("ring.slot_size {} out of range", self.ring.slot_size)));
        }
        if self.ring.slot_count == 0 || self.ring.slot_count > i32::MAX as usize {
            return Err(AggError::InvalidConfig(format!("ring.slot_count {} out of range", self.ring.slot_count)));
        }
        Ok(())
    }

    pub fn conflate_interval(&self) -> Option<Duration> {
        self.egress.conflate_interval_ms.filter(|ms| *ms > 0).map(Duration::from_millis)
    }
}

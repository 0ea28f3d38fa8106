//! Multi-venue market-data aggregation: sharded incremental L2 ladders and NBBO,
//! fan-out with per-client backpressure, and a shared-memory ring transport.

pub mod config;
pub mod egress;
pub mod engine;
pub mod error;
pub mod market_data;
pub mod telemetry;
pub mod transport;

pub use config::AggConfig;
pub use error::{AggError, AggResult};

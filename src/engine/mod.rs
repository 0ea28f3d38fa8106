pub mod aggregator;
pub mod ladder;
pub mod nbbo;
pub mod router;
pub mod shard;
pub mod symbol;
pub mod types;
pub mod venue;

pub use aggregator::{Aggregator, AggregatorHandle};
pub use shard::ShardState;
pub use symbol::SymbolAggregateState;

// Market data module entrypoint
pub mod adapters;   // venue feed contract + in-process channel feed
pub mod normaliser; // converts decimal strings <-> integer ticks

//! Signal conditioning and statistics.

pub mod filter;
pub mod stats;

pub use filter::MovingAverage;
pub use stats::StatsAccumulator;

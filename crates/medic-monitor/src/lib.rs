//! Monitoring and alerting aggregator.

pub mod aggregator;
pub mod alerts;
pub mod error;
pub mod score;
pub mod window;

pub use aggregator::{Aggregator, AGGREGATE_SOURCE};
pub use alerts::{AlertBook, Breach};
pub use error::AggregationError;
pub use score::{compute_health_score, HealthInputs};
pub use window::{classify_trend, percentile_exceeds, percentiles, RecencyMap, RingWindow};

use thiserror::Error;

/// A malformed event reached the aggregator. The event is dropped.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AggregationError {
    #[error("malformed {event} event: {reason}")]
    Malformed { event: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotifyError {
    #[error("notification sink is not configured: {sink}")]
    SinkNotConfigured { sink: String },
    #[error("notification sink failed: {message}")]
    SinkFailed { message: String },
}

#[cfg(test)]
mod tests {
    use super::NotifyError;

    #[test]
    fn not_configured_names_the_sink() {
        let err = NotifyError::SinkNotConfigured {
            sink: "webhook".to_string(),
        };
        assert_eq!(err.to_string(), "notification sink is not configured: webhook");
    }

    #[test]
    fn sink_failed_formats_failure_message() {
        let err = NotifyError::SinkFailed {
            message: "network timeout".to_string(),
        };
        assert_eq!(err.to_string(), "notification sink failed: network timeout");
    }
}

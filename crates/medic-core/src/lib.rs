pub mod config;
pub mod fix;
pub mod health;
pub mod state;
pub mod types;
pub mod validation;

pub use config::*;
pub use fix::*;
pub use health::*;
pub use state::*;
pub use types::*;
pub use validation::*;

#[cfg(test)]
mod tests {
    use super::{
        parse_test_configuration, FixRecord, MonitoringSnapshot, SessionState, TestResult,
        Validate,
    };
    use std::any::TypeId;

    #[test]
    fn crate_root_reexports_core_types() {
        let _ = TypeId::of::<TestResult>();
        let _ = TypeId::of::<FixRecord>();
        let _ = TypeId::of::<MonitoringSnapshot>();
        let _ = TypeId::of::<SessionState>();
    }

    #[test]
    fn crate_root_reexports_parse_and_validate_helpers() {
        let config = parse_test_configuration(
            r#"
id = "smoke"
concurrency_level = 2
timeout_ms = 500

[[suites]]
id = "auth"
"#,
        )
        .expect("parse configuration");

        assert!(config.validate().is_empty());
    }
}

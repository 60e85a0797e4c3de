//! Health score computation.

use medic_core::MonitorConfig;

/// Everything the health score depends on.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HealthInputs {
    /// Percent of windowed non-skipped results that passed.
    pub pass_rate: f64,
    pub error_rate: f64,
    pub p95_latency_ms: Option<f64>,
    pub unresolved_critical: u32,
}

/// Score in `[0, 100]`, recomputed from scratch on every call.
pub fn compute_health_score(inputs: &HealthInputs, config: &MonitorConfig) -> f64 {
    let mut score = 100.0;

    let pass_rate = inputs.pass_rate.clamp(0.0, 100.0);
    score -= (100.0 - pass_rate) * config.reliability_weight;

    if inputs.error_rate > config.thresholds.error_rate_pct {
        score -= config.error_rate_penalty;
    }

    if let Some(p95) = inputs.p95_latency_ms {
        if p95 > config.thresholds.latency_ms {
            score -= config.latency_penalty;
        }
    }

    score -= f64::from(inputs.unresolved_critical) * config.critical_error_penalty;

    if score.is_nan() {
        return 0.0;
    }
    score.clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use medic_core::HealthStatus;

    fn healthy_inputs() -> HealthInputs {
        HealthInputs {
            pass_rate: 100.0,
            error_rate: 0.0,
            p95_latency_ms: Some(120.0),
            unresolved_critical: 0,
        }
    }

    #[test]
    fn perfect_run_scores_full_marks() {
        let config = MonitorConfig::default();
        assert_eq!(compute_health_score(&healthy_inputs(), &config), 100.0);
    }

    #[test]
    fn penalties_accumulate() {
        let config = MonitorConfig::default();
        let inputs = HealthInputs {
            pass_rate: 80.0,
            error_rate: 20.0,
            p95_latency_ms: Some(5_000.0),
            unresolved_critical: 1,
        };
        // 100 - 20*0.5 - 15 - 10 - 10
        assert_eq!(compute_health_score(&inputs, &config), 55.0);
        assert_eq!(HealthStatus::from_score(55.0), HealthStatus::Unhealthy);
    }

    #[test]
    fn score_is_clamped_at_zero() {
        let config = MonitorConfig::default();
        let inputs = HealthInputs {
            pass_rate: 0.0,
            error_rate: 100.0,
            p95_latency_ms: Some(10_000.0),
            unresolved_critical: 12,
        };
        assert_eq!(compute_health_score(&inputs, &config), 0.0);
    }

    #[test]
    fn same_inputs_same_score() {
        let config = MonitorConfig::default();
        let inputs = HealthInputs {
            pass_rate: 93.0,
            error_rate: 7.0,
            p95_latency_ms: None,
            unresolved_critical: 0,
        };
        let first = compute_health_score(&inputs, &config);
        let second = compute_health_score(&inputs, &config);
        assert_eq!(first, second);
        assert_eq!(first, 96.5);
    }
}

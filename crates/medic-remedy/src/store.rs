//! In-memory component registry that repairs act on.
//!
//! Each component carries its tunable settings, the demand the environment
//! currently places on it (what a check needs to see to pass) and optional
//! fault injection used to exercise failure paths.

use futures::future::BoxFuture;
use medic_core::{
    CheckOutcome, ErrorContext, ErrorEntry, FixStrategy, RollbackPayload, ValidationCheck,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::catalog::strategy_spec;
use crate::error::RemedyError;
use crate::target::RepairTarget;

const MAX_SELECTOR_WAIT_MS: u64 = 30_000;
const MAX_NETWORK_TIMEOUT_MS: u64 = 120_000;
const MAX_NETWORK_RETRIES: u32 = 5;
const LENIENT_RULE: &str = "lenient";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentSettings {
    pub route_fallbacks: BTreeMap<String, String>,
    pub selector_wait_ms: u64,
    pub validation_rules: BTreeMap<String, String>,
    pub pool_size: u32,
    pub pool_idle_timeout_ms: u64,
    pub schema_columns: BTreeSet<String>,
    pub indexes: BTreeSet<String>,
    pub workers: u32,
    pub restarts: u32,
    pub network_timeout_ms: u64,
    pub network_retries: u32,
    pub cache_bytes: u64,
    pub resource_usage_pct: f64,
    /// Share of `resource_usage_pct` held by caches.
    pub cache_usage_pct: f64,
}

impl Default for ComponentSettings {
    fn default() -> Self {
        Self {
            route_fallbacks: BTreeMap::new(),
            selector_wait_ms: 500,
            validation_rules: BTreeMap::new(),
            pool_size: 10,
            pool_idle_timeout_ms: 30_000,
            schema_columns: BTreeSet::new(),
            indexes: BTreeSet::new(),
            workers: 2,
            restarts: 0,
            network_timeout_ms: 5_000,
            network_retries: 1,
            cache_bytes: 0,
            resource_usage_pct: 40.0,
            cache_usage_pct: 0.0,
        }
    }
}

/// What the environment currently requires of the component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDemand {
    pub required_wait_ms: u64,
    pub pool_demand: u32,
    /// `table.column` entries the schema must contain.
    pub required_columns: BTreeSet<String>,
    /// Tables whose queries need an `idx_<table>` index.
    pub slow_tables: BTreeSet<String>,
    pub required_timeout_ms: u64,
    pub usage_ceiling_pct: f64,
}

impl Default for ComponentDemand {
    fn default() -> Self {
        Self {
            required_wait_ms: 0,
            pool_demand: 0,
            required_columns: BTreeSet::new(),
            slow_tables: BTreeSet::new(),
            required_timeout_ms: 0,
            usage_ceiling_pct: 85.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultInjection {
    pub fail_capture: bool,
    pub fail_apply: bool,
    pub fail_restore: bool,
    /// The failure reproduces no matter what the repair changes.
    pub persistent: bool,
    pub apply_delay_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentState {
    pub settings: ComponentSettings,
    pub demand: ComponentDemand,
    pub faults: FaultInjection,
}

impl ComponentState {
    pub fn new(settings: ComponentSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    pub fn with_demand(mut self, demand: ComponentDemand) -> Self {
        self.demand = demand;
        self
    }

    pub fn with_faults(mut self, faults: FaultInjection) -> Self {
        self.faults = faults;
        self
    }
}

#[derive(Debug, Default)]
pub struct ComponentStore {
    components: Mutex<BTreeMap<String, ComponentState>>,
}

impl ComponentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn components(&self) -> MutexGuard<'_, BTreeMap<String, ComponentState>> {
        self.components.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, name: impl Into<String>, state: ComponentState) {
        self.components().insert(name.into(), state);
    }

    pub fn state(&self, name: &str) -> Option<ComponentState> {
        self.components().get(name).cloned()
    }

    pub fn settings(&self, name: &str) -> Option<ComponentSettings> {
        self.state(name).map(|state| state.settings)
    }

    pub fn component_names(&self) -> Vec<String> {
        self.components().keys().cloned().collect()
    }

    /// Mutate a component in place. Returns false when it is not registered.
    pub fn update(&self, name: &str, f: impl FnOnce(&mut ComponentState)) -> bool {
        match self.components().get_mut(name) {
            Some(state) => {
                f(state);
                true
            }
            None => false,
        }
    }

    fn with_component<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut ComponentState) -> Result<T, RemedyError>,
    ) -> Result<T, RemedyError> {
        let mut components = self.components();
        let state = components
            .get_mut(name)
            .ok_or_else(|| RemedyError::UnknownComponent {
                component: name.to_string(),
            })?;
        f(state)
    }

    fn capture_now(
        &self,
        strategy: FixStrategy,
        error: &ErrorEntry,
    ) -> Result<Option<RollbackPayload>, RemedyError> {
        let component = error.component.clone();
        self.with_component(&error.component, |state| {
            if state.faults.fail_capture {
                return Err(RemedyError::Capture {
                    component: component.clone(),
                    reason: "snapshot source unavailable".to_string(),
                });
            }
            let s = &state.settings;
            let payload = match strategy {
                FixStrategy::NavigationConfig => Some(RollbackPayload::NavigationConfig {
                    component,
                    route_fallbacks: s.route_fallbacks.clone(),
                }),
                FixStrategy::ElementInteraction => Some(RollbackPayload::ElementInteraction {
                    component,
                    selector_wait_ms: s.selector_wait_ms,
                }),
                FixStrategy::InputValidation => Some(RollbackPayload::InputValidation {
                    component,
                    validation_rules: s.validation_rules.clone(),
                }),
                FixStrategy::ConnectionPool => Some(RollbackPayload::ConnectionPool {
                    component,
                    pool_size: s.pool_size,
                    idle_timeout_ms: s.pool_idle_timeout_ms,
                }),
                FixStrategy::Schema => Some(RollbackPayload::Schema {
                    component,
                    columns: s.schema_columns.clone(),
                }),
                FixStrategy::Index => Some(RollbackPayload::Index {
                    component,
                    indexes: s.indexes.clone(),
                }),
                FixStrategy::ServiceRestart => Some(RollbackPayload::ServiceRestart {
                    component,
                    workers: s.workers,
                    restarts: s.restarts,
                }),
                FixStrategy::Network => Some(RollbackPayload::Network {
                    component,
                    timeout_ms: s.network_timeout_ms,
                    retries: s.network_retries,
                }),
                FixStrategy::ResourceReclaim => None,
            };
            Ok(payload)
        })
    }

    fn apply_now(&self, strategy: FixStrategy, error: &ErrorEntry) -> Result<String, RemedyError> {
        let fail = |reason: &str| RemedyError::Apply {
            strategy,
            component: error.component.clone(),
            reason: reason.to_string(),
        };

        self.with_component(&error.component, |state| {
            if state.faults.fail_apply {
                return Err(fail("repair action rejected by component"));
            }
            let s = &mut state.settings;
            let summary = match strategy {
                FixStrategy::NavigationConfig => {
                    let path = route_path(error).ok_or_else(|| fail("no route in error context"))?;
                    s.route_fallbacks.insert(path.clone(), "/".to_string());
                    format!("added fallback for route {path}")
                }
                FixStrategy::ElementInteraction => {
                    s.selector_wait_ms = s
                        .selector_wait_ms
                        .saturating_mul(2)
                        .clamp(1_000, MAX_SELECTOR_WAIT_MS);
                    format!("selector wait raised to {}ms", s.selector_wait_ms)
                }
                FixStrategy::InputValidation => {
                    let field = input_field(error).ok_or_else(|| fail("no input field in error context"))?;
                    s.validation_rules.insert(field.clone(), LENIENT_RULE.to_string());
                    format!("relaxed validation for field {field}")
                }
                FixStrategy::ConnectionPool => {
                    s.pool_size = s.pool_size.saturating_mul(2).max(s.pool_size.saturating_add(1));
                    s.pool_idle_timeout_ms = (s.pool_idle_timeout_ms / 2).max(1_000);
                    format!(
                        "pool size raised to {}, idle timeout {}ms",
                        s.pool_size, s.pool_idle_timeout_ms
                    )
                }
                FixStrategy::Schema => {
                    let column = schema_column(error).ok_or_else(|| fail("no column in error context"))?;
                    s.schema_columns.insert(column.clone());
                    format!("added column {column}")
                }
                FixStrategy::Index => {
                    let table = query_table(error).ok_or_else(|| fail("no table in error context"))?;
                    let index = format!("idx_{table}");
                    s.indexes.insert(index.clone());
                    format!("created index {index}")
                }
                FixStrategy::ServiceRestart => {
                    s.restarts += 1;
                    s.workers = s.workers.max(1);
                    format!("restarted with {} workers (restart #{})", s.workers, s.restarts)
                }
                FixStrategy::Network => {
                    s.network_timeout_ms = s
                        .network_timeout_ms
                        .saturating_mul(2)
                        .clamp(1_000, MAX_NETWORK_TIMEOUT_MS);
                    s.network_retries = s.network_retries.saturating_add(1).min(MAX_NETWORK_RETRIES);
                    format!(
                        "network timeout {}ms with {} retries",
                        s.network_timeout_ms, s.network_retries
                    )
                }
                FixStrategy::ResourceReclaim => {
                    let reclaimed = s.cache_bytes;
                    s.resource_usage_pct = (s.resource_usage_pct - s.cache_usage_pct).max(0.0);
                    s.cache_usage_pct = 0.0;
                    s.cache_bytes = 0;
                    format!("reclaimed {reclaimed} cache bytes")
                }
            };
            Ok(summary)
        })
    }

    fn check_now(
        &self,
        strategy: FixStrategy,
        check: ValidationCheck,
        error: &ErrorEntry,
    ) -> Result<CheckOutcome, RemedyError> {
        self.with_component(&error.component, |state| {
            let (passed, detail) = evaluate(state, strategy, check, error);
            Ok(CheckOutcome {
                check,
                passed,
                detail,
            })
        })
    }

    fn restore_now(&self, payload: &RollbackPayload) -> Result<(), RemedyError> {
        let component = payload.component().to_string();
        self.with_component(&component, |state| {
            if state.faults.fail_restore {
                return Err(RemedyError::Restore {
                    component: component.clone(),
                    reason: "component refused to reload prior settings".to_string(),
                });
            }
            let s = &mut state.settings;
            match payload {
                RollbackPayload::NavigationConfig {
                    route_fallbacks, ..
                } => s.route_fallbacks = route_fallbacks.clone(),
                RollbackPayload::ElementInteraction {
                    selector_wait_ms, ..
                } => s.selector_wait_ms = *selector_wait_ms,
                RollbackPayload::InputValidation {
                    validation_rules, ..
                } => s.validation_rules = validation_rules.clone(),
                RollbackPayload::ConnectionPool {
                    pool_size,
                    idle_timeout_ms,
                    ..
                } => {
                    s.pool_size = *pool_size;
                    s.pool_idle_timeout_ms = *idle_timeout_ms;
                }
                RollbackPayload::Schema { columns, .. } => s.schema_columns = columns.clone(),
                RollbackPayload::Index { indexes, .. } => s.indexes = indexes.clone(),
                RollbackPayload::ServiceRestart {
                    workers, restarts, ..
                } => {
                    s.workers = *workers;
                    s.restarts = *restarts;
                }
                RollbackPayload::Network {
                    timeout_ms,
                    retries,
                    ..
                } => {
                    s.network_timeout_ms = *timeout_ms;
                    s.network_retries = *retries;
                }
            }
            Ok(())
        })
    }
}

fn evaluate(
    state: &ComponentState,
    strategy: FixStrategy,
    check: ValidationCheck,
    error: &ErrorEntry,
) -> (bool, Option<String>) {
    let s = &state.settings;
    let d = &state.demand;
    match check {
        ValidationCheck::FailureNoLongerReproduces => {
            if state.faults.persistent {
                return (false, Some("failure still reproduces".to_string()));
            }
            let primary = strategy_spec(strategy).checks[0];
            if primary == ValidationCheck::FailureNoLongerReproduces {
                return (true, None);
            }
            evaluate(state, strategy, primary, error)
        }
        ValidationCheck::RouteResolves => match route_path(error) {
            Some(path) if s.route_fallbacks.contains_key(&path) => (true, None),
            Some(path) => (false, Some(format!("route {path} has no fallback"))),
            None => (false, Some("no route in error context".to_string())),
        },
        ValidationCheck::ElementInteractable => (
            s.selector_wait_ms >= d.required_wait_ms,
            Some(format!(
                "wait {}ms, element needs {}ms",
                s.selector_wait_ms, d.required_wait_ms
            )),
        ),
        ValidationCheck::InputAccepted => match input_field(error) {
            Some(field) => (
                s.validation_rules.get(&field).map(String::as_str) == Some(LENIENT_RULE),
                Some(format!("field {field}")),
            ),
            None => (false, Some("no input field in error context".to_string())),
        },
        ValidationCheck::PoolHasHeadroom => (
            s.pool_size >= d.pool_demand,
            Some(format!("pool {} for demand {}", s.pool_size, d.pool_demand)),
        ),
        ValidationCheck::SchemaMatches => {
            let missing: Vec<&String> = d
                .required_columns
                .iter()
                .filter(|column| !s.schema_columns.contains(*column))
                .collect();
            if missing.is_empty() {
                (true, None)
            } else {
                (false, Some(format!("missing columns {missing:?}")))
            }
        }
        ValidationCheck::QueryWithinBudget => {
            let unindexed: Vec<&String> = d
                .slow_tables
                .iter()
                .filter(|table| !s.indexes.contains(&format!("idx_{table}")))
                .collect();
            if unindexed.is_empty() {
                (true, None)
            } else {
                (false, Some(format!("unindexed tables {unindexed:?}")))
            }
        }
        ValidationCheck::ServiceHealthy => (
            s.workers > 0,
            Some(format!("{} workers running", s.workers)),
        ),
        ValidationCheck::EndpointReachable => (
            s.network_timeout_ms >= d.required_timeout_ms,
            Some(format!(
                "timeout {}ms, endpoint needs {}ms",
                s.network_timeout_ms, d.required_timeout_ms
            )),
        ),
        ValidationCheck::ResourceBelowThreshold => (
            s.resource_usage_pct < d.usage_ceiling_pct,
            Some(format!(
                "usage {:.1}% against ceiling {:.1}%",
                s.resource_usage_pct, d.usage_ceiling_pct
            )),
        ),
    }
}

fn route_path(error: &ErrorEntry) -> Option<String> {
    match &error.context {
        Some(ErrorContext::Route { path }) => Some(path.clone()),
        Some(ErrorContext::Http { endpoint, .. }) => Some(endpoint.clone()),
        _ => None,
    }
}

fn input_field(error: &ErrorEntry) -> Option<String> {
    match &error.context {
        Some(ErrorContext::Input { field, .. }) => Some(field.clone()),
        _ => None,
    }
}

fn schema_column(error: &ErrorEntry) -> Option<String> {
    match &error.context {
        Some(ErrorContext::Schema {
            table,
            column: Some(column),
        }) => Some(format!("{table}.{column}")),
        _ => None,
    }
}

fn query_table(error: &ErrorEntry) -> Option<String> {
    match &error.context {
        Some(ErrorContext::Query { table, .. }) | Some(ErrorContext::Schema { table, .. }) => {
            Some(table.clone())
        }
        _ => None,
    }
}

impl RepairTarget for ComponentStore {
    fn capture<'a>(
        &'a self,
        strategy: FixStrategy,
        error: &'a ErrorEntry,
    ) -> BoxFuture<'a, Result<Option<RollbackPayload>, RemedyError>> {
        Box::pin(async move { self.capture_now(strategy, error) })
    }

    fn apply<'a>(
        &'a self,
        strategy: FixStrategy,
        error: &'a ErrorEntry,
    ) -> BoxFuture<'a, Result<String, RemedyError>> {
        Box::pin(async move {
            let delay_ms = self
                .state(&error.component)
                .map(|state| state.faults.apply_delay_ms)
                .unwrap_or(0);
            if delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
            self.apply_now(strategy, error)
        })
    }

    fn check<'a>(
        &'a self,
        strategy: FixStrategy,
        check: ValidationCheck,
        error: &'a ErrorEntry,
    ) -> BoxFuture<'a, Result<CheckOutcome, RemedyError>> {
        Box::pin(async move { self.check_now(strategy, check, error) })
    }

    fn restore<'a>(&'a self, payload: &'a RollbackPayload) -> BoxFuture<'a, Result<(), RemedyError>> {
        Box::pin(async move { self.restore_now(payload) })
    }
}

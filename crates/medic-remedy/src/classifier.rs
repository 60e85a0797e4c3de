//! Maps an error entry to a repair strategy and risk tier.
//!
//! Resolution order:
//! - typed [`ErrorContext`] with an unambiguous repair (pool, route, schema, ...)
//! - keyword rules over the description, filtered by category and component
//!
//! Errors that match nothing are left unclassified rather than guessed at.

use medic_core::{ClassifierRuleConfig, ErrorCategory, ErrorContext, ErrorEntry, FixStrategy, RiskLevel};
use serde::{Deserialize, Serialize};

/// One row of the classification table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifierRule {
    pub name: String,
    /// Lowercase phrases; any one of them must appear in the description.
    pub keywords: Vec<String>,
    pub category: Option<ErrorCategory>,
    pub component: Option<String>,
    pub strategy: FixStrategy,
    /// Higher wins when several rules match.
    pub priority: u8,
}

impl ClassifierRule {
    fn builtin(name: &str, keywords: &[&str], strategy: FixStrategy, priority: u8) -> Self {
        Self {
            name: name.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            category: None,
            component: None,
            strategy,
            priority,
        }
    }

    /// Keyword hits, or `None` when the rule does not apply.
    fn matches(&self, entry: &ErrorEntry, description: &str) -> Option<Vec<String>> {
        if let Some(category) = self.category {
            if category != entry.category {
                return None;
            }
        }
        if let Some(component) = &self.component {
            if !component.eq_ignore_ascii_case(&entry.component) {
                return None;
            }
        }

        let hits: Vec<String> = self
            .keywords
            .iter()
            .filter(|keyword| description.contains(keyword.as_str()))
            .cloned()
            .collect();
        if !self.keywords.is_empty() && hits.is_empty() {
            return None;
        }
        Some(hits)
    }
}

impl From<&ClassifierRuleConfig> for ClassifierRule {
    fn from(config: &ClassifierRuleConfig) -> Self {
        Self {
            name: config.name.clone(),
            keywords: config
                .keywords
                .iter()
                .map(|keyword| normalize(keyword))
                .collect(),
            category: config.category,
            component: config.component.clone(),
            strategy: config.strategy,
            priority: config.priority,
        }
    }
}

fn default_rules() -> Vec<ClassifierRule> {
    vec![
        ClassifierRule::builtin(
            "connection_pool",
            &["connection pool", "pool exhausted", "too many connections", "connection limit"],
            FixStrategy::ConnectionPool,
            9,
        ),
        ClassifierRule::builtin(
            "schema",
            &["no such column", "unknown column", "missing column", "schema mismatch", "column does not exist"],
            FixStrategy::Schema,
            9,
        ),
        ClassifierRule::builtin(
            "index",
            &["slow query", "full table scan", "missing index", "query timeout"],
            FixStrategy::Index,
            8,
        ),
        ClassifierRule::builtin(
            "service_restart",
            &["service unavailable", "worker crashed", "process exited", "unhealthy service", "503"],
            FixStrategy::ServiceRestart,
            7,
        ),
        ClassifierRule::builtin(
            "network",
            &["connection refused", "connection reset", "econnreset", "dns", "unreachable", "network timeout"],
            FixStrategy::Network,
            7,
        ),
        ClassifierRule::builtin(
            "navigation",
            &["route not found", "page not found", "navigation failed", "redirect loop", "404"],
            FixStrategy::NavigationConfig,
            6,
        ),
        ClassifierRule::builtin(
            "element",
            &["element not found", "not clickable", "not interactable", "stale element", "selector"],
            FixStrategy::ElementInteraction,
            6,
        ),
        ClassifierRule::builtin(
            "input",
            &["validation failed", "invalid input", "rejected input", "required field"],
            FixStrategy::InputValidation,
            6,
        ),
        ClassifierRule::builtin(
            "resource",
            &["out of memory", "memory leak", "heap exhausted", "disk full", "cache overflow"],
            FixStrategy::ResourceReclaim,
            6,
        ),
    ]
}

/// Structured classifier output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub strategy: FixStrategy,
    pub risk: RiskLevel,
    /// Name of the rule (or `context:<kind>`) that decided.
    pub rule: String,
    /// 0.0 - 1.0
    pub confidence: f32,
    pub matched_keywords: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Vec<ClassifierRule>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier {
    pub fn new() -> Self {
        Self {
            rules: default_rules(),
        }
    }

    /// Built-in table plus configured rules. Configured rules win priority ties.
    pub fn with_rules(extra: &[ClassifierRuleConfig]) -> Self {
        let mut rules: Vec<ClassifierRule> = extra.iter().map(ClassifierRule::from).collect();
        rules.extend(default_rules());
        Self { rules }
    }

    pub fn rules(&self) -> &[ClassifierRule] {
        &self.rules
    }

    pub fn classify(&self, entry: &ErrorEntry) -> Option<Classification> {
        if let Some(hit) = entry.context.as_ref().and_then(context_strategy) {
            let (strategy, kind) = hit;
            return Some(Classification {
                strategy,
                risk: strategy.intrinsic_risk(),
                rule: format!("context:{kind}"),
                confidence: 0.95,
                matched_keywords: Vec::new(),
            });
        }

        let description = normalize(&entry.description);
        let mut best: Option<(&ClassifierRule, Vec<String>)> = None;
        for rule in &self.rules {
            let Some(hits) = rule.matches(entry, &description) else {
                continue;
            };
            let better = match &best {
                None => true,
                Some((current, current_hits)) => {
                    (rule.priority, hits.len()) > (current.priority, current_hits.len())
                }
            };
            if better {
                best = Some((rule, hits));
            }
        }

        let (rule, hits) = best?;
        let confidence =
            (0.5 + f32::from(rule.priority) / 20.0 + (hits.len() as f32 / 10.0).min(0.3)).min(1.0);
        Some(Classification {
            strategy: rule.strategy,
            risk: rule.strategy.intrinsic_risk(),
            rule: rule.name.clone(),
            confidence,
            matched_keywords: hits,
        })
    }
}

/// Typed contexts that name their repair directly.
fn context_strategy(context: &ErrorContext) -> Option<(FixStrategy, &'static str)> {
    match context {
        ErrorContext::ConnectionPool { .. } => Some((FixStrategy::ConnectionPool, "connection_pool")),
        ErrorContext::Route { .. } => Some((FixStrategy::NavigationConfig, "route")),
        ErrorContext::Element { .. } => Some((FixStrategy::ElementInteraction, "element")),
        ErrorContext::Input { .. } => Some((FixStrategy::InputValidation, "input")),
        ErrorContext::Schema { column: Some(_), .. } => Some((FixStrategy::Schema, "schema")),
        ErrorContext::Query { .. } => Some((FixStrategy::Index, "query")),
        ErrorContext::Service { .. } => Some((FixStrategy::ServiceRestart, "service")),
        ErrorContext::Network { .. } => Some((FixStrategy::Network, "network")),
        ErrorContext::Http {
            status: Some(404), ..
        } => Some((FixStrategy::NavigationConfig, "http")),
        ErrorContext::Resource { .. } => Some((FixStrategy::ResourceReclaim, "resource")),
        ErrorContext::Schema { column: None, .. }
        | ErrorContext::Http { .. }
        | ErrorContext::Latency { .. }
        | ErrorContext::Generic { .. } => None,
    }
}

/// Lowercase and fold `-`/`_` to spaces so "connection-pool" matches "connection pool".
fn normalize(text: &str) -> String {
    text.to_lowercase().replace(['-', '_'], " ")
}

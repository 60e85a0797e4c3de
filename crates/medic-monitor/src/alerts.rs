//! Active alert set with deduplication and recovery hysteresis.

use chrono::{DateTime, Utc};
use medic_core::{Alert, AlertEvent, AlertEventKind, AlertId, AlertKey, AlertSeverity};
use std::collections::{BTreeMap, VecDeque};

/// A threshold breach observed by one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Breach {
    pub key: AlertKey,
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
}

#[derive(Debug, Clone)]
struct ActiveAlert {
    alert: Alert,
    healthy_streak: usize,
}

/// Active alerts keyed by [`AlertKey`] plus a bounded history of resolved ones.
#[derive(Debug, Clone)]
pub struct AlertBook {
    active: BTreeMap<AlertKey, ActiveAlert>,
    history: VecDeque<Alert>,
    history_limit: usize,
    recovery_window: usize,
}

impl AlertBook {
    pub fn new(recovery_window: usize, history_limit: usize) -> Self {
        Self {
            active: BTreeMap::new(),
            history: VecDeque::new(),
            history_limit,
            recovery_window: recovery_window.max(1),
        }
    }

    /// Raise a new alert or refresh the active one for the same key.
    pub fn breach(&mut self, breach: Breach, at: DateTime<Utc>) -> AlertEvent {
        if let Some(entry) = self.active.get_mut(&breach.key) {
            entry.healthy_streak = 0;
            let alert = &mut entry.alert;
            alert.last_seen = alert.last_seen.max(at);
            alert.occurrences += 1;
            alert.message = breach.message;
            alert.severity = alert.severity.max(breach.severity);
            return AlertEvent {
                kind: AlertEventKind::Refreshed,
                alert: alert.clone(),
            };
        }

        let alert = Alert {
            id: AlertId::generate(),
            key: breach.key.clone(),
            severity: breach.severity,
            title: breach.title,
            message: breach.message,
            first_seen: at,
            last_seen: at,
            occurrences: 1,
            acknowledged: false,
            resolved: false,
            resolved_at: None,
        };
        self.active.insert(
            breach.key,
            ActiveAlert {
                alert: alert.clone(),
                healthy_streak: 0,
            },
        );
        AlertEvent {
            kind: AlertEventKind::Raised,
            alert,
        }
    }

    /// Record one below-threshold evaluation for `key`.
    ///
    /// The alert clears only after `recovery_window` consecutive healthy
    /// evaluations; any breach in between resets the count.
    pub fn healthy(&mut self, key: &AlertKey, at: DateTime<Utc>) -> Option<AlertEvent> {
        let entry = self.active.get_mut(key)?;
        entry.healthy_streak += 1;
        if entry.healthy_streak < self.recovery_window {
            return None;
        }
        self.clear(key, at)
    }

    /// Clear an active alert immediately.
    pub fn clear(&mut self, key: &AlertKey, at: DateTime<Utc>) -> Option<AlertEvent> {
        let mut alert = self.active.remove(key)?.alert;
        alert.resolved = true;
        alert.resolved_at = Some(at);
        self.push_history(alert.clone());
        Some(AlertEvent {
            kind: AlertEventKind::Cleared,
            alert,
        })
    }

    pub fn acknowledge(&mut self, id: &AlertId) -> bool {
        match self.active.values_mut().find(|entry| &entry.alert.id == id) {
            Some(entry) => {
                entry.alert.acknowledged = true;
                true
            }
            None => false,
        }
    }

    /// Operator resolution: the alert leaves the active set regardless of hysteresis.
    pub fn resolve(&mut self, id: &AlertId, at: DateTime<Utc>) -> Option<AlertEvent> {
        let key = self
            .active
            .iter()
            .find(|(_, entry)| &entry.alert.id == id)
            .map(|(key, _)| key.clone())?;
        self.clear(&key, at)
    }

    pub fn is_active(&self, key: &AlertKey) -> bool {
        self.active.contains_key(key)
    }

    pub fn get(&self, key: &AlertKey) -> Option<&Alert> {
        self.active.get(key).map(|entry| &entry.alert)
    }

    /// Active alerts, oldest first.
    pub fn active(&self) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self.active.values().map(|e| e.alert.clone()).collect();
        alerts.sort_by(|a, b| a.first_seen.cmp(&b.first_seen).then_with(|| a.key.cmp(&b.key)));
        alerts
    }

    pub fn unacknowledged(&self) -> Vec<Alert> {
        self.active()
            .into_iter()
            .filter(|alert| !alert.acknowledged)
            .collect()
    }

    /// Resolved alerts, oldest first.
    pub fn history(&self) -> Vec<Alert> {
        self.history.iter().cloned().collect()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn clear_all(&mut self) {
        self.active.clear();
        self.history.clear();
    }

    fn push_history(&mut self, alert: Alert) {
        if self.history_limit == 0 {
            return;
        }
        if self.history.len() == self.history_limit {
            self.history.pop_front();
        }
        self.history.push_back(alert);
    }
}

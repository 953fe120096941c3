//! [`AlertBook`] – deduplicated alert lifecycle.
//!
//! At most one unresolved alert exists per `(kind, source)`.  Raising an
//! already-active pair is a no-op.  Resolved alerts stay visible for a
//! grace period and are then purged.

use arbiter_types::{Alert, AlertKind, AlertSeverity};
use tracing::{info, warn};

#[derive(Debug, Default)]
pub struct AlertBook {
    alerts: Vec<Alert>,
}

impl AlertBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self, kind: AlertKind, source: &str) -> Option<&Alert> {
        self.alerts
            .iter()
            .find(|a| !a.resolved && a.kind == kind && a.source == source)
    }

    /// Raise an alert unless the same `(kind, source)` is already active.
    /// Returns the new alert.
    #[allow(clippy::too_many_arguments)]
    pub fn raise(
        &mut self,
        kind: AlertKind,
        source: &str,
        severity: AlertSeverity,
        message: String,
        observed: f64,
        threshold: f64,
        tick: u64,
    ) -> Option<Alert> {
        if self.active(kind, source).is_some() {
            return None;
        }
        let alert = Alert::new(kind, source, severity, message, observed, threshold, tick);
        warn!(
            kind = %alert.kind,
            source = %alert.source,
            severity = ?alert.severity,
            observed,
            threshold,
            "performance alert raised"
        );
        self.alerts.push(alert.clone());
        Some(alert)
    }

    /// Resolve the active `(kind, source)` alert, if any.
    pub fn resolve(&mut self, kind: AlertKind, source: &str, tick: u64) -> Option<Alert> {
        let alert = self
            .alerts
            .iter_mut()
            .find(|a| !a.resolved && a.kind == kind && a.source == source)?;
        alert.resolve(tick);
        info!(kind = %alert.kind, source = %alert.source, "performance alert resolved");
        Some(alert.clone())
    }

    /// Drop alerts resolved at least `grace_ticks` before `now`.  Returns the
    /// number purged.
    pub fn purge(&mut self, now: u64, grace_ticks: u64) -> usize {
        let before = self.alerts.len();
        self.alerts.retain(|a| match a.resolved_tick {
            Some(resolved) => now.saturating_sub(resolved) < grace_ticks,
            None => true,
        });
        before - self.alerts.len()
    }

    pub fn active_alerts(&self) -> Vec<Alert> {
        self.alerts.iter().filter(|a| !a.resolved).cloned().collect()
    }

    pub fn all(&self) -> &[Alert] {
        &self.alerts
    }

    pub fn active_count(&self) -> usize {
        self.alerts.iter().filter(|a| !a.resolved).count()
    }
}

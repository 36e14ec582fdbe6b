//! Security context aggregation and its background lifecycle.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::TimeDelta;
use serde::Serialize;
use tokio::task::JoinHandle;

use quotegate_core::{Clock, PeriodicTask};

use crate::alerts::{AlertKind, AlertLog, SecurityAlert, MAX_ALERT_AGE};
use crate::{ClientAttributes, DeviceFingerprint, NetworkOrigin, NetworkOriginLookup, RiskAssessor, RiskContext, RiskLevel};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Serializable view of the current risk picture.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskSignal {
    pub fingerprint: DeviceFingerprint,
    pub origin: Option<NetworkOrigin>,
    pub risk_level: Option<RiskLevel>,
    pub alerts: Vec<SecurityAlert>,
}

#[derive(Debug, Default)]
struct MutableState {
    origin: Option<NetworkOrigin>,
    identifier: Option<String>,
    risk_level: Option<RiskLevel>,
    alerts: AlertLog,
}

/// Session-scoped risk state. Reset by constructing a new one.
pub struct SecurityContext {
    fingerprint: DeviceFingerprint,
    user_agent: String,
    assessor: Arc<dyn RiskAssessor>,
    clock: Arc<dyn Clock>,
    state: Mutex<MutableState>,
}

impl core::fmt::Debug for SecurityContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SecurityContext")
            .field("fingerprint", &self.fingerprint.short())
            .finish_non_exhaustive()
    }
}

impl SecurityContext {
    /// Compute the device fingerprint once and start with an empty picture.
    pub fn new(attrs: &ClientAttributes, assessor: Arc<dyn RiskAssessor>, clock: Arc<dyn Clock>) -> Self {
        let fingerprint = DeviceFingerprint::compute(attrs);
        tracing::debug!(fingerprint = fingerprint.short(), "security context initialised");
        Self {
            fingerprint,
            user_agent: attrs.user_agent.clone(),
            assessor,
            clock,
            state: Mutex::new(MutableState::default()),
        }
    }

    pub fn fingerprint(&self) -> &DeviceFingerprint {
        &self.fingerprint
    }

    pub fn origin(&self) -> Option<NetworkOrigin> {
        lock(&self.state).origin.clone()
    }

    pub fn risk_level(&self) -> Option<RiskLevel> {
        lock(&self.state).risk_level
    }

    /// Identifier (e-mail or subject id) used by periodic re-assessment.
    pub fn set_identifier(&self, identifier: Option<String>) {
        lock(&self.state).identifier = identifier;
    }

    /// Refresh the network origin. Failures are logged and leave the previous
    /// origin in place. A country change raises an alert.
    pub async fn refresh_origin(&self, lookup: &dyn NetworkOriginLookup) {
        let origin = match lookup.lookup().await {
            Ok(origin) => origin,
            Err(err) => {
                tracing::warn!("network origin lookup failed: {err}");
                return;
            }
        };

        let mut state = lock(&self.state);
        let previous_country = state.origin.as_ref().and_then(|o| o.country.clone());
        if let (Some(before), Some(after)) = (&previous_country, &origin.country) {
            if before != after {
                let message = format!("network origin moved from {before} to {after}");
                tracing::warn!(ip = %origin.ip, "{message}");
                let alert = SecurityAlert::new(AlertKind::OriginChanged, RiskLevel::Medium, message, self.clock.now());
                state.alerts.push(alert);
            }
        }
        state.origin = Some(origin);
    }

    /// Ask the risk collaborator about `identifier` with this session's
    /// signals. Any failure yields `None` so sign-in flows never wait on this
    /// subsystem.
    pub async fn assess_risk(&self, identifier: &str) -> Option<RiskLevel> {
        let level = self
            .assess_request(identifier, self.user_agent.clone(), self.origin())
            .await?;
        lock(&self.state).risk_level = Some(level);
        Some(level)
    }

    /// Score a request made by some other client, using that client's agent
    /// string and origin. Leaves this session's state untouched.
    pub async fn assess_request(
        &self,
        identifier: &str,
        user_agent: String,
        origin: Option<NetworkOrigin>,
    ) -> Option<RiskLevel> {
        let context = RiskContext {
            origin,
            user_agent,
            timestamp: self.clock.now(),
        };

        match self.assessor.assess_risk(identifier, &context).await {
            Ok(level) => Some(level),
            Err(err) => {
                tracing::warn!("risk assessment failed: {err}");
                None
            }
        }
    }

    /// Forwarded to the collaborator's policy. No level means no captcha.
    pub fn should_require_captcha(&self, level: Option<RiskLevel>) -> bool {
        level.is_some_and(|l| self.assessor.should_require_captcha(l))
    }

    /// Periodic re-assessment of the current identifier, alerting on
    /// elevated levels. Does nothing while no identifier is set.
    pub async fn reassess(&self) -> Option<RiskLevel> {
        let identifier = lock(&self.state).identifier.clone()?;
        let level = self.assess_risk(&identifier).await?;
        if level.is_elevated() {
            self.raise_alert(AlertKind::ElevatedRisk, level, format!("risk re-assessment returned {level}"));
        }
        Some(level)
    }

    pub fn raise_alert(&self, kind: AlertKind, level: RiskLevel, message: impl Into<String>) {
        let alert = SecurityAlert::new(kind, level, message, self.clock.now());
        tracing::info!(kind = ?alert.kind, level = %alert.level, "security alert: {}", alert.message);
        lock(&self.state).alerts.push(alert);
    }

    /// Most recent first.
    pub fn alerts(&self) -> Vec<SecurityAlert> {
        lock(&self.state).alerts.to_vec()
    }

    pub fn prune_alerts(&self, max_age: TimeDelta) -> usize {
        let now = self.clock.now();
        let removed = lock(&self.state).alerts.prune(now, max_age);
        if removed > 0 {
            tracing::debug!(removed, "pruned expired security alerts");
        }
        removed
    }

    pub fn snapshot(&self) -> RiskSignal {
        let state = lock(&self.state);
        RiskSignal {
            fingerprint: self.fingerprint.clone(),
            origin: state.origin.clone(),
            risk_level: state.risk_level,
            alerts: state.alerts.to_vec(),
        }
    }
}

/// Timer settings for [`SecurityMonitor`].
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub prune_interval: Duration,
    pub max_alert_age: TimeDelta,
    pub reassess_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            prune_interval: Duration::from_secs(5 * 60),
            max_alert_age: MAX_ALERT_AGE,
            reassess_interval: Duration::from_secs(5 * 60),
        }
    }
}

/// Owns the background work of a [`SecurityContext`]: the one-shot origin
/// lookup, alert pruning and risk re-assessment.
///
/// Everything stops on [`SecurityMonitor::shutdown`] or when the monitor is
/// dropped.
#[derive(Debug)]
pub struct SecurityMonitor {
    context: Arc<SecurityContext>,
    origin_lookup: Option<JoinHandle<()>>,
    timers: Vec<PeriodicTask>,
}

impl SecurityMonitor {
    pub fn start(context: Arc<SecurityContext>, lookup: Arc<dyn NetworkOriginLookup>, config: MonitorConfig) -> Self {
        let origin_ctx = Arc::clone(&context);
        let origin_lookup = tokio::spawn(async move {
            origin_ctx.refresh_origin(lookup.as_ref()).await;
        });

        let prune_ctx = Arc::clone(&context);
        let max_age = config.max_alert_age;
        let pruner = PeriodicTask::spawn("security-alert-prune", config.prune_interval, move || {
            let ctx = Arc::clone(&prune_ctx);
            async move {
                ctx.prune_alerts(max_age);
            }
        });

        let risk_ctx = Arc::clone(&context);
        let reassessor = PeriodicTask::spawn("security-risk-reassess", config.reassess_interval, move || {
            let ctx = Arc::clone(&risk_ctx);
            async move {
                ctx.reassess().await;
            }
        });

        tracing::info!(fingerprint = context.fingerprint().short(), "security monitor started");

        Self {
            context,
            origin_lookup: Some(origin_lookup),
            timers: vec![pruner, reassessor],
        }
    }

    pub fn context(&self) -> &Arc<SecurityContext> {
        &self.context
    }

    pub async fn shutdown(mut self) {
        if let Some(lookup) = self.origin_lookup.take() {
            lookup.abort();
        }
        for timer in std::mem::take(&mut self.timers) {
            timer.shutdown().await;
        }
        tracing::info!("security monitor stopped");
    }
}

impl Drop for SecurityMonitor {
    fn drop(&mut self) {
        if let Some(lookup) = self.origin_lookup.take() {
            lookup.abort();
        }
    }
}

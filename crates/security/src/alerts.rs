//! Bounded log of recent security alerts.
//!
//! Two independent bounds apply: inserting keeps only the most recent
//! [`MAX_RETAINED_ALERTS`] by insertion order, and [`AlertLog::prune`] drops
//! alerts older than a maximum age. An alert exactly at the maximum age is
//! kept; only strictly older ones are removed.

use std::collections::VecDeque;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::RiskLevel;

pub const MAX_RETAINED_ALERTS: usize = 10;
pub const MAX_ALERT_AGE: TimeDelta = TimeDelta::hours(1);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// A risk assessment came back high or critical.
    ElevatedRisk,
    /// The network origin moved to a different country mid-session.
    OriginChanged,
    /// Raised by the host application.
    Custom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityAlert {
    pub id: Uuid,
    pub kind: AlertKind,
    pub level: RiskLevel,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

impl SecurityAlert {
    pub fn new(kind: AlertKind, level: RiskLevel, message: impl Into<String>, occurred_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            kind,
            level,
            message: message.into(),
            occurred_at,
        }
    }
}

/// Most-recent-first alert list.
#[derive(Debug, Clone)]
pub struct AlertLog {
    alerts: VecDeque<SecurityAlert>,
    capacity: usize,
}

impl Default for AlertLog {
    fn default() -> Self {
        Self::with_capacity(MAX_RETAINED_ALERTS)
    }
}

impl AlertLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            alerts: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Prepend `alert`, evicting the oldest insertions beyond capacity.
    pub fn push(&mut self, alert: SecurityAlert) {
        self.alerts.push_front(alert);
        self.alerts.truncate(self.capacity);
    }

    /// Remove alerts older than `max_age` at `now`. Returns how many went.
    pub fn prune(&mut self, now: DateTime<Utc>, max_age: TimeDelta) -> usize {
        let before = self.alerts.len();
        self.alerts.retain(|a| now - a.occurred_at <= max_age);
        before - self.alerts.len()
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SecurityAlert> {
        self.alerts.iter()
    }

    pub fn to_vec(&self) -> Vec<SecurityAlert> {
        self.alerts.iter().cloned().collect()
    }
}

//! `quotegate-security`
//!
//! **Responsibility:** best-effort picture of client risk for monitoring.
//!
//! Nothing in this crate blocks access on its own:
//! - collaborator failures are logged and degrade to "no signal";
//! - alerts are consumed by monitoring, never by the role guard.

pub mod aggregator;
pub mod alerts;
pub mod fingerprint;
pub mod origin;
pub mod risk;

pub use aggregator::{MonitorConfig, RiskSignal, SecurityContext, SecurityMonitor};
pub use alerts::{AlertKind, AlertLog, SecurityAlert, MAX_ALERT_AGE, MAX_RETAINED_ALERTS};
pub use fingerprint::{ClientAttributes, DeviceFingerprint};
pub use origin::{NetworkOrigin, NetworkOriginLookup};
pub use risk::{RiskAssessor, RiskContext, RiskLevel};

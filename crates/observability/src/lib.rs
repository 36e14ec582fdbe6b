//! Process-wide tracing setup shared by every binary in the workspace.

/// Tracing/logging initialisation.
pub mod tracing;

pub use crate::tracing::LogFormat;

/// Initialize process-wide observability with the format named by
/// `QUOTEGATE_LOG_FORMAT` (`json` by default, `pretty` for local work).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(LogFormat::from_env());
}

//! Process-wide logging setup shared by binaries and tests.

pub use crate::tracing::{ENV_LOG_FORMAT, LogFormat};

/// Initialize process-wide tracing.
///
/// Safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Subscriber configuration (filters, output format).
pub mod tracing;

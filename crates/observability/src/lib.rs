//! Process-wide tracing setup shared by the binaries.

/// Initialize tracing/logging for the process.
///
/// Safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Subscriber construction (filter + formatter).
pub mod tracing;

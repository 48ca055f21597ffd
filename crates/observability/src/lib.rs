//! Process-wide tracing setup shared by the rowforge binaries.

pub mod tracing;

pub use self::tracing::{LogFormat, init_with};

/// Initialize tracing with the defaults: JSON lines, `RUST_LOG` or `info`.
///
/// Safe to call multiple times; later calls are no-ops.
pub fn init() {
    self::tracing::init_with("info", LogFormat::from_env());
}

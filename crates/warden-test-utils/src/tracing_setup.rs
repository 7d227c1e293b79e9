//! Tracing initialisation helpers for tests.
//!
//! Call [`init_test_tracing`] at the top of any test that wants engine
//! decisions captured by the test harness.
//!
//! The subscriber is initialised at most once per process, so it is safe to
//! call from every test function.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset: rule selection is logged at trace.
pub const DEFAULT_TEST_FILTER: &str = "warn,warden_core=debug,warden_config=debug";

/// Initialise a tracing subscriber that writes to the test-harness writer
/// and respects the `RUST_LOG` environment variable.
///
/// Subsequent calls are ignored.
///
/// # Example
///
/// ```ignore
/// #[test]
/// fn my_test() {
///     warden_test_utils::tracing_setup::init_test_tracing();
///     tracing::debug!("visible with the default filter");
/// }
/// ```
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_TEST_FILTER)),
        )
        .with_test_writer()
        .try_init();
}

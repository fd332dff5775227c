//! Shared test setup.
//!
//! Call [`init_tracing`] at the top of a test to route `RUST_LOG`-filtered
//! events to the test output. Structural events only exist when the crate
//! is built with `--features tracing`:
//!
//! ```bash
//! RUST_LOG=crabtree=trace cargo test --features tracing --test stress_tests
//! ```

#![allow(dead_code)]

use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Initialize the tracing subscriber once per test binary.
///
/// Safe to call from every test; only the first call takes effect.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

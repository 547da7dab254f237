#![allow(dead_code)]

use narrator::config::Config;
use std::time::Duration;

pub const TICK: Duration = Duration::from_secs(2);

/// Initialize tracing for tests with proper test output handling
pub fn tracing_init() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Default configuration polling every [`TICK`]
pub fn test_config() -> Config {
    Config {
        poll_interval: TICK,
        ..Config::default()
    }
}

// Library exports for the CLI, integration tests and embedding frontends

pub mod api;
pub mod config;
pub mod events;
pub mod library;
pub mod monitor;
pub mod notifications;
pub mod playback;
pub mod session;
pub mod upload;

pub use config::Config;
pub use session::{Session, View};

// Test support (unit tests, or integration tests with the test-utils feature)
#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;

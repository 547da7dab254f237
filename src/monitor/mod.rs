// # Conversion Monitor
//
// Polls `/conversion-status/{filename}` for every conversion in flight and
// feeds the answers into the library store until a terminal status arrives.
//
// - `ConversionMonitor`: the service task owning one poll task per filename
// - `MonitorHandle`: watch/stop/query commands and progress subscriptions
// - `ConversionProgress`: what subscribers receive

mod progress;
mod service;

pub use progress::ConversionProgress;
pub use service::{ConversionMonitor, MonitorHandle, MonitorState};

// Internal modules required when compiled as a library for tests.
pub mod alerts;
pub mod app;
pub mod config;
pub mod device;
pub mod http;
pub mod metrics;
pub mod notify;
pub mod poller;
pub mod series;
pub mod state;
pub mod timestamp;
// Re-export commonly used types for tests
pub use alerts::{Alert, AlertKind, AlertSeverity};
pub use device::{DeviceSnapshot, DeviceState};
pub use series::{SeriesParams, SeriesPoint};
pub use state::{DashboardState, Event, SeverityShift, SharedState};

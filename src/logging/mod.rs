//! Batched file logging
//!
//! - `LogSink`: lock-free queue drained to a daily log file by a timer task
//! - `ScopeStack`/`ScopeGuard`: named scopes shared by all callers of a sink
//! - `LogSinkLayer`: forwards `tracing` events into a sink

pub mod entry;
pub mod layer;
pub mod scope;
pub mod sink;

pub use entry::{LogEntry, LogLevel};
pub use layer::LogSinkLayer;
pub use scope::{ScopeGuard, ScopeStack};
pub use sink::{LogSink, LogSinkConfig, Logger};

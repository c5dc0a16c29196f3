//! # Built-in subscribers
//!
//! - [`LogWriter`]: renders events as `tracing` records (demo/debug).

mod log;

pub use log::LogWriter;

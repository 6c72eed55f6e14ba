//! Shared utilities: logging setup and clocks

pub mod logger;
pub mod timer;

pub use logger::{init_logger, Verbosity};
pub use timer::{Clock, MonotonicClock, Timer};

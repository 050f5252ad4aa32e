pub mod config;
pub mod duration;
pub mod types;

pub use config::{ConfigError, DisruptionSettings, NodePoolConfig, ReclaimConfig, Timings};
pub use duration::{format_duration, parse_duration};
pub use types::*;

pub mod config;
pub mod event;

pub use config::{
    Config, DatabaseConfig, LogFormat, LoggingConfig, RotationPolicy, SchedulerConfig,
    ServerConfig,
};
pub use event::{Event, EventOutcome, EventState};

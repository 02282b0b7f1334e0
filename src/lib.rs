pub mod app;
pub mod archive;
pub mod cli;
pub mod config;
pub mod error;
pub mod exclude;
pub mod fsops;
pub mod metrics;
pub mod naming;
pub mod retention;
pub mod scheduler;
pub mod sync_job;
pub mod template;
pub mod transfer;
pub mod util;

pub use error::{ArchiveError, ConfigError, ExcludeError, NamingError, SchedulerError};

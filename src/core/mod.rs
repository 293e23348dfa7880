// Infrastructure shared by the launch components

pub mod config;
pub mod errors;
pub mod telemetry;

pub use config::{LauncherConfig, LauncherConfigBuilder};
pub use errors::{LaunchError, Result};

pub mod candidates;
pub mod config_files;
pub mod control;
pub mod gateway;
pub mod probe;
pub mod profile;
pub mod query;
pub mod runner;
pub mod settings;
pub mod telemetry;

pub use gateway::{Gateway, GatewayError};
pub use settings::Settings;

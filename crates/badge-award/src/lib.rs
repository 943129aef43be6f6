pub mod badges;
pub mod config;
pub mod error;
pub mod telemetry;

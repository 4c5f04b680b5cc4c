pub mod alerts;
pub mod cli;
pub mod config;
pub mod device;
pub mod monitor;
pub mod pipeline;
pub mod telemetry;

pub mod app;
pub mod config;
pub mod telemetry;
pub mod server;

pub mod config;
pub mod models;
pub mod process;
pub mod storage;
pub mod reporter;
pub mod telemetry;
pub mod health;
pub mod driver_loading;
pub mod driver_training;
pub mod driver_inference;
pub mod aggregate;
pub mod convert;

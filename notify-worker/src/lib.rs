pub mod app_context;
pub mod clock;
pub mod config;
pub mod consumer;
pub mod error;
pub mod handlers;
pub mod metrics_consts;
pub mod pool;
pub mod sensitive;
pub mod stages;

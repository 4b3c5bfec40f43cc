pub mod app_context;
pub mod config;
pub mod delivery;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod pipeline;

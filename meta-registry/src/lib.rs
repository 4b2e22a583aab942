pub mod api;
pub mod collector;
pub mod config;
pub mod event;
pub mod inference;
pub mod metrics_consts;
pub mod prometheus;
pub mod register;
pub mod registry;
pub mod router;
pub mod server;
pub mod store;
pub mod types;

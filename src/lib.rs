pub mod builder;
pub mod config;
pub mod docker;
pub mod orchestrator;
pub mod proxy;
pub mod server;
pub mod shared;

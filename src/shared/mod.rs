pub mod logging;
pub mod models;

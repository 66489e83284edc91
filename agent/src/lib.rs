pub mod agent;
pub mod build_info;
pub mod config;
pub mod error;
pub mod handlers;
pub mod heartbeat;
pub mod logging;
pub mod server;
pub mod test_utils;

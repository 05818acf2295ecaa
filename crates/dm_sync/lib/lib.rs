pub mod build_info;
pub mod cache;
pub mod cli;
pub mod commands;
pub mod config;
pub mod credentials;
pub mod debounce;
pub mod directcast;
pub mod logging;
pub mod pagination;
pub mod refresh;
pub mod resilience;
pub mod server;
pub mod state;

pub mod auth;
pub mod commands;
pub mod config;
pub mod error;
pub mod health;
pub mod routes;
pub mod server;
pub mod shutdown;
pub mod storage;
pub mod utils;

pub use config::Config;
pub use server::Server;

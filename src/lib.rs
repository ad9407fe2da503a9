pub mod api;
pub mod constants;
pub mod engine;
pub mod error;
pub mod server_protocol;
pub mod server_utils;
pub mod session;
pub mod settings_client;
pub mod settings_store;
pub mod types;

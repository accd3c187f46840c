pub mod api;
pub mod clients;
pub mod config;
pub mod error;
pub mod events;
pub mod models;
pub mod queue;
pub mod sender;
pub mod utils;

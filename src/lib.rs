pub mod api;
pub mod clients;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod models;
pub mod producer;
pub mod publisher;
pub mod utils;

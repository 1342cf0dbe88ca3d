pub mod api;
pub mod broker;
pub mod clients;
pub mod config;
pub mod consumer;
pub mod directory;
pub mod dispatch;
pub mod error;
pub mod models;
pub mod publisher;
pub mod topology;
pub mod utils;

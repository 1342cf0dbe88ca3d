pub mod category;
pub mod destination;
pub mod health;
pub mod message;
pub mod provider;
pub mod retry;
pub mod role;
pub mod service;
pub mod status;

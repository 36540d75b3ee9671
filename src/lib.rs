pub mod cli;
pub mod config;
pub mod connection;
pub mod error;
pub mod lifecycle;
pub mod models;
pub mod publisher;
pub mod serial;
pub mod source;
pub mod store;

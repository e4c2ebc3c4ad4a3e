pub mod adapter;
pub mod config;
pub mod context;
pub mod error;
pub mod handlers;
pub mod resolver;
pub mod worker;

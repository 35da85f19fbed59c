pub mod app;
pub mod config;
pub mod credentials;
pub mod error;
pub mod handlers;
pub mod upstream;

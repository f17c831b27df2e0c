pub mod analytics;
pub mod config;
pub mod error;
pub mod pricing;
pub mod session;
pub mod settings;
pub mod store;

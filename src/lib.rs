pub mod config;
pub mod mqtt;
pub mod registry;

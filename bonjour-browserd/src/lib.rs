pub mod api;
pub mod config;
pub mod logger;
pub mod mdns;
pub mod presenter;
pub mod registry;
pub mod registry_manager;

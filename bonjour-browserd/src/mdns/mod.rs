pub mod browser;
pub mod error;
pub mod snapshot;

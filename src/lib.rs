//! Satellite NDVI acquisition and sync for agricultural fields.

pub mod clock;
pub mod config;
pub mod error;
pub mod geometry;
pub mod model;
pub mod provider;
pub mod registry;
pub mod scheduler;
pub mod selector;
pub mod server;
pub mod store;
pub mod sync;
pub mod tiles;
pub mod token;

#[cfg(test)]
mod testing;

pub use error::SyncError;

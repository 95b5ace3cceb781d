pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod events;
pub mod export;
pub mod fetcher;
pub mod metadata;
pub mod model;
pub mod spider;
pub mod task;

pub use error::{Error, Result};

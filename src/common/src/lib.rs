pub mod client;
pub mod config;
pub mod error;
pub mod keys;
pub mod store;

pub use client::ClientPool;
pub use error::{PurgeError, PurgeResult};

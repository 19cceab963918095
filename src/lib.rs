pub mod config;
pub mod error;
pub mod events;
pub mod market_data;
pub mod notify;
pub mod task;
pub mod telemetry;
pub mod wire;

pub use error::{FeedError, FeedResult};

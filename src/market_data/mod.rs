// Market data module entrypoint
pub mod adapters;    // price sources (REST fetch, websocket stream)
pub mod normaliser;  // wire ticks -> validated PriceTicks
pub mod types;       // PriceTick, PriceBatch, PublishOutcome
pub mod batcher;     // coalesces bursts into one flush per window
pub mod hub;         // subscription registry + latest tick per symbol
pub mod router;      // wires sources into the hub

pub use hub::{PriceCallback, PriceHub, Subscription};
pub use types::{PriceBatch, PriceTick, PublishOutcome};

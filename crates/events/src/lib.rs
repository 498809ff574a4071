//! In-process event bus for job updates.
//!
//! - [`EventBus`] -- publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`PlatformEvent`] -- the event envelope carried on the bus.
//!
//! The bus broadcasts globally; consumers filter by owner.

pub mod bus;

pub use bus::{EventBus, PlatformEvent};

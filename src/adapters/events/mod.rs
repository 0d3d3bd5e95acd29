//! Event distribution adapters.

mod bus;

pub use bus::{HandlerEventBus, SubscriptionId};

pub mod event;
pub mod shutdown;

pub use event::{Event, EventBus, SubscriptionId};
pub use shutdown::Shutdown;

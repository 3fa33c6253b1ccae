pub mod error;
pub mod event;
pub mod queue;
pub mod transport;

pub use error::TransportError;
pub use event::Event;
pub use queue::{MessageQueue, Popped};
pub use transport::Transport;

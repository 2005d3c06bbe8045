pub mod backoff;
pub mod channel;
pub mod connection;

pub use backoff::{Backoff, ReconnectPolicy};
pub use channel::{Channel, ChannelEvent, ChannelEvents, ChannelSender, EnvelopeSink};
pub use connection::{Connection, ConnectionInfo, ConnectionSender};

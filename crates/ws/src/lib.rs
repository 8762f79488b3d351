pub mod fanout;
pub mod protocol;
pub mod queue;

pub use fanout::{ClientId, Fanout, FanoutConfig, LIVENESS_PING_INTERVAL};
pub use protocol::{ClientMessage, ServerMessage, WsErrorCode};
pub use queue::OutboundQueue;

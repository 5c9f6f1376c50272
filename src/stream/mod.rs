pub mod backoff;
pub mod client;
pub mod protocol;
pub mod rate_limit;

pub use client::{ConnectionState, StreamClient, StreamError, StreamEvent};
pub use protocol::ChannelName;

//! Server-push session streams
//!
//! - [`sse`]: incremental `text/event-stream` framing
//! - [`transport`]: how a channel for one session is opened
//! - [`subscriber`]: the registry enforcing one live channel per session

pub mod sse;
pub mod subscriber;
pub mod transport;

pub use sse::{SseDecoder, SseFrame};
pub use subscriber::{StreamNotice, StreamSubscriber, SubscriptionState};
pub use transport::{decode_sse, EventStream, EventTransport, ScriptedTransport};

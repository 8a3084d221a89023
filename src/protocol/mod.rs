//! Wire contract with the session service
//!
//! Shapes only: sessions, responses, summaries, list queries and the
//! named events pushed on a session stream. Serialized as JSON.

mod events;
mod query;
mod session;

pub use events::*;
pub use query::*;
pub use session::*;

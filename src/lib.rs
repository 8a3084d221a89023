//! twin-qa - fan-out Q&A sessions over digital twin personas
//!
//! One question goes to many prospects; their answers stream back
//! independently and are folded into one live view per session.
//!
//! Layers, leaf first:
//! - [`protocol`]: wire shapes and stream events
//! - [`client`]: request/response session service (HTTP or simulated)
//! - [`stream`]: SSE decoding and the per-session channel registry
//! - [`aggregator`]: merge rules, reconnects and board snapshots
//! - [`surface`]: the operational API applications call

pub mod aggregator;
pub mod cli;
pub mod client;
pub mod config;
pub mod directory;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod stream;
pub mod surface;
pub mod version;

pub use aggregator::{BoardEvent, PendingOp, SessionAggregator, SessionBoard};
pub use config::QaConfig;
pub use error::{Error, ErrorKind, Result};
pub use surface::QaSurface;

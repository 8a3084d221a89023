//! Session aggregation
//!
//! Folds stream notices and server snapshots into one view per session and
//! publishes that view to observers.

mod board;
mod manager;
mod state;

pub use board::{BoardEvent, BoardSession, PendingOp, SessionBoard};
pub use manager::{Activity, ReconnectPolicy, SessionAggregator};
pub use state::{MergeOutcome, TrackedSession};

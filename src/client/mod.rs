//! Session service clients
//!
//! This module provides the [`SessionService`] abstraction and its two
//! implementations: the HTTP client for a real service and the in-memory
//! simulation used offline. Both also open live streams, so the aggregator
//! runs the same code in either mode.

mod http;
mod simulated;
mod traits;

pub use http::HttpSessionClient;
pub use simulated::{SimulatedConfig, SimulatedSessionClient};
pub use traits::*;

pub mod config;
pub mod network;
pub mod sentiment;
pub mod state;
pub mod types;

pub use config::KresnikConfig;
pub use network::{InboundMessage, LoggingNetwork, MemoryNetwork, Network, Profile};
pub use sentiment::{KeywordValence, ValenceScorer};
pub use state::{clamp_unit, GrowthPhase, GrowthState, InnerState};
pub use types::*;

/// Current wall-clock time in unix seconds.
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

//! # Kresnik Limbic
//!
//! The heartbeat: a single periodic driver that decides, each tick, whether
//! the entity dreams, grows, tends a project, speaks unprompted, or rests.

pub mod dice;
pub mod growth;
mod heartbeat;

pub use dice::{Dice, RandomDice, ScriptedDice};
pub use growth::{accept_directions, Directions, DirectionsReply};
pub use heartbeat::{spontaneous_probability, HeartbeatScheduler, TickAction};

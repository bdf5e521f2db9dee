pub mod crystal;
pub mod graph;
pub mod journal;
pub mod ledger;
pub mod similarity;
pub mod sqlite;

pub use graph::{resonance_score, DecayReport};
pub use sqlite::{Counter, SqliteStore};

#[cfg(test)]
mod tests;

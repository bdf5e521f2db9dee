pub mod api_types;
pub mod decision;
pub mod dream;
pub mod llm;
pub mod mind;
pub mod process;
pub mod prompts;
pub mod providers;
pub mod retry;
pub mod triad;

pub use decision::{DecisionError, SynthesisDecision};
pub use dream::{DreamOutcome, DreamReport};
pub use llm::{CompletionParams, GenerationError, LlmClient};
pub use mind::{Mind, MindEvent, MindGuard};
pub use triad::{Stimulus, TriadOutcome, TriadPhase, TriadReport};

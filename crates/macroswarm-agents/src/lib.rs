pub mod classifier;
pub mod error;
pub mod orchestrator;

pub use classifier::{majority, ClassifierAgent, RuleAgent};
pub use error::AgentError;
pub use orchestrator::{synthesize, RunOutcome, SwarmOrchestrator};

// Surveillance pipeline: per-feed processing stages and the run governor

pub mod governor;
pub mod processing;

pub use governor::{PipelineRun, RunDecision, RunOutcome, StalenessGovernor};

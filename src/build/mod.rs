mod clean;
pub mod directory;
mod feedback;
pub mod optimizer;
pub mod orchestrator;
pub mod pipeline;
pub mod remove;

pub use clean::clean;
pub use directory::{BuildDirectory, BuildDirectoryManager, SyncMode, choose_sync_mode};
pub use feedback::FeedbackAnalyzer;
pub use optimizer::{SequenceSummary, SkipReason, TwoStageOptimizer, UnitReport, UnitStatus};
pub use orchestrator::{BuildPlan, Orchestrator, RunReport, RunState, TargetOutcome, TargetReport};
pub use pipeline::{BuildContext, InitFailure, InitSettings};
pub use remove::{Removal, RetryPolicy, robust_remove};

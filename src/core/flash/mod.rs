// Flash module - Firmware flashing through external tools
pub mod job;
pub mod progress;
pub mod runner;
pub mod tool;

pub use job::{FlashEvent, FlashOptions, FlashRequest, JobId, JobOutcome, JobState, TargetFamily};
pub use progress::{parse_percent, OutputTail, ProgressTracker};
pub use runner::FlashRunner;
pub use tool::{ToolInvocation, ToolLayout, ToolResolver};

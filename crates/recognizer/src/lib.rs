pub mod config;
pub mod error;
pub mod layout;
pub mod inventory;
pub mod progress;
pub mod cleanup;
pub mod process;
pub mod job;

pub use config::{ImageType, RecognitionConfig};
pub use error::JobError;
pub use inventory::ProcessState;
pub use job::{JobController, JobPhase, JobSnapshot, RunOutcome, RunReport};
pub use progress::PageProgress;

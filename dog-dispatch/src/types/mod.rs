pub mod ids;
pub mod priority;
pub mod record;
pub mod events;
pub mod options;

pub use ids::JobId;
pub use priority::{Dispatch, JobPriority};
pub use record::{JobRecord, JobStatus, Progress};
pub use events::{EventKind, LifecycleEvent};
pub use options::{RunOptions, Submitted, WaitOutcome};

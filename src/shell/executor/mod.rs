pub mod builtins;
#[allow(clippy::module_inception)]
mod executor;
mod external;
pub mod job_manager;
pub mod registry;

pub use executor::Executor;
pub use job_manager::{Job, JobManager, JobStatus};
pub use registry::{Builtin, Entry, Factory, Registry};

//! Fail-fast execution of a group of external commands
//!
//! All jobs of a group run concurrently. The first job that exits with a
//! non-zero code causes every sibling still running to be terminated, and
//! [`Coordinator::execute`] returns once every job is accounted for.
//!
//! ```rust,no_run
//! use fast_group_core::{Coordinator, ExecutorSettings, JobSpec};
//!
//! # async fn demo() -> fast_group_core::Result<()> {
//! let coordinator = Coordinator::new(ExecutorSettings::default());
//! let result = coordinator
//!   .execute(&[
//!     JobSpec::shell("sleep 5", &[]),
//!     JobSpec::shell("sleep 1; exit 1", &[]),
//!   ])
//!   .await?;
//! assert!(!result.success());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod event;
pub mod group;
pub mod job;
pub mod process;

pub use config::{Backend, Config, ExecutorSettings};
pub use coordinator::{Coordinator, FinishHook};
pub use error::{GroupError, Result};
pub use group::JobGroup;
pub use job::{ExecutionResult, ExitReport, JobId, JobOutcome, JobSpec, JobStatus};
pub use process::{Launcher, ProcessHandle, SystemLauncher, Terminate};

/// Initialize tracing for the application
pub fn init_tracing(level: &str) -> Result<()> {
  use tracing_subscriber::{EnvFilter, fmt};

  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

  fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .try_init()
    .map_err(|e| GroupError::Init(e.to_string()))?;

  tracing::debug!("Tracing initialized with level: {}", level);
  Ok(())
}

//! Dispatcher services: task lifecycle, document registration, derived
//! statistics and the two background sweeps. Services hold repositories
//! behind the domain traits and the optional cache; all coordination goes
//! through committed store state.

pub mod liveness;
pub mod reclaimer;
pub mod registrar;
pub mod statistics;
pub mod task_service;

pub mod test_utils;

pub use liveness::{LivenessConfig, LivenessMonitor};
pub use reclaimer::{ReclaimConfig, TaskReclaimer};
pub use registrar::{DocumentMetadata, RegistrarService, RegistrationOutcome};
pub use statistics::{ClientActivity, ClientStatistics, StatisticsService, TaskDownloadStatistics};
pub use task_service::{TaskListing, TaskService};
